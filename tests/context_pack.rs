//! End-to-end context-pack assembly through `MemoryManager::context_pack`:
//! budget truncation, section caps, and ordering, exercised via the public
//! manager API rather than `contextpack::assemble` directly.

use llm_memory::{
    ContextPackRequest, Facets, ItemType, MemoryManager, MemoryQuery, Scope, ScopeSelector,
    UpsertInput,
};

fn manager(dir: &std::path::Path) -> MemoryManager {
    let home = dir.join("home");
    MemoryManager::open_with_home(dir, &home).unwrap()
}

#[test]
fn char_budget_truncates_snippets_with_ellipsis() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path());

    let long_code = "x".repeat(2000);
    manager
        .upsert(UpsertInput {
            item_type: ItemType::Snippet,
            scope: Scope::Local,
            title: Some("big snippet".into()),
            code: Some(long_code),
            language: Some("rust".into()),
            ..Default::default()
        })
        .unwrap();
    manager
        .upsert(UpsertInput {
            item_type: ItemType::Snippet,
            scope: Scope::Local,
            title: Some("second snippet".into()),
            code: Some("y".repeat(2000)),
            language: Some("rust".into()),
            ..Default::default()
        })
        .unwrap();

    let pack = manager.context_pack(
        ContextPackRequest {
            scope: "local".into(),
            max_chars: Some(1500),
            ..Default::default()
        },
        MemoryQuery {
            scope: ScopeSelector::Local,
            ..Default::default()
        },
    );

    assert!(!pack.snippets.is_empty());
    let total_chars: usize = pack.snippets.iter().map(|s| s.chars().count()).sum();
    assert!(total_chars <= 1500);
    assert!(pack.snippets[0].ends_with("..."));
}

#[test]
fn section_caps_bound_item_count_per_section() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path());

    for i in 0..20 {
        manager
            .upsert(UpsertInput {
                item_type: ItemType::Fact,
                scope: Scope::Global,
                title: Some(format!("fact {i}")),
                text: Some(format!("fact body {i}")),
                facets: Facets {
                    tags: vec!["shared".into()],
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();
    }

    let pack = manager.context_pack(
        ContextPackRequest {
            scope: "global".into(),
            ..Default::default()
        },
        MemoryQuery {
            scope: ScopeSelector::Global,
            k: 20,
            ..Default::default()
        },
    );

    assert!(pack.facts.len() <= 8, "facts section cap is 8");
}

#[test]
fn pinned_item_surfaces_before_unpinned_with_equal_text_match() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path());

    let unpinned = manager
        .upsert(UpsertInput {
            item_type: ItemType::Insight,
            scope: Scope::Local,
            title: Some("retry backoff pattern".into()),
            text: Some("use exponential backoff for retries".into()),
            ..Default::default()
        })
        .unwrap();
    let pinned = manager
        .upsert(UpsertInput {
            item_type: ItemType::Insight,
            scope: Scope::Local,
            title: Some("retry backoff pattern".into()),
            text: Some("use exponential backoff for retries".into()),
            ..Default::default()
        })
        .unwrap();
    manager.set_pinned(&pinned.id, true).unwrap();

    let result = manager.query(MemoryQuery {
        q: Some("retry backoff".into()),
        scope: ScopeSelector::Local,
        ..Default::default()
    });

    let pinned_pos = result.items.iter().position(|i| i.id == pinned.id);
    let unpinned_pos = result.items.iter().position(|i| i.id == unpinned.id);
    assert!(pinned_pos.is_some() && unpinned_pos.is_some());
    assert!(pinned_pos.unwrap() < unpinned_pos.unwrap());
}
