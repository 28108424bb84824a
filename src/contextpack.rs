//! Context-pack assembly: a bounded, IDE-ready bundle derived from a query
//! result.

use crate::config::ContextPackConfig;
use crate::model::{ItemType, MemoryItem};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct LinkHint {
    pub rel: String,
    pub to: String,
    pub from_title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextPack {
    pub title: String,
    pub hints: Vec<String>,
    pub snippets: Vec<String>,
    pub facts: Vec<String>,
    pub configs: Vec<String>,
    pub patterns: Vec<String>,
    pub links: Vec<LinkHint>,
    pub source: ContextPackSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextPackSource {
    pub scope: String,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContextPackRequest {
    pub scope: String,
    pub q: Option<String>,
    pub snippet_window: Option<crate::config::SnippetWindow>,
    pub snippet_languages: Option<Vec<String>>,
    pub snippet_file_patterns: Option<Vec<String>>,
    pub max_chars: Option<usize>,
    pub token_budget: Option<usize>,
}

struct Budget {
    chars_remaining: Option<usize>,
}

impl Budget {
    fn new(max_chars: Option<usize>, token_budget: Option<usize>) -> Self {
        let remaining = match (max_chars, token_budget) {
            (_, Some(tokens)) => Some(tokens * 4),
            (Some(chars), None) => Some(chars),
            (None, None) => None,
        };
        Self {
            chars_remaining: remaining,
        }
    }

    fn is_exhausted(&self) -> bool {
        self.chars_remaining == Some(0)
    }

    /// Try to fit `content` (whole or truncated-with-ellipsis) within the
    /// remaining budget; `min_chunk` is the smallest truncation this section
    /// type accepts. Returns `None` if nothing could be added.
    fn fit(&mut self, content: &str, min_chunk: usize) -> Option<String> {
        let Some(allowed) = self.chars_remaining else {
            return Some(content.to_string());
        };
        if allowed == 0 {
            return None;
        }
        if content.chars().count() <= allowed {
            self.chars_remaining = Some(allowed - content.chars().count());
            return Some(content.to_string());
        }
        if allowed < min_chunk {
            return None;
        }
        let keep = allowed.saturating_sub(3);
        let truncated: String = content.chars().take(keep).collect();
        self.chars_remaining = Some(0);
        Some(format!("{truncated}..."))
    }
}

/// Crop `content` around `context.range` or the first occurrence of a symbol,
/// falling back to the whole content.
fn crop_snippet(item: &MemoryItem, window: crate::config::SnippetWindow) -> Option<String> {
    let content = item.code.as_deref().or(item.text.as_deref())?;
    if content.is_empty() {
        return None;
    }
    let lines: Vec<&str> = content.lines().collect();

    if let Some(context) = &item.context {
        if let Some(range) = context.range {
            let start = (range.start as usize)
                .saturating_sub(window.before as usize)
                .max(1);
            let end = ((range.end as usize) + window.after as usize).min(lines.len());
            if start <= end && start >= 1 {
                return Some(lines[start - 1..end].join("\n"));
            }
        }
    }

    let symbol = item
        .context
        .as_ref()
        .and_then(|c| c.function.clone())
        .or_else(|| item.facets.symbols.first().cloned());
    if let Some(symbol) = symbol {
        if let Some(idx) = lines.iter().position(|l| l.contains(&symbol)) {
            let start = idx.saturating_sub(window.before as usize);
            let end = (idx + window.after as usize + 1).min(lines.len());
            return Some(lines[start..end].join("\n"));
        }
    }

    Some(content.to_string())
}

fn matches_language_filter(item: &MemoryItem, languages: &Option<Vec<String>>) -> bool {
    match languages {
        None => true,
        Some(allowed) if allowed.is_empty() => true,
        Some(allowed) => item
            .language
            .as_deref()
            .map(|l| allowed.iter().any(|a| a.eq_ignore_ascii_case(l)))
            .unwrap_or(false),
    }
}

fn matches_file_patterns(item: &MemoryItem, patterns: &Option<Vec<String>>) -> bool {
    match patterns {
        None => true,
        Some(patterns) if patterns.is_empty() => true,
        Some(patterns) => {
            let compiled: Vec<glob::Pattern> = patterns
                .iter()
                .filter_map(|p| glob::Pattern::new(p).ok())
                .collect();
            let candidates: Vec<&str> = item
                .facets
                .files
                .iter()
                .map(|s| s.as_str())
                .chain(item.context.as_ref().and_then(|c| c.file.as_deref()))
                .collect();
            candidates
                .iter()
                .any(|f| compiled.iter().any(|p| p.matches(f)))
        }
    }
}

/// Build a [`ContextPack`] from the items a query already retrieved, in their
/// given (already-ranked) order.
pub fn assemble(items: &[MemoryItem], request: &ContextPackRequest, config: &ContextPackConfig) -> ContextPack {
    let window = request.snippet_window.unwrap_or(config.snippet_window);
    let mut budget = Budget::new(request.max_chars, request.token_budget);

    let mut snippets = Vec::new();
    let mut facts = Vec::new();
    let mut patterns = Vec::new();
    let mut configs = Vec::new();
    let mut retained_ids = Vec::new();

    for section in &config.order {
        match section.as_str() {
            "snippets" => {
                for item in items {
                    if snippets.len() >= config.caps.snippets || budget.is_exhausted() {
                        break;
                    }
                    if !matches_language_filter(item, &request.snippet_languages)
                        || !matches_file_patterns(item, &request.snippet_file_patterns)
                    {
                        continue;
                    }
                    let Some(cropped) = crop_snippet(item, window) else {
                        continue;
                    };
                    if let Some(fit) = budget.fit(&cropped, 120) {
                        snippets.push(fit);
                        retained_ids.push(item.id.clone());
                    }
                }
            }
            "facts" => {
                for item in items.iter().filter(|i| i.item_type == ItemType::Fact) {
                    if facts.len() >= config.caps.facts || budget.is_exhausted() {
                        break;
                    }
                    if let Some(text) = &item.text {
                        if let Some(fit) = budget.fit(text, 40) {
                            facts.push(fit);
                            retained_ids.push(item.id.clone());
                        }
                    }
                }
            }
            "patterns" => {
                for item in items.iter().filter(|i| i.item_type == ItemType::Pattern) {
                    if patterns.len() >= config.caps.patterns || budget.is_exhausted() {
                        break;
                    }
                    let content = item.code.as_deref().or(item.text.as_deref());
                    if let Some(content) = content {
                        if let Some(fit) = budget.fit(content, 40) {
                            patterns.push(fit);
                            retained_ids.push(item.id.clone());
                        }
                    }
                }
            }
            "configs" => {
                for item in items.iter().filter(|i| i.item_type == ItemType::Config) {
                    if configs.len() >= config.caps.configs || budget.is_exhausted() {
                        break;
                    }
                    let content = item.code.as_deref().or(item.text.as_deref());
                    if let Some(content) = content {
                        if let Some(fit) = budget.fit(content, 40) {
                            configs.push(fit);
                            retained_ids.push(item.id.clone());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    retained_ids.sort();
    retained_ids.dedup();

    let retained_items: Vec<&MemoryItem> = items
        .iter()
        .filter(|i| retained_ids.contains(&i.id))
        .collect();

    let hints = build_hints(&retained_items, config.hints_n);
    let links = build_links(&retained_items);

    ContextPack {
        title: request.q.clone().unwrap_or_default(),
        hints,
        snippets,
        facts,
        configs,
        patterns,
        links,
        source: ContextPackSource {
            scope: request.scope.clone(),
            ids: retained_ids,
        },
    }
}

fn build_hints(items: &[&MemoryItem], n: usize) -> Vec<String> {
    let mut tag_counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        for tag in &item.facets.tags {
            *tag_counts.entry(tag.as_str()).or_insert(0) += 1;
        }
    }
    let mut tags: Vec<(&str, usize)> = tag_counts.into_iter().collect();
    tags.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let mut hints: Vec<String> = tags
        .into_iter()
        .take(n)
        .map(|(tag, _)| format!("tag:{tag}"))
        .collect();

    for item in items.iter().take(5) {
        if let Some(title) = &item.title {
            hints.push(format!("title:{title}"));
        }
    }
    hints
}

fn build_links(items: &[&MemoryItem]) -> Vec<LinkHint> {
    let mut links = Vec::new();
    for item in items {
        for link in &item.links {
            links.push(LinkHint {
                rel: format!("{:?}", link.rel).to_lowercase(),
                to: link.to.clone(),
                from_title: item.title.clone(),
            });
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextPackConfig;
    use crate::model::{Context, Facets, LineRange, Quality, Scope, Security};
    use chrono::Utc;

    fn item_with_code(id: &str, code: &str) -> MemoryItem {
        let now = Utc::now();
        MemoryItem {
            id: id.to_string(),
            item_type: ItemType::Snippet,
            scope: Scope::Global,
            title: Some(format!("title-{id}")),
            text: None,
            code: Some(code.to_string()),
            language: Some("rust".into()),
            facets: Facets::default(),
            context: None,
            quality: Quality::default(),
            security: Security::default(),
            vectors: None,
            links: vec![],
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    #[test]
    fn truncates_first_snippet_with_ellipsis_under_tight_budget() {
        let code = "x".repeat(2000);
        let items = vec![item_with_code("a", &code), item_with_code("b", &code)];
        let request = ContextPackRequest {
            scope: "project".into(),
            q: Some("x".into()),
            max_chars: Some(1500),
            ..Default::default()
        };
        let pack = assemble(&items, &request, &ContextPackConfig::default());

        let total: usize = pack.snippets.iter().map(|s| s.chars().count()).sum();
        assert!(total <= 1500);
        assert!(pack.snippets[0].ends_with("..."));
    }

    #[test]
    fn range_cropping_respects_window() {
        let mut item = item_with_code(
            "a",
            &(1..=40).map(|n| format!("line{n}")).collect::<Vec<_>>().join("\n"),
        );
        item.context = Some(Context {
            range: Some(LineRange { start: 20, end: 22 }),
            ..Default::default()
        });
        let request = ContextPackRequest {
            scope: "project".into(),
            ..Default::default()
        };
        let pack = assemble(&[item], &request, &ContextPackConfig::default());
        let snippet = &pack.snippets[0];
        assert!(snippet.contains("line14"));
        assert!(snippet.contains("line28"));
        assert!(!snippet.contains("line1\n"));
    }

    #[test]
    fn hints_rank_tags_by_frequency() {
        let mut a = item_with_code("a", "code-a");
        a.facets.tags = vec!["rust".into(), "async".into()];
        let mut b = item_with_code("b", "code-b");
        b.facets.tags = vec!["rust".into()];
        let request = ContextPackRequest {
            scope: "project".into(),
            ..Default::default()
        };
        let pack = assemble(&[a, b], &request, &ContextPackConfig::default());
        assert!(pack.hints.contains(&"tag:rust".to_string()));
    }

    #[test]
    fn file_patterns_match_via_glob_wildcards() {
        let mut item = item_with_code("a", "fn f() {}");
        item.facets.files = vec!["src/main.rs".into()];
        assert!(matches_file_patterns(&item, &Some(vec!["*.rs".into()])));
        assert!(!matches_file_patterns(&item, &Some(vec!["*.py".into()])));
        assert!(matches_file_patterns(&item, &Some(vec!["src/*.rs".into()])));
    }
}
