//! [`MemoryManager`]: orchestrates per-scope stores and indexes, applies
//! cross-scope ranking, and owns the query cache.

pub mod query;
pub mod sync;

use crate::cache::{QueryCache, QueryCacheKey};
use crate::config::ConfigStore;
use crate::contextpack::{self, ContextPack, ContextPackRequest};
use crate::error::{Error, Result};
use crate::index::bm25::InvertedIndex;
use crate::index::vector::VectorIndex;
use crate::index::PendingIndexOps;
use crate::interfaces::{new_id, redact};
use crate::model::{
    Context, Facets, Link, LinkRel, MemoryItem, MemoryItemSummary, Quality, Scope, ScopeSelector,
    Security, Sensitivity,
};
use crate::paths::{self, ResolvedProject};
use crate::store::Store;
use chrono::Utc;
use query::{passes_filters, passes_substring_safety_net, MemoryQuery, QueryResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex as StdMutex;
use sync::{compute_status, SyncMergeResult, SyncMergeSkip, SyncStatus};
use tracing::{info, warn};

struct ScopeHandle {
    store: Store,
    bm25: InvertedIndex,
    vector: VectorIndex,
    config: ConfigStore,
    pending: PendingIndexOps,
}

impl ScopeHandle {
    fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let store = Store::new(dir);
        let live_ids = store.recover()?;
        let bm25 = InvertedIndex::new(dir);
        let vector = VectorIndex::new(dir);
        let config = ConfigStore::new(dir);

        let items: Vec<MemoryItem> = live_ids
            .iter()
            .filter_map(|id| store.read_item(id))
            .collect();
        bm25.rebuild_from_items(&items, config.get().ranking.field_weights)?;
        let vector_items: Vec<(String, Vec<f32>)> = items
            .iter()
            .filter_map(|i| i.vectors.clone().map(|v| (i.id.clone(), v)))
            .collect();
        if !vector_items.is_empty() {
            vector.set_bulk(vector_items, None)?;
        }

        Ok(Self {
            store,
            bm25,
            vector,
            config,
            pending: PendingIndexOps::new(),
        })
    }
}

/// Input to [`MemoryManager::upsert`]: a closed record rather than a bag of
/// optional fields, so callers can't pass contradictory or partial state.
#[derive(Debug, Clone, Default)]
pub struct UpsertInput {
    pub id: Option<String>,
    pub item_type: crate::model::ItemType,
    pub scope: Scope,
    pub title: Option<String>,
    pub text: Option<String>,
    pub code: Option<String>,
    pub language: Option<String>,
    pub facets: Facets,
    pub context: Option<Context>,
    pub sensitivity: Sensitivity,
    pub vectors: Option<Vec<f32>>,
    pub links: Vec<Link>,
}

/// Orchestrates the global/local/committed scopes: upsert/get/delete/list,
/// the cross-scope query planner, context-pack assembly, and sync.
pub struct MemoryManager {
    resolved: ResolvedProject,
    scopes: HashMap<Scope, ScopeHandle>,
    cache: QueryCache<QueryResult>,
    // Serializes upsert/delete so "read existing -> bump version -> write"
    // stays atomic with respect to concurrent mutations within this process;
    // cross-process safety still comes from the catalog/journal file locks.
    write_lock: StdMutex<()>,
}

impl MemoryManager {
    /// Resolve scope roots for `cwd` under the process's engine home
    /// (`~/.llm-memory`, or `$LLM_MEMORY_HOME`), then open and recover all
    /// three scopes.
    pub fn open(cwd: &Path) -> Result<Self> {
        Self::open_with_home(cwd, &paths::engine_home())
    }

    /// Same as [`Self::open`] but with an explicit engine home directory,
    /// so callers (tests, embedders running multiple managers in one
    /// process) don't need to mutate process-wide environment state.
    pub fn open_with_home(cwd: &Path, home: &Path) -> Result<Self> {
        let resolved = paths::resolve(cwd);
        info!(repo_id = %resolved.repo_id, root = %resolved.root.display(), "opening memory manager");

        let mut scopes = HashMap::new();
        scopes.insert(Scope::Global, ScopeHandle::open(&home.join("global"))?);
        scopes.insert(
            Scope::Local,
            ScopeHandle::open(&home.join("projects").join(&resolved.repo_id))?,
        );
        if resolved.has_committed_memory {
            scopes.insert(
                Scope::Committed,
                ScopeHandle::open(&paths::committed_dir(&resolved.root))?,
            );
        }

        Ok(Self {
            resolved,
            scopes,
            cache: QueryCache::new(256),
            write_lock: StdMutex::new(()),
        })
    }

    pub fn resolved_project(&self) -> &ResolvedProject {
        &self.resolved
    }

    /// `initCommitted`: ensure the committed scope exists and is open.
    pub fn init_committed(&mut self) -> Result<()> {
        let dir = paths::init_committed_memory(&self.resolved.root)?;
        self.resolved.has_committed_memory = true;
        self.scopes
            .entry(Scope::Committed)
            .or_insert(ScopeHandle::open(&dir)?);
        Ok(())
    }

    fn handle(&self, scope: Scope) -> Result<&ScopeHandle> {
        self.scopes
            .get(&scope)
            .ok_or_else(|| Error::NotFound(format!("scope {scope} not initialized")))
    }

    fn sensitivity_ceiling(&self, scope: Scope) -> Option<Sensitivity> {
        if scope != Scope::Committed {
            return None;
        }
        self.scopes
            .get(&Scope::Committed)
            .map(|h| h.config.get().sharing.sensitivity)
    }

    /// Upsert path: preserve `createdAt`/`reuseCount`,
    /// redact, bump version, enforce the committed sensitivity ceiling,
    /// write-through the store, then record (not yet flush) index updates.
    pub fn upsert(&self, input: UpsertInput) -> Result<MemoryItem> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let handle = self.handle(input.scope)?;

        let id = input.id.clone().unwrap_or_else(new_id);
        let existing = handle.store.read_item(&id);

        let (text, mut secret_refs) = match input.text {
            Some(t) => {
                let (redacted, refs) = redact(&t);
                (Some(redacted), refs)
            }
            None => (None, Vec::new()),
        };
        let (code, code_refs) = match input.code {
            Some(c) => {
                let (redacted, refs) = redact(&c);
                (Some(redacted), refs)
            }
            None => (None, Vec::new()),
        };
        secret_refs.extend(code_refs);

        let now = Utc::now();
        let created_at = existing.as_ref().map(|i| i.created_at).unwrap_or(now);
        let reuse_count = existing.as_ref().map(|i| i.quality.reuse_count).unwrap_or(0);
        let version = existing.as_ref().map(|i| i.version).unwrap_or(0) + 1;
        let mut security = Security {
            sensitivity: input.sensitivity,
            secret_hash_refs: existing
                .as_ref()
                .map(|i| i.security.secret_hash_refs.clone())
                .unwrap_or_default(),
        };
        security
            .secret_hash_refs
            .extend(secret_refs.into_iter().map(|r| r.0));

        let item = MemoryItem {
            id: id.clone(),
            item_type: input.item_type,
            scope: input.scope,
            title: input.title,
            text,
            code,
            language: input.language,
            facets: input.facets,
            context: input.context,
            quality: Quality {
                reuse_count,
                ..existing.as_ref().map(|i| i.quality.clone()).unwrap_or_default()
            },
            security,
            vectors: input.vectors,
            links: input.links,
            created_at,
            updated_at: now,
            version,
        };

        let ceiling = self.sensitivity_ceiling(input.scope);
        let compact_every = handle.config.get().maintenance.compact_every;
        let outcome = handle.store.write_item(&item, ceiling, compact_every)?;

        self.cache.invalidate_all();
        handle.pending.record_upsert(item.clone());

        if outcome.should_compact {
            if let Err(e) = handle.store.compact() {
                warn!(error = %e, scope = %input.scope, "scheduled compaction failed");
            }
        }

        Ok(item)
    }

    /// Delegate to the named scope, or probe `committed -> local -> global`.
    pub fn get(&self, id: &str, scope: Option<Scope>) -> Option<MemoryItem> {
        match scope {
            Some(scope) => self.scopes.get(&scope)?.store.read_item(id),
            None => ScopeSelector::All
                .scopes()
                .into_iter()
                .find_map(|scope| self.scopes.get(&scope)?.store.read_item(id)),
        }
    }

    pub fn delete(&self, id: &str, scope: Option<Scope>) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let scopes = scope
            .map(|s| vec![s])
            .unwrap_or_else(|| ScopeSelector::All.scopes());

        for scope in scopes {
            let Some(handle) = self.scopes.get(&scope) else {
                continue;
            };
            if handle.store.delete_item(id)? {
                self.cache.invalidate_all();
                handle.pending.record_delete(id);
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn list(&self, selector: ScopeSelector, limit: Option<usize>) -> Vec<MemoryItemSummary> {
        let mut merged: HashMap<String, MemoryItemSummary> = HashMap::new();
        for scope in selector.scopes() {
            let Some(handle) = self.scopes.get(&scope) else {
                continue;
            };
            for (id, summary) in handle.store.read_catalog() {
                merged.entry(id).or_insert(summary);
            }
        }
        let mut items: Vec<MemoryItemSummary> = merged.into_values().collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        items
    }

    fn scope_bonus(config: &crate::config::ScopeConfig, scope: Scope) -> f64 {
        match scope {
            Scope::Committed => config.ranking.scope_bonus.committed,
            Scope::Local => config.ranking.scope_bonus.local,
            Scope::Global => config.ranking.scope_bonus.global,
        }
    }

    /// The central query planner.
    pub fn query(&self, query: MemoryQuery) -> QueryResult {
        let cache_key = QueryCacheKey {
            q: query.q.clone(),
            scope: format!("{:?}", query.scope),
            item_type: query.filters.item_type.iter().map(|t| format!("{t:?}")).collect(),
            tags: query.filters.tags.clone(),
            files: query.filters.files.clone(),
            symbols: query.filters.symbols.clone(),
            language: query.filters.language.clone(),
            k: query.k,
        };
        if let Some(hit) = self.cache.get(&cache_key) {
            return hit;
        }

        let mut scored: Vec<(f64, MemoryItem)> = Vec::new();

        for scope in query.scope.scopes() {
            let Some(handle) = self.scopes.get(&scope) else {
                continue;
            };
            let config = handle.config.get();
            let catalog = handle.store.read_catalog();

            let mut candidate_scores: HashMap<String, f64> = HashMap::new();

            if let Some(q) = &query.q {
                let ranking = config.ranking.clone();
                let scope_bonus_value = Self::scope_bonus(&config, scope);
                let bm25_hits = handle.bm25.search(q, ranking.bm25, |id| {
                    let pinned = catalog.get(id).map(|s| s.pinned).unwrap_or(false);
                    let age_days = catalog
                        .get(id)
                        .map(|s| (Utc::now() - s.updated_at).num_seconds() as f64 / 86_400.0)
                        .unwrap_or(0.0);
                    query::recency_and_scope_boost(
                        scope,
                        scope_bonus_value,
                        pinned,
                        ranking.pin_bonus,
                        ranking.recency_scale,
                        ranking.half_life_days,
                        age_days.max(0.0),
                    )
                });
                for (id, score) in bm25_hits {
                    candidate_scores.insert(id, score);
                }

                if let Some(vector) = &query.vector {
                    if ranking.hybrid.enabled {
                        let vec_hits = handle.vector.search(vector, query.k.max(50));
                        let max_bm25 = candidate_scores
                            .values()
                            .cloned()
                            .fold(0.0_f64, f64::max)
                            .max(1.0);
                        for (id, cos) in vec_hits {
                            let bm25_component =
                                candidate_scores.get(&id).copied().unwrap_or(0.0) / max_bm25;
                            let blended = ranking.hybrid.w_bm25 * bm25_component
                                + ranking.hybrid.w_vec * cos as f64;
                            candidate_scores
                                .entry(id)
                                .and_modify(|s| *s = blended)
                                .or_insert(blended);
                        }
                    }
                }
            } else if let Some(vector) = &query.vector {
                for (id, cos) in handle.vector.search(vector, query.k.max(50)) {
                    candidate_scores.insert(id, cos as f64);
                }
            } else {
                for id in catalog.keys() {
                    candidate_scores.insert(id.clone(), 0.0);
                }
            }

            for (id, mut score) in candidate_scores {
                let Some(item) = handle.store.read_item(&id) else {
                    continue;
                };
                if !passes_filters(&item, &query.filters) {
                    continue;
                }
                if let Some(q) = &query.q {
                    if !passes_substring_safety_net(&item, q) {
                        continue;
                    }
                    score += phrase_bonus(&item, q, &config.ranking.phrase);
                }
                scored.push((score, item));
            }
        }

        let total = scored.len();
        if query.q.is_some() || query.vector.is_some() {
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.1.updated_at.cmp(&a.1.updated_at))
            });
        } else {
            scored.sort_by(|a, b| b.1.updated_at.cmp(&a.1.updated_at));
        }
        scored.truncate(query.k);

        let result = QueryResult {
            items: scored.into_iter().map(|(_, item)| item).collect(),
            total,
            scope: query.scope,
        };
        self.cache.put(cache_key, result.clone());
        result
    }

    pub fn link(&self, from: &str, rel: LinkRel, to: &str) -> Result<()> {
        self.mutate_item(from, |item| item.links.push(Link { rel, to: to.to_string() }))
    }

    pub fn set_pinned(&self, id: &str, pinned: bool) -> Result<()> {
        self.mutate_item(id, |item| item.quality.pinned = pinned)
    }

    pub fn tag(&self, id: &str, add: Vec<String>, remove: Vec<String>) -> Result<()> {
        self.mutate_item(id, |item| {
            item.facets.tags.retain(|t| !remove.contains(t));
            for tag in add {
                if !item.facets.tags.contains(&tag) {
                    item.facets.tags.push(tag);
                }
            }
        })
    }

    fn mutate_item(&self, id: &str, f: impl FnOnce(&mut MemoryItem)) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let scope = ScopeSelector::All
            .scopes()
            .into_iter()
            .find(|s| self.scopes.get(s).map(|h| h.store.read_item(id).is_some()).unwrap_or(false))
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let handle = self.handle(scope)?;
        let mut item = handle
            .store
            .read_item(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        f(&mut item);
        item.updated_at = Utc::now();
        item.version += 1;

        let ceiling = self.sensitivity_ceiling(scope);
        let compact_every = handle.config.get().maintenance.compact_every;
        let outcome = handle.store.write_item(&item, ceiling, compact_every)?;
        self.cache.invalidate_all();
        handle.pending.record_upsert(item);
        if outcome.should_compact {
            if let Err(e) = handle.store.compact() {
                warn!(error = %e, "scheduled compaction failed");
            }
        }
        Ok(())
    }

    pub fn context_pack(&self, request: ContextPackRequest, query: MemoryQuery) -> ContextPack {
        let result = self.query(query);
        let config = self
            .scopes
            .get(&result.scope.scopes()[0])
            .map(|h| h.config.get().context_pack)
            .unwrap_or_default();
        contextpack::assemble(&result.items, &request, &config)
    }

    pub fn sync_status(&self) -> Result<SyncStatus> {
        let local = self.handle(Scope::Local)?.store.read_catalog();
        let committed = self.handle(Scope::Committed)?.store.read_catalog();
        Ok(compute_status(&local, &committed))
    }

    pub fn sync_merge(&self, ids: Option<Vec<String>>) -> Result<SyncMergeResult> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let local_handle = self.handle(Scope::Local)?;
        let target_ids = ids.unwrap_or_else(|| local_handle.store.read_catalog().into_keys().collect());

        let ceiling = self
            .sensitivity_ceiling(Scope::Committed)
            .unwrap_or(Sensitivity::Team);

        let mut result = SyncMergeResult::default();
        for id in target_ids {
            let Some(item) = local_handle.store.read_item(&id) else {
                result.skipped.push(SyncMergeSkip {
                    id,
                    reason: "not found in local scope".into(),
                });
                continue;
            };
            if item.security.sensitivity > ceiling {
                result.skipped.push(SyncMergeSkip {
                    id,
                    reason: format!(
                        "sensitivity {} exceeds committed ceiling {}",
                        item.security.sensitivity, ceiling
                    ),
                });
                continue;
            }

            let committed_handle = self.handle(Scope::Committed)?;
            let existing = committed_handle.store.read_item(&id);
            let mut merged = item.clone();
            merged.scope = Scope::Committed;
            merged.version = existing.map(|e| e.version).unwrap_or(0) + 1;
            merged.updated_at = Utc::now();

            committed_handle
                .store
                .write_item(&merged, Some(ceiling), committed_handle.config.get().maintenance.compact_every)?;
            committed_handle.pending.record_upsert(merged);
            result.merged.push(id);
        }

        self.cache.invalidate_all();
        Ok(result)
    }

    pub fn rebuild(&self, selector: ScopeSelector) -> Result<()> {
        for scope in selector.scopes() {
            let Some(handle) = self.scopes.get(&scope) else {
                continue;
            };
            handle.store.rebuild_catalog()?;
            let items = handle.store.list_items();
            handle
                .bm25
                .rebuild_from_items(&items, handle.config.get().ranking.field_weights)?;
            let vectors: Vec<(String, Vec<f32>)> = items
                .iter()
                .filter_map(|i| i.vectors.clone().map(|v| (i.id.clone(), v)))
                .collect();
            if !vectors.is_empty() {
                handle.vector.set_bulk(vectors, None)?;
            }
        }
        self.cache.invalidate_all();
        Ok(())
    }

    pub fn replay(&self, scope: Scope, compact: bool) -> Result<()> {
        let handle = self.handle(scope)?;
        handle.store.recover()?;
        if compact {
            handle.store.compact()?;
        }
        self.cache.invalidate_all();
        Ok(())
    }

    pub fn compact(&self, scope: Scope) -> Result<()> {
        self.handle(scope)?.store.compact()
    }

    pub fn snapshot(&self, scope: Scope) -> Result<()> {
        let handle = self.handle(scope)?;
        let entries = handle.store.read_journal(None);
        let last_ts = entries
            .iter()
            .map(|e| e.ts)
            .max()
            .unwrap_or_else(Utc::now);
        handle.store.write_snapshot_meta(&crate::model::SnapshotMeta {
            last_ts,
            checksum: None,
        })
    }

    /// Flush any pending index ops for `scope`, then report whether the
    /// catalog and on-disk items agree (every catalog id has an item file and
    /// vice versa).
    pub fn verify(&self, scope: Scope) -> Result<bool> {
        let handle = self.handle(scope)?;
        handle.pending.flush(
            &handle.bm25,
            handle.config.get().ranking.field_weights,
            &handle.vector,
        )?;

        let catalog_ids: std::collections::HashSet<String> =
            handle.store.read_catalog().into_keys().collect();
        let item_ids: std::collections::HashSet<String> =
            handle.store.list_items().into_iter().map(|i| i.id).collect();
        Ok(catalog_ids == item_ids)
    }

    /// Flush pending index ops for every scope that has crossed either
    /// threshold; called by the maintenance scheduler's timer.
    pub fn flush_due_indexes(&self, max_ops: u64) -> Result<()> {
        for handle in self.scopes.values() {
            if handle.pending.should_flush(max_ops) || !handle.pending.is_empty() {
                handle.pending.flush(
                    &handle.bm25,
                    handle.config.get().ranking.field_weights,
                    &handle.vector,
                )?;
            }
        }
        Ok(())
    }
}

fn phrase_bonus(item: &MemoryItem, q: &str, phrase: &crate::config::PhraseBonus) -> f64 {
    let q_lower = q.to_lowercase();
    let mut bonus = 0.0;
    if let Some(title) = &item.title {
        let title_lower = title.to_lowercase();
        if title_lower == q_lower {
            bonus += phrase.exact_title_bonus;
        } else if title_lower.contains(&q_lower) {
            bonus += phrase.bonus * 1.5;
        }
    }
    if let Some(text) = &item.text {
        if text.to_lowercase().contains(&q_lower) {
            bonus += phrase.bonus;
        }
    }
    if let Some(code) = &item.code {
        if code.to_lowercase().contains(&q_lower) {
            bonus += phrase.bonus * 0.75;
        }
    }
    bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemType;

    fn manager(dir: &Path) -> MemoryManager {
        let home = dir.join("home");
        let mut manager = MemoryManager::open_with_home(dir, &home).unwrap();
        manager.init_committed().unwrap();
        manager
    }

    fn input(scope: Scope, title: &str, text: &str) -> UpsertInput {
        UpsertInput {
            id: None,
            item_type: ItemType::Snippet,
            scope,
            title: Some(title.to_string()),
            text: Some(text.to_string()),
            code: None,
            language: None,
            facets: Facets::default(),
            context: None,
            sensitivity: Sensitivity::Public,
            vectors: None,
            links: vec![],
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let item = manager.upsert(input(Scope::Global, "hello", "world")).unwrap();
        assert_eq!(item.version, 1);

        let fetched = manager.get(&item.id, Some(Scope::Global)).unwrap();
        assert_eq!(fetched.text.as_deref(), Some("world"));
    }

    #[test]
    fn committed_sensitivity_gate_rejects_private_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let mut upsert = input(Scope::Committed, "secret", "shh");
        upsert.sensitivity = Sensitivity::Private;
        let err = manager.upsert(upsert).unwrap_err();
        assert!(matches!(err, Error::SensitivityPolicy { .. }));

        let mut ok_upsert = input(Scope::Committed, "ok", "fine");
        ok_upsert.sensitivity = Sensitivity::Team;
        assert!(manager.upsert(ok_upsert).is_ok());
    }

    #[test]
    fn pinning_boosts_rank_above_bm25_gap() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let a = manager.upsert(input(Scope::Global, "alpha beta", "")).unwrap();
        let b = manager
            .upsert(input(Scope::Global, "alpha", "beta beta beta"))
            .unwrap();
        manager.flush_due_indexes(0).unwrap();

        let q = crate::manager::query::MemoryQuery {
            q: Some("beta".into()),
            scope: ScopeSelector::Global,
            ..Default::default()
        };
        let before = manager.query(q.clone());
        assert_eq!(before.items[0].id, b.id);

        manager.set_pinned(&a.id, true).unwrap();
        manager.flush_due_indexes(0).unwrap();
        let after = manager.query(q);
        assert_eq!(after.items[0].id, a.id);
    }

    #[test]
    fn sync_merge_moves_local_items_into_committed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.upsert(input(Scope::Local, "a", "a")).unwrap();
        manager.upsert(input(Scope::Local, "b", "b")).unwrap();
        manager.upsert(input(Scope::Local, "c", "c")).unwrap();

        let status = manager.sync_status().unwrap();
        assert_eq!(status.only_local.len(), 3);

        let merge = manager.sync_merge(None).unwrap();
        assert_eq!(merge.merged.len(), 3);
        assert!(merge.skipped.is_empty());

        let status = manager.sync_status().unwrap();
        assert!(status.only_local.is_empty());
        assert!(status.only_committed.is_empty());
    }
}
