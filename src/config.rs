//! Per-scope `config.json`: ranking/maintenance/sharing/context-pack
//! preferences, plus a free-form side map for unknown keys. Hot-reloaded
//! via a `notify` watcher.

use crate::error::{Error, Result};
use crate::index::bm25::{Bm25Params, FieldWeights};
use crate::model::{Sensitivity, SideMap};
use crate::store::atomic::{read_json_lenient, write_json_atomic};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default)]
    pub bm25: Bm25Params,
    #[serde(default)]
    pub field_weights: FieldWeights,
    #[serde(default)]
    pub scope_bonus: ScopeBonus,
    #[serde(default = "default_pin_bonus")]
    pub pin_bonus: f64,
    #[serde(default = "default_recency_scale")]
    pub recency_scale: f64,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
    #[serde(default)]
    pub phrase: PhraseBonus,
    #[serde(default)]
    pub hybrid: HybridConfig,
}

fn default_pin_bonus() -> f64 {
    2.0
}
fn default_recency_scale() -> f64 {
    1.0
}
fn default_half_life_days() -> f64 {
    30.0
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            bm25: Bm25Params::default(),
            field_weights: FieldWeights::default(),
            scope_bonus: ScopeBonus::default(),
            pin_bonus: default_pin_bonus(),
            recency_scale: default_recency_scale(),
            half_life_days: default_half_life_days(),
            phrase: PhraseBonus::default(),
            hybrid: HybridConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScopeBonus {
    pub committed: f64,
    pub local: f64,
    pub global: f64,
}

impl Default for ScopeBonus {
    fn default() -> Self {
        Self {
            committed: 1.0,
            local: 0.5,
            global: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhraseBonus {
    pub bonus: f64,
    pub exact_title_bonus: f64,
}

impl Default for PhraseBonus {
    fn default() -> Self {
        Self {
            bonus: 2.5,
            exact_title_bonus: 6.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridConfig {
    pub enabled: bool,
    pub w_bm25: f64,
    pub w_vec: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            w_bm25: 0.7,
            w_vec: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_compact_every")]
    pub compact_every: u64,
    #[serde(default = "default_compact_interval_ms")]
    pub compact_interval_ms: u64,
    #[serde(default)]
    pub index_flush: IndexFlushConfig,
}

fn default_compact_every() -> u64 {
    500
}
fn default_compact_interval_ms() -> u64 {
    24 * 60 * 60 * 1000
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            compact_every: default_compact_every(),
            compact_interval_ms: default_compact_interval_ms(),
            index_flush: IndexFlushConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexFlushConfig {
    pub max_ms: u64,
    pub max_ops: u64,
}

impl Default for IndexFlushConfig {
    fn default() -> Self {
        Self {
            max_ms: 500,
            max_ops: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SharingConfig {
    #[serde(default = "default_sensitivity_ceiling")]
    pub sensitivity: Sensitivity,
}

fn default_sensitivity_ceiling() -> Sensitivity {
    Sensitivity::Team
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPackConfig {
    #[serde(default = "default_caps")]
    pub caps: ContextPackCaps,
    #[serde(default = "default_order")]
    pub order: Vec<String>,
    #[serde(default = "default_snippet_window")]
    pub snippet_window: SnippetWindow,
    #[serde(default = "default_hints_n")]
    pub hints_n: usize,
}

fn default_caps() -> ContextPackCaps {
    ContextPackCaps::default()
}
fn default_order() -> Vec<String> {
    vec![
        "snippets".into(),
        "facts".into(),
        "patterns".into(),
        "configs".into(),
    ]
}
fn default_snippet_window() -> SnippetWindow {
    SnippetWindow::default()
}
fn default_hints_n() -> usize {
    8
}

impl Default for ContextPackConfig {
    fn default() -> Self {
        Self {
            caps: default_caps(),
            order: default_order(),
            snippet_window: default_snippet_window(),
            hints_n: default_hints_n(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextPackCaps {
    pub snippets: usize,
    pub facts: usize,
    pub patterns: usize,
    pub configs: usize,
}

impl Default for ContextPackCaps {
    fn default() -> Self {
        Self {
            snippets: 12,
            facts: 8,
            patterns: 6,
            configs: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SnippetWindow {
    pub before: u32,
    pub after: u32,
}

impl Default for SnippetWindow {
    fn default() -> Self {
        Self {
            before: 6,
            after: 6,
        }
    }
}

/// The typed `config.json` contents for one scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub sharing: SharingConfig,
    #[serde(default)]
    pub context_pack: ContextPackConfig,
    /// Unknown keys round-trip verbatim on rewrite.
    #[serde(flatten)]
    pub unknown: SideMap,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            ranking: RankingConfig::default(),
            maintenance: MaintenanceConfig::default(),
            sharing: SharingConfig::default(),
            context_pack: ContextPackConfig::default(),
            unknown: SideMap::new(),
        }
    }
}

/// Owns a scope's `config.json`, an in-memory cached copy, and (optionally) a
/// `notify` watcher that hot-reloads on external edits.
pub struct ConfigStore {
    path: PathBuf,
    tmp_dir: PathBuf,
    current: Arc<RwLock<ScopeConfig>>,
    _watcher: Option<RecommendedWatcher>,
}

impl ConfigStore {
    pub fn new(scope_dir: &Path) -> Self {
        let path = scope_dir.join("config.json");
        let config = read_json_lenient(&path).unwrap_or_default();
        Self {
            path,
            tmp_dir: scope_dir.join("tmp"),
            current: Arc::new(RwLock::new(config)),
            _watcher: None,
        }
    }

    pub fn get(&self) -> ScopeConfig {
        self.current.read().clone()
    }

    /// Validate then persist; on parse/validation failure the previous valid
    /// config is retained and a `ConfigInvalid` error returned.
    pub fn set(&self, config: ScopeConfig) -> Result<()> {
        validate(&config)?;
        write_json_atomic(&self.tmp_dir, &self.path, &config)?;
        *self.current.write() = config;
        Ok(())
    }

    /// Start watching `config.json` for external edits, reloading the cached
    /// copy on each change event. Debounced implicitly by `notify`'s event
    /// coalescing; malformed rewrites are logged and ignored, keeping the
    /// last good config in memory.
    pub fn watch(&mut self) -> Result<()> {
        let path = self.path.clone();
        let current = self.current.clone();
        let (tx, mut rx) = mpsc::channel(16);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = tx.blocking_send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| Error::Internal(format!("failed to create config watcher: {e}")))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            watcher
                .watch(parent, RecursiveMode::NonRecursive)
                .map_err(|e| Error::Internal(format!("failed to watch config dir: {e}")))?;
        }

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }
                if !event.paths.iter().any(|p| p == &path) {
                    continue;
                }
                match read_json_lenient::<ScopeConfig>(&path) {
                    Some(reloaded) => {
                        info!(path = %path.display(), "reloaded config after external edit");
                        *current.write() = reloaded;
                    }
                    None => {
                        warn!(path = %path.display(), "config edit unparsable, keeping previous config");
                    }
                }
            }
        });

        self._watcher = Some(watcher);
        Ok(())
    }
}

fn validate(config: &ScopeConfig) -> Result<()> {
    if config.ranking.bm25.k1 < 0.0 {
        return Err(Error::ConfigInvalid("ranking.bm25.k1 must be >= 0".into()));
    }
    if !(0.0..=1.0).contains(&config.ranking.bm25.b) {
        return Err(Error::ConfigInvalid("ranking.bm25.b must be in [0,1]".into()));
    }
    if config.maintenance.compact_every == 0 {
        return Err(Error::ConfigInvalid(
            "maintenance.compactEvery must be > 0".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let config = store.get();
        assert_eq!(config.maintenance.compact_every, 500);
        assert_eq!(config.sharing.sensitivity, Sensitivity::Team);
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut config = store.get();
        config.ranking.pin_bonus = 5.0;
        store.set(config).unwrap();
        assert_eq!(store.get().ranking.pin_bonus, 5.0);
    }

    #[test]
    fn invalid_config_is_rejected_and_previous_retained() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut config = store.get();
        config.maintenance.compact_every = 0;
        let err = store.set(config).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
        assert_eq!(store.get().maintenance.compact_every, 500);
    }

    #[test]
    fn unknown_keys_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"futureFeature": {"enabled": true}}"#).unwrap();
        let store = ConfigStore::new(dir.path());
        let config = store.get();
        assert!(config.unknown.contains_key("futureFeature"));
        store.set(config).unwrap();
        let reloaded: ScopeConfig = read_json_lenient(&path).unwrap();
        assert!(reloaded.unknown.contains_key("futureFeature"));
    }
}
