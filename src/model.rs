//! The durable data model: [`MemoryItem`], its catalog projection, and journal entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Which of the three independent stores an item lives in.
///
/// Immutable after creation: mutation never moves an item between scopes.
/// [`crate::manager::sync`] copies a new item into `Committed` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Global,
    Local,
    Committed,
}

impl Default for Scope {
    fn default() -> Self {
        Scope::Local
    }
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Local => "local",
            Scope::Committed => "committed",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope selector accepted by `list`/`query`: a single store, or a cross-scope merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeSelector {
    Global,
    Local,
    Committed,
    /// committed + local
    Project,
    /// committed + local + global
    All,
}

impl Default for ScopeSelector {
    fn default() -> Self {
        ScopeSelector::Project
    }
}

impl ScopeSelector {
    /// The concrete scopes this selector expands to, in merge priority order
    /// (first scope wins ties / is preferred by `get`'s probing order).
    pub fn scopes(&self) -> Vec<Scope> {
        match self {
            ScopeSelector::Global => vec![Scope::Global],
            ScopeSelector::Local => vec![Scope::Local],
            ScopeSelector::Committed => vec![Scope::Committed],
            ScopeSelector::Project => vec![Scope::Committed, Scope::Local],
            ScopeSelector::All => vec![Scope::Committed, Scope::Local, Scope::Global],
        }
    }
}

/// The kind of knowledge a [`MemoryItem`] captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Snippet,
    Pattern,
    Config,
    Insight,
    Runbook,
    Fact,
    Note,
}

impl Default for ItemType {
    fn default() -> Self {
        ItemType::Note
    }
}

/// Sensitivity of an item's content, used to gate the committed scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Public = 0,
    Team = 1,
    Private = 2,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Sensitivity::Private
    }
}

impl Sensitivity {
    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Sensitivity::Public => "public",
            Sensitivity::Team => "team",
            Sensitivity::Private => "private",
        };
        f.write_str(s)
    }
}

/// Kind of relationship a [`Link`] expresses between two items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkRel {
    Refines,
    Duplicates,
    Depends,
    Fixes,
    Relates,
}

/// A typed, directed reference from one item to another. Traversal is not part
/// of the core contract; a caller walking links must bound its own depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub rel: LinkRel,
    pub to: String,
}

/// Searchable facets attached to an item: tags, touched files, and symbols.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facets {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// 1-based inclusive line range within [`Context::file`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

/// Structured provenance metadata: where in a repository this item came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<LineRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
}

/// Usage-quality signals: confidence, reuse count, pin state, and an optional TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quality {
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub reuse_count: u64,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_confidence() -> f64 {
    0.75
}

impl Default for Quality {
    fn default() -> Self {
        Self {
            confidence: default_confidence(),
            reuse_count: 0,
            pinned: false,
            ttl_days: None,
            expires_at: None,
        }
    }
}

/// Sensitivity gate state plus the secret-redaction references accumulated
/// across upserts (the redaction heuristics themselves are out of scope; see
/// [`crate::redact`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Security {
    #[serde(default)]
    pub sensitivity: Sensitivity,
    #[serde(default)]
    pub secret_hash_refs: Vec<String>,
}

/// The durable unit of knowledge. See module docs for the full invariant list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub scope: Scope,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default)]
    pub facets: Facets,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub security: Security,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectors: Option<Vec<f32>>,

    #[serde(default)]
    pub links: Vec<Link>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl MemoryItem {
    /// Lowercased concatenation of title+text+code+tags, used by the query
    /// planner's substring safety net and by the BM25 tokenizer.
    pub fn searchable_blob(&self) -> String {
        let mut out = String::new();
        if let Some(t) = &self.title {
            out.push_str(t);
            out.push(' ');
        }
        if let Some(t) = &self.text {
            out.push_str(t);
            out.push(' ');
        }
        if let Some(t) = &self.code {
            out.push_str(t);
            out.push(' ');
        }
        out.push_str(&self.facets.tags.join(" "));
        out.to_lowercase()
    }

    pub fn to_summary(&self) -> MemoryItemSummary {
        MemoryItemSummary {
            id: self.id.clone(),
            item_type: self.item_type,
            scope: self.scope,
            title: self.title.clone(),
            tags: self.facets.tags.clone(),
            files: self.facets.files.clone(),
            symbols: self.facets.symbols.clone(),
            confidence: self.quality.confidence,
            pinned: self.quality.pinned,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// The catalog entry: a compact, search-oriented projection of a [`MemoryItem`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItemSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    pub confidence: f64,
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `catalog.json`: id → summary.
pub type Catalog = HashMap<String, MemoryItemSummary>;

/// The operation recorded by one line of `journal.ndjson`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalOp {
    Upsert,
    Delete,
}

/// One append-only journal line: either a full item (`upsert`) or a bare id
/// (`delete`), the journal being the durability boundary for both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub op: JournalOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<MemoryItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub ts: DateTime<Utc>,
    pub actor: String,
}

impl JournalEntry {
    /// The id this entry concerns, regardless of op kind.
    pub fn item_id(&self) -> Option<&str> {
        self.item
            .as_ref()
            .map(|i| i.id.as_str())
            .or(self.id.as_deref())
    }

    pub fn upsert(item: MemoryItem, actor: impl Into<String>) -> Self {
        Self {
            op: JournalOp::Upsert,
            ts: item.updated_at,
            item: Some(item),
            id: None,
            actor: actor.into(),
        }
    }

    pub fn delete(id: impl Into<String>, ts: DateTime<Utc>, actor: impl Into<String>) -> Self {
        Self {
            op: JournalOp::Delete,
            item: None,
            id: Some(id.into()),
            ts,
            actor: actor.into(),
        }
    }
}

/// `snapshot.json`: the last journal timestamp known to be materialized into
/// `catalog.json` + `index/`, with an optional checksum over those files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub last_ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// `state.ok`: written after a successful compaction, asserting a consistent
/// state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateOk {
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Free-form side map preserved verbatim across `config.json` rewrites, for
/// operator-added keys the typed config doesn't recognize yet.
pub type SideMap = serde_json::Map<String, Value>;
