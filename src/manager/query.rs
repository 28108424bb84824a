//! Query input/output types and the filter predicate.

use crate::model::{ItemType, MemoryItem, Scope, ScopeSelector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfidenceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilters {
    #[serde(default)]
    pub item_type: Vec<ItemType>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub language: Vec<String>,
    pub pinned: Option<bool>,
    pub confidence: Option<ConfidenceRange>,
    pub time_range: Option<TimeRange>,
}

#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub q: Option<String>,
    pub scope: ScopeSelector,
    pub k: usize,
    pub filters: QueryFilters,
    pub vector: Option<Vec<f32>>,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            q: None,
            scope: ScopeSelector::default(),
            k: 50,
            filters: QueryFilters::default(),
            vector: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub items: Vec<MemoryItem>,
    pub total: usize,
    pub scope: ScopeSelector,
}

/// All filter clauses are AND-combined; an empty/`None` clause always passes.
pub fn passes_filters(item: &MemoryItem, filters: &QueryFilters) -> bool {
    if !filters.item_type.is_empty() && !filters.item_type.contains(&item.item_type) {
        return false;
    }
    if !filters.tags.is_empty() && !filters.tags.iter().any(|t| item.facets.tags.contains(t)) {
        return false;
    }
    if !filters.files.is_empty() {
        let context_file = item.context.as_ref().and_then(|c| c.file.as_deref());
        let matches = filters
            .files
            .iter()
            .any(|f| item.facets.files.contains(f) || context_file == Some(f.as_str()));
        if !matches {
            return false;
        }
    }
    if !filters.symbols.is_empty() && !filters.symbols.iter().any(|s| item.facets.symbols.contains(s)) {
        return false;
    }
    if !filters.language.is_empty() {
        let matches = item
            .language
            .as_deref()
            .map(|l| filters.language.iter().any(|f| f.eq_ignore_ascii_case(l)))
            .unwrap_or(false);
        if !matches {
            return false;
        }
    }
    if let Some(pinned) = filters.pinned {
        if item.quality.pinned != pinned {
            return false;
        }
    }
    if let Some(confidence) = &filters.confidence {
        if let Some(min) = confidence.min {
            if item.quality.confidence < min {
                return false;
            }
        }
        if let Some(max) = confidence.max {
            if item.quality.confidence > max {
                return false;
            }
        }
    }
    if let Some(range) = &filters.time_range {
        if let Some(start) = range.start {
            if item.updated_at < start {
                return false;
            }
        }
        if let Some(end) = range.end {
            if item.updated_at > end {
                return false;
            }
        }
    }
    true
}

/// The substring safety net above index recall: drop items whose
/// lowercased `title+text+code+tags` doesn't contain `q`.
pub fn passes_substring_safety_net(item: &MemoryItem, q: &str) -> bool {
    item.searchable_blob().contains(&q.to_lowercase())
}

/// Scope bonus + pin bonus + recency decay, applied as a BM25 `boost(id)`.
pub fn recency_and_scope_boost(
    scope: Scope,
    scope_bonus: f64,
    pinned: bool,
    pin_bonus: f64,
    recency_scale: f64,
    half_life_days: f64,
    age_days: f64,
) -> f64 {
    let _ = scope;
    let pin = if pinned { pin_bonus } else { 0.0 };
    let recency = recency_scale * (-age_days / half_life_days).exp();
    scope_bonus + pin + recency
}
