// src/providers/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream a canonical item came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Hive,
    Cubecraft,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Hive => "hive",
            Provider::Cubecraft => "cubecraft",
        }
    }
}

/// Provider-agnostic roadmap entry.
///
/// `id` is non-empty and unique within one provider's result set. All
/// timestamps are instants; naive upstream strings never leave the mapper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalItem {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub status: String,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// When the entry is scheduled (Hive ETA) or was shipped (Cubecraft release date).
    pub released_at: Option<DateTime<Utc>>,
    pub url: String,
    pub content_html: String,
    pub content_text: String,
    pub upvotes: Option<i64>,
    pub pinned: Option<bool>,
    pub network: Option<String>,
    pub project_lead: Option<String>,
    /// Output page this item lands on (1-based).
    pub page: u32,
    pub source: Provider,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
    pub total_results: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoadmapPage {
    pub meta: PageMeta,
    pub items: Vec<CanonicalItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoadmapAggregate {
    pub column: String,
    pub pages: Vec<RoadmapPage>,
}

/// Caller's request against one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Logical column, lowercased.
    pub column: String,
    /// 1-based page number.
    pub page: u32,
    /// `field:dir`; `None` means the column default.
    pub sort_by: Option<String>,
    pub bypass_cache: bool,
    /// Hive only: include submissions still in review.
    pub in_review: bool,
    /// Hive only: include pinned submissions.
    pub include_pinned: bool,
}

impl Query {
    pub fn new(column: &str) -> Self {
        Self {
            column: column.trim().to_ascii_lowercase(),
            page: 1,
            sort_by: None,
            bypass_cache: false,
            in_review: false,
            include_pinned: true,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_sort(mut self, sort_by: impl Into<String>) -> Self {
        self.sort_by = Some(sort_by.into());
        self
    }

    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Result of a live upstream reachability check.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub ok: bool,
    pub status: u16,
    pub latency_ms: u64,
    pub items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
