//! Cubecraft roadmap, served from a public Notion board.
//!
//! Notion returns the whole collection in one `queryCollection` payload, so
//! there is no upstream pagination: the bulk result is decoded once, cached in
//! canonical form, and filtered/sorted/paginated locally.
//!
//! Notion properties are nested generic arrays. Each one is decoded into a
//! [`PropertyValue`] with a fixed rule:
//! - `[[text, [["d", {"start_date": ..}], ..]], ..]` is a **Date**: the start
//!   date of the first range.
//! - `[[text, ..], ..]` otherwise is **Text**: the first text run.
//! - anything else is **Unsupported** and the property is ignored.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};

use super::hive::probe_failed;
use super::types::{CanonicalItem, ProbeReport, Provider};
use super::{note_skipped, parse_instant, read_body_capped, RecordError};
use crate::cache::ResponseCache;
use crate::error::{FeedError, FeedResult};
use crate::paginate::{SortDirection, SortField, SortSpec};

pub const DEFAULT_ENDPOINT: &str =
    "https://cubecraft.notion.site/api/v3/queryCollection?src=initial_load";
pub const SITE_BASE_URL: &str = "https://cubecraft.notion.site/e86c96a3ee78465d8e5c24c22489c094";
pub const PAGE_SIZE: u32 = 10;
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 << 20;

const PROVIDER: &str = "cubecraft";
const CACHE_KEY: &str = "collection";
const COLLECTION_ID: &str = "d14e867c-526a-4627-ad4f-1f56fdee77d6";
const COLLECTION_VIEW_ID: &str = "79bd3042-c1cf-42aa-9d4e-d81a3043c505";
const SPACE_ID: &str = "2a7d9973-2a91-430b-9d0f-520163f17777";
const CLIENT_VERSION: &str = "23.13.0.5155";

const STATUS_PROP: &str = "3E6J";
const RELEASED_AT_PROP: &str = "?igY";

/// Logical column → Notion status values.
const COLUMNS: &[(&str, &[&str])] = &[
    ("in-progress", &["In Progress"]),
    ("coming-next", &["Testing"]),
    ("released", &["Released"]),
];

/// Notion property id → readable name.
const PROPERTY_NAMES: &[(&str, &str)] = &[
    ("3E6J", "status"),
    ("@@W>", "network"),
    ("K:rY", "category"),
    ("\\wxR", "projectLead"),
    ("^NHI", "releasePost"),
    ("?igY", "releasedAt"),
    ("title", "title"),
];

pub fn native_statuses(column: &str) -> FeedResult<&'static [&'static str]> {
    let col = column.trim().to_ascii_lowercase();
    COLUMNS
        .iter()
        .find(|(name, _)| *name == col)
        .map(|(_, statuses)| *statuses)
        .ok_or_else(|| {
            FeedError::InvalidQuery(format!(
                "unknown column {column:?}; must be one of [in-progress, coming-next, released]"
            ))
        })
}

pub fn columns() -> BTreeMap<String, String> {
    COLUMNS
        .iter()
        .map(|(c, _)| (c.to_string(), format!("notion:{c}")))
        .collect()
}

/// Display label for a Notion status.
pub fn status_label(native: &str) -> &str {
    match native {
        "Testing" => "Coming Next...",
        other => other,
    }
}

/// Sort used when the caller gives none (or an unknown one).
pub fn default_sort(column: &str) -> SortSpec {
    match column {
        "released" => SortSpec::new(SortField::ReleasedAt, SortDirection::Desc),
        "in-progress" | "coming-next" => SortSpec::new(SortField::LastUpdated, SortDirection::Desc),
        _ => SortSpec::new(SortField::Title, SortDirection::Asc),
    }
}

fn property_name(key: &str) -> &str {
    PROPERTY_NAMES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .unwrap_or(key)
}

// --- property decoding ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Text(String),
    /// `start_date` of the first date range, as written by Notion.
    Date(String),
    Unsupported,
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) | PropertyValue::Date(s) => Some(s),
            PropertyValue::Unsupported => None,
        }
    }
}

pub fn decode_property(raw: &Value) -> PropertyValue {
    let Some(cell) = raw.get(0).and_then(Value::as_array) else {
        return PropertyValue::Unsupported;
    };

    let start_date = cell
        .get(1)
        .and_then(|annotations| annotations.get(0))
        .and_then(|pair| pair.get(1))
        .and_then(|attrs| attrs.get("start_date"))
        .and_then(Value::as_str);
    if let Some(date) = start_date {
        return PropertyValue::Date(date.to_string());
    }

    match cell.first().and_then(Value::as_str) {
        Some(text) => PropertyValue::Text(text.to_string()),
        None => PropertyValue::Unsupported,
    }
}

// --- block decoding ---

#[derive(Debug, Deserialize)]
struct RecordMapResponse {
    #[serde(rename = "recordMap")]
    record_map: RecordMap,
}

#[derive(Debug, Deserialize)]
struct RecordMap {
    #[serde(default)]
    block: BTreeMap<String, Value>,
}

/// Notion wraps block values either once or twice depending on API version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BlockEnvelope {
    Nested { value: Wrapped },
    Flat { value: BlockValue },
}

#[derive(Debug, Deserialize)]
struct Wrapped {
    value: BlockValue,
}

#[derive(Debug, Deserialize)]
struct BlockValue {
    #[serde(default)]
    parent_table: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
    #[serde(default)]
    created_time: Option<i64>,
    #[serde(default)]
    last_edited_time: Option<i64>,
}

impl BlockEnvelope {
    fn into_value(self) -> BlockValue {
        match self {
            BlockEnvelope::Nested { value } => value.value,
            BlockEnvelope::Flat { value } => value,
        }
    }
}

fn millis(field: &'static str, ms: i64) -> Result<DateTime<Utc>, RecordError> {
    DateTime::from_timestamp_millis(ms).ok_or(RecordError::Timestamp {
        field,
        value: ms.to_string(),
    })
}

fn detail_url(block_id: &str) -> String {
    format!(
        "{SITE_BASE_URL}?v={}&p={}&pm=s",
        COLLECTION_VIEW_ID.replace('-', ""),
        block_id.replace('-', "")
    )
}

/// Map one block. `Ok(None)` for blocks that are not collection rows.
fn map_block(id: &str, raw: &Value) -> Result<Option<CanonicalItem>, RecordError> {
    let block = BlockEnvelope::deserialize(raw)
        .map_err(|e| RecordError::Shape(e.to_string()))?
        .into_value();
    if block.parent_table.as_deref() != Some("collection") {
        return Ok(None);
    }
    if id.trim().is_empty() {
        return Err(RecordError::Missing("id"));
    }

    let created_at = millis(
        "created_time",
        block.created_time.ok_or(RecordError::Missing("created_time"))?,
    )?;
    let last_modified = match block.last_edited_time {
        Some(ms) => millis("last_edited_time", ms)?,
        None => created_at,
    };

    let mut props: BTreeMap<&str, PropertyValue> = BTreeMap::new();
    for (key, value) in &block.properties {
        match decode_property(value) {
            PropertyValue::Unsupported => {}
            decoded => {
                props.insert(property_name(key), decoded);
            }
        }
    }
    let text = |name: &str| {
        props
            .get(name)
            .and_then(PropertyValue::as_text)
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    };

    let native_status = text(property_name(STATUS_PROP)).unwrap_or_default();
    let released_at = text(property_name(RELEASED_AT_PROP))
        .as_deref()
        .and_then(parse_instant);

    Ok(Some(CanonicalItem {
        id: id.to_string(),
        slug: id.to_string(),
        title: text("title").unwrap_or_default(),
        status: status_label(&native_status).to_string(),
        category: text("category"),
        created_at,
        last_modified,
        released_at,
        url: detail_url(id),
        content_html: String::new(),
        content_text: String::new(),
        upvotes: None,
        pinned: None,
        network: text("network"),
        project_lead: text("projectLead"),
        page: 1,
        source: Provider::Cubecraft,
    }))
}

/// Decode a `queryCollection` body into canonical cards, ordered by block id.
///
/// A body that is not a record map fails the whole fetch; a bad block is skipped.
pub fn map_collection(body: &[u8]) -> FeedResult<Vec<CanonicalItem>> {
    let resp: RecordMapResponse = serde_json::from_slice(body).map_err(FeedError::from_decode)?;
    let mut items = Vec::with_capacity(resp.record_map.block.len());
    for (id, raw) in &resp.record_map.block {
        match map_block(id, raw) {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => note_skipped(PROVIDER, id, &e),
        }
    }
    Ok(items)
}

fn query_payload() -> Value {
    let group = |value: Option<&str>, hidden: bool| {
        let mut v = json!({ "type": "select" });
        if let Some(value) = value {
            v["value"] = json!(value);
        }
        json!({ "value": v, "hidden": hidden, "property": STATUS_PROP })
    };
    json!({
        "source": { "type": "collection", "id": COLLECTION_ID, "spaceId": SPACE_ID },
        "collectionView": { "id": COLLECTION_VIEW_ID, "spaceId": SPACE_ID },
        "loader": {
            "reducers": {
                "board_columns": {
                    "type": "groups",
                    "version": "v2",
                    "returnPinnedGroups": true,
                    "groupBy": { "sort": { "type": "manual" }, "type": "select", "property": STATUS_PROP },
                    "groupSortPreference": [
                        group(Some("Information"), false),
                        group(Some("In Progress"), false),
                        group(Some("Testing"), false),
                        group(Some("Released"), false),
                        group(Some("Scrapped"), true),
                        group(Some("BLOCKED"), true),
                        group(None, true),
                    ],
                    "limit": 10,
                    "aggregation": { "type": "independent", "groupAggregation": { "aggregator": "count" } },
                    "blockResults": { "type": "independent", "defaultLimit": 50, "loadContentCover": false, "groupOverrides": {} }
                }
            },
            "sort": [ { "property": RELEASED_AT_PROP, "direction": "descending" } ],
            "searchQuery": "",
            "userTimeZone": "Europe/Berlin"
        }
    })
}

// --- client ---

pub struct CubecraftClient {
    endpoint: String,
    http: reqwest::Client,
    cookie: Option<String>,
    cache: ResponseCache<Arc<Vec<CanonicalItem>>>,
    cache_ttl: Duration,
    max_body_bytes: usize,
}

impl CubecraftClient {
    pub fn new(http_timeout: Duration) -> FeedResult<Self> {
        Ok(Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            http: super::http_client(http_timeout)?,
            cookie: None,
            cache: ResponseCache::new(PROVIDER),
            cache_ttl: Duration::ZERO,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_max_body_bytes(mut self, cap: usize) -> Self {
        self.max_body_bytes = cap;
        self
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .post(&self.endpoint)
            .header("x-notion-space-id", SPACE_ID)
            .header("x-notion-active-user-header", "")
            .header("notion-client-version", CLIENT_VERSION)
            .header("notion-audit-log-platform", "web")
            .json(&query_payload());
        if let Some(cookie) = &self.cookie {
            req = req.header(reqwest::header::COOKIE, cookie);
        }
        req
    }

    async fn fetch_body(&self) -> FeedResult<Vec<u8>> {
        counter!("upstream_requests_total", "provider" => PROVIDER).increment(1);
        let result = async {
            let resp = self.request().send().await.map_err(FeedError::from_reqwest)?;
            read_body_capped(resp, self.max_body_bytes).await
        }
        .await;
        if let Err(e) = &result {
            counter!("upstream_errors_total", "provider" => PROVIDER).increment(1);
            tracing::warn!(provider = PROVIDER, error = %e, "upstream fetch failed");
        }
        result
    }

    /// Every card on the board (all statuses), cache-checked.
    pub async fn fetch(&self, bypass_cache: bool) -> FeedResult<Arc<Vec<CanonicalItem>>> {
        let use_cache = !bypass_cache && !self.cache_ttl.is_zero();
        if use_cache {
            if let Some(items) = self.cache.get(CACHE_KEY) {
                return Ok(items);
            }
        }

        let body = self.fetch_body().await?;
        let items = Arc::new(map_collection(&body)?);
        tracing::debug!(provider = PROVIDER, cards = items.len(), "collection decoded");

        if use_cache {
            self.cache.put(CACHE_KEY, Arc::clone(&items), self.cache_ttl);
        }
        Ok(items)
    }

    pub async fn probe(&self) -> ProbeReport {
        let started = Instant::now();
        let resp = match self.request().send().await {
            Ok(r) => r,
            Err(e) => return probe_failed(0, started, e.to_string()),
        };
        let status = resp.status().as_u16();
        let body = match read_body_capped(resp, self.max_body_bytes).await {
            Ok(b) => b,
            Err(e) => return probe_failed(status, started, e.to_string()),
        };
        match map_collection(&body) {
            Ok(items) => ProbeReport {
                ok: true,
                status,
                latency_ms: started.elapsed().as_millis() as u64,
                items: items.len(),
                error: None,
            },
            Err(e) => probe_failed(status, started, e.to_string()),
        }
    }
}
