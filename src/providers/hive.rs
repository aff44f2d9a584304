//! Hive community voting board (`updates.playhive.com`).
//!
//! The upstream paginates server-side and reports page metadata inline, so
//! this provider leans on the fan-out fetcher. Raw page bodies are cached by
//! full request URL.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::types::{CanonicalItem, PageMeta, ProbeReport, Provider, Query, RoadmapPage};
use super::{note_skipped, parse_instant, read_body_capped, strip_html, RecordError};
use crate::cache::ResponseCache;
use crate::error::{FeedError, FeedResult};
use crate::fetch::{self, PageSource};
use crate::paginate::{SortDirection, SortField, SortSpec};

pub const DEFAULT_BASE_URL: &str = "https://updates.playhive.com/api/v1/submission";
pub const DETAIL_BASE_URL: &str = "https://updates.playhive.com/en/p/";
pub const DEFAULT_SORT: SortSpec = SortSpec::new(SortField::Upvotes, SortDirection::Desc);
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 << 20;

const PROVIDER: &str = "hive";

/// Logical column → Hive status id.
const COLUMNS: &[(&str, &str)] = &[
    ("in-progress", "673d43b2b479f2dff6f8b96e"),
    ("coming-next", "673d43a8b479f2dff6f8b74b"),
    ("released", "67489361029fa6e5e4579b21"),
];

pub fn status_id(column: &str) -> FeedResult<&'static str> {
    let col = column.trim().to_ascii_lowercase();
    COLUMNS
        .iter()
        .find(|(name, _)| *name == col)
        .map(|(_, id)| *id)
        .ok_or_else(|| {
            FeedError::InvalidQuery(format!(
                "unknown column {column:?}; must be one of [in-progress, coming-next, released]"
            ))
        })
}

pub fn columns() -> BTreeMap<String, String> {
    COLUMNS
        .iter()
        .map(|(c, id)| (c.to_string(), id.to_string()))
        .collect()
}

/// Upstream `sortBy` value for a sort spec.
fn sort_param(spec: SortSpec) -> String {
    let field = match spec.field {
        SortField::Upvotes => "upvotes",
        SortField::CreatedAt => "date",
        SortField::LastUpdated => "lastModified",
        SortField::ReleasedAt => "eta",
        SortField::Title => "title",
    };
    let dir = match spec.direction {
        SortDirection::Asc => "asc",
        SortDirection::Desc => "desc",
    };
    format!("{field}:{dir}")
}

// --- wire format ---

/// One upstream page. Records stay as raw JSON so a bad one can be skipped alone.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiveResponse {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_results: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Submission {
    id: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "content")]
    content_html: String,
    #[serde(default)]
    upvotes: i64,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    last_modified: Option<String>,
    #[serde(default)]
    pinned: bool,
    #[serde(default)]
    eta: Option<String>,
    #[serde(default)]
    post_status: Option<PostStatus>,
    #[serde(default)]
    post_category: Option<PostCategory>,
}

#[derive(Debug, Deserialize)]
struct PostStatus {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PostCategory {
    #[serde(default)]
    name: HashMap<String, String>,
}

// --- mapping ---

fn map_submission(raw: &Value, page: u32) -> Result<CanonicalItem, RecordError> {
    let s = Submission::deserialize(raw).map_err(|e| RecordError::Shape(e.to_string()))?;
    if s.id.trim().is_empty() {
        return Err(RecordError::Missing("id"));
    }

    let date_raw = s.date.ok_or(RecordError::Missing("date"))?;
    let created_at = parse_instant(&date_raw).ok_or(RecordError::Timestamp {
        field: "date",
        value: date_raw.clone(),
    })?;
    let last_modified = s
        .last_modified
        .as_deref()
        .and_then(parse_instant)
        .unwrap_or(created_at);

    Ok(CanonicalItem {
        url: format!("{DETAIL_BASE_URL}{}", s.slug),
        id: s.id,
        slug: s.slug,
        title: s.title,
        status: s.post_status.map(|p| p.name).unwrap_or_default(),
        category: s
            .post_category
            .and_then(|mut c| c.name.remove("en"))
            .filter(|c| !c.is_empty()),
        created_at,
        last_modified,
        released_at: s.eta.as_deref().and_then(parse_instant),
        content_text: strip_html(&s.content_html),
        content_html: s.content_html,
        upvotes: Some(s.upvotes),
        pinned: Some(s.pinned),
        network: None,
        project_lead: None,
        page,
        source: Provider::Hive,
    })
}

/// Map one upstream page. Metadata is reported exactly as the upstream declares it.
pub fn map_response(resp: &HiveResponse) -> RoadmapPage {
    let page = resp.page.max(1);
    let items = resp
        .results
        .iter()
        .filter_map(|raw| match map_submission(raw, page) {
            Ok(item) => Some(item),
            Err(e) => {
                let id = raw.get("id").and_then(Value::as_str).unwrap_or("?");
                note_skipped(PROVIDER, id, &e);
                None
            }
        })
        .collect();

    RoadmapPage {
        meta: PageMeta {
            page,
            limit: resp.limit,
            total_pages: resp.total_pages,
            total_results: resp.total_results,
        },
        items,
    }
}

// --- client ---

pub struct HiveClient {
    base_url: Url,
    http: reqwest::Client,
    cache: ResponseCache<Arc<[u8]>>,
    cache_ttl: Duration,
    max_concurrency: usize,
    max_body_bytes: usize,
}

impl HiveClient {
    pub fn new(base_url: &str, http_timeout: Duration) -> FeedResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FeedError::Internal(format!("hive base url {base_url:?}: {e}")))?;
        Ok(Self {
            base_url,
            http: super::http_client(http_timeout)?,
            cache: ResponseCache::new(PROVIDER),
            cache_ttl: Duration::ZERO,
            max_concurrency: fetch::DEFAULT_CONCURRENCY,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn with_max_body_bytes(mut self, cap: usize) -> Self {
        self.max_body_bytes = cap;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Full upstream URL for `q`. Rejects unknown columns before any I/O.
    pub fn page_url(&self, q: &Query) -> FeedResult<Url> {
        let status = status_id(&q.column)?;
        let sort = q
            .sort_by
            .as_deref()
            .and_then(SortSpec::parse)
            .unwrap_or(DEFAULT_SORT);

        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("includePinned", if q.include_pinned { "true" } else { "false" })
            .append_pair("inReview", if q.in_review { "true" } else { "false" })
            .append_pair("page", &q.page.max(1).to_string())
            .append_pair("s", status)
            .append_pair("sortBy", &sort_param(sort));
        Ok(url)
    }

    async fn get(&self, url: Url, bypass_cache: bool) -> FeedResult<Arc<[u8]>> {
        let use_cache = !bypass_cache && !self.cache_ttl.is_zero();
        if use_cache {
            if let Some(body) = self.cache.get(url.as_str()) {
                return Ok(body);
            }
        }

        counter!("upstream_requests_total", "provider" => PROVIDER).increment(1);
        let key = url.to_string();
        let result = async {
            let resp = self
                .http
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(FeedError::from_reqwest)?;
            read_body_capped(resp, self.max_body_bytes).await
        }
        .await;

        let body: Arc<[u8]> = match result {
            Ok(b) => b.into(),
            Err(e) => {
                counter!("upstream_errors_total", "provider" => PROVIDER).increment(1);
                tracing::warn!(provider = PROVIDER, url = %key, error = %e, "upstream fetch failed");
                return Err(e);
            }
        };
        if use_cache {
            self.cache.put(key, Arc::clone(&body), self.cache_ttl);
        }
        Ok(body)
    }

    /// One cache-checked upstream page, decoded, plus its raw body.
    pub async fn fetch_page(&self, q: &Query) -> FeedResult<(HiveResponse, Arc<[u8]>)> {
        let url = self.page_url(q)?;
        let raw = self.get(url, q.bypass_cache).await?;
        let resp: HiveResponse = serde_json::from_slice(&raw).map_err(FeedError::from_decode)?;
        Ok((resp, raw))
    }

    /// Every upstream page of `q`, in page order.
    pub async fn fetch_all_pages(
        self: &Arc<Self>,
        q: &Query,
        cancel: &CancellationToken,
    ) -> FeedResult<Vec<HiveResponse>> {
        // Validate before spawning anything.
        status_id(&q.column)?;
        let source = Arc::new(HivePages {
            client: Arc::clone(self),
            query: q.clone(),
        });
        fetch::fetch_all_pages(source, self.max_concurrency, cancel).await
    }

    /// Uncached request for page 1 of the first column.
    pub async fn probe(&self) -> ProbeReport {
        let started = Instant::now();
        let q = Query::new(COLUMNS[0].0);
        let url = match self.page_url(&q) {
            Ok(u) => u,
            Err(e) => return probe_failed(0, started, e.to_string()),
        };
        let resp = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => return probe_failed(0, started, e.to_string()),
        };
        let status = resp.status().as_u16();
        let body = match read_body_capped(resp, self.max_body_bytes).await {
            Ok(b) => b,
            Err(e) => return probe_failed(status, started, e.to_string()),
        };
        match serde_json::from_slice::<HiveResponse>(&body) {
            Ok(r) => ProbeReport {
                ok: true,
                status,
                latency_ms: started.elapsed().as_millis() as u64,
                items: r.results.len(),
                error: None,
            },
            Err(e) => probe_failed(status, started, e.to_string()),
        }
    }
}

pub(crate) fn probe_failed(status: u16, started: Instant, error: String) -> ProbeReport {
    ProbeReport {
        ok: false,
        status,
        latency_ms: started.elapsed().as_millis() as u64,
        items: 0,
        error: Some(error),
    }
}

/// One Hive query bound to its client, fetched page by page.
struct HivePages {
    client: Arc<HiveClient>,
    query: Query,
}

#[async_trait]
impl PageSource for HivePages {
    type Page = HiveResponse;

    async fn fetch_page(&self, page: u32) -> FeedResult<HiveResponse> {
        let q = self.query.clone().with_page(page);
        let (resp, _raw) = self.client.fetch_page(&q).await?;
        Ok(resp)
    }

    fn total_pages(page: &HiveResponse) -> u32 {
        page.total_pages
    }
}
