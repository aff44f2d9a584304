// src/providers/mod.rs
pub mod cubecraft;
pub mod hive;
pub mod types;

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{FeedError, FeedResult};

const USER_AGENT: &str = "roadmap-aggregator/0.1";

/// Why a single upstream record was skipped. Never escapes the mapper.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record does not match schema: {0}")]
    Shape(String),
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("bad timestamp in `{field}`: {value:?}")]
    Timestamp { field: &'static str, value: String },
}

fn note_skipped(provider: &'static str, id: &str, err: &RecordError) {
    tracing::warn!(provider, id, error = %err, "skipping malformed record");
    metrics::counter!("records_skipped_total", "provider" => provider).increment(1);
}

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"));
static RE_ENTITIES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(nbsp|amp|lt|gt|quot|apos|#39);").expect("entity regex"));

/// Reduce an HTML fragment to plain text.
///
/// Tags are removed first, then a fixed set of named entities is decoded in a
/// single pass (so `&amp;lt;` becomes `&lt;`, not `<`). Any other entity is
/// left as written.
pub fn strip_html(input: &str) -> String {
    let untagged = RE_TAGS.replace_all(input, "");
    let decoded = RE_ENTITIES.replace_all(&untagged, |caps: &regex::Captures<'_>| {
        match &caps[1] {
            "nbsp" => " ",
            "amp" => "&",
            "lt" => "<",
            "gt" => ">",
            "quot" => "\"",
            _ => "'",
        }
    });
    decoded.trim().to_string()
}

/// Parse an upstream timestamp: RFC 3339, or a bare `YYYY-MM-DD` taken as midnight UTC.
pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Shared reqwest client builder for upstream calls.
pub(crate) fn http_client(timeout: Duration) -> FeedResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(4).min(timeout))
        .timeout(timeout)
        .build()
        .map_err(|e| FeedError::Internal(format!("http client: {e}")))
}

/// Read a response body, refusing anything larger than `cap` bytes.
///
/// Non-success statuses become `UpstreamUnavailable` with a short body excerpt.
pub(crate) async fn read_body_capped(
    mut resp: reqwest::Response,
    cap: usize,
) -> FeedResult<Vec<u8>> {
    let status = resp.status();
    if !status.is_success() {
        let head = read_error_head(&mut resp).await;
        let excerpt: String = String::from_utf8_lossy(&head).chars().take(512).collect();
        return Err(FeedError::UpstreamUnavailable(format!(
            "upstream status {}: {}",
            status.as_u16(),
            excerpt.trim()
        )));
    }

    if let Some(len) = resp.content_length() {
        if len > cap as u64 {
            return Err(FeedError::MalformedPayload(format!(
                "body of {len} bytes exceeds cap of {cap}"
            )));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await.map_err(FeedError::from_reqwest)? {
        if body.len() + chunk.len() > cap {
            return Err(FeedError::MalformedPayload(format!(
                "body exceeds cap of {cap} bytes"
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Bytes of a failed response kept for the error message; the rest is never read.
const ERROR_BODY_LIMIT: usize = 2 << 10;

async fn read_error_head(resp: &mut reqwest::Response) -> Vec<u8> {
    let mut head = Vec::new();
    while head.len() < ERROR_BODY_LIMIT {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                let room = ERROR_BODY_LIMIT - head.len();
                head.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            _ => break,
        }
    }
    head
}
