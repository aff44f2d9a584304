// tests/api_http.rs
//
// HTTP-level tests for the public Router without opening sockets.
// Provider services are replaced by in-process stubs and the router is
// exercised directly via tower::ServiceExt::oneshot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as _; // for `oneshot`

use roadmap_aggregator::api::{self, AppState};
use roadmap_aggregator::changes::{ChangeEntry, ChangeTracker};
use roadmap_aggregator::error::{FeedError, FeedResult};
use roadmap_aggregator::paginate::{page_of, paginate};
use roadmap_aggregator::providers::types::{
    CanonicalItem, ProbeReport, Provider, Query, RoadmapAggregate, RoadmapPage,
};
use roadmap_aggregator::service::RoadmapService;

const BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone, Copy)]
enum Mode {
    Ok,
    Down,
    Garbled,
    Hang,
}

struct Stub {
    provider: Provider,
    mode: Mode,
    tracker: ChangeTracker,
}

fn item(id: &str, status: &str) -> CanonicalItem {
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    CanonicalItem {
        id: id.into(),
        slug: id.into(),
        title: format!("Item {id}"),
        status: status.into(),
        category: Some("General".into()),
        created_at: ts,
        last_modified: ts,
        released_at: None,
        url: format!("https://example.invalid/{id}"),
        content_html: String::new(),
        content_text: String::new(),
        upvotes: Some(1),
        pinned: Some(false),
        network: None,
        project_lead: None,
        page: 1,
        source: Provider::Hive,
    }
}

impl Stub {
    fn new(provider: Provider, mode: Mode) -> Self {
        Self {
            provider,
            mode,
            tracker: ChangeTracker::new(provider),
        }
    }

    async fn items(&self, q: &Query) -> FeedResult<Vec<CanonicalItem>> {
        if !["in-progress", "coming-next", "released"].contains(&q.column.as_str()) {
            return Err(FeedError::InvalidQuery(format!("unknown column {:?}", q.column)));
        }
        match self.mode {
            Mode::Ok => Ok((0..12).map(|i| item(&format!("i{i}"), "Released")).collect()),
            Mode::Down => Err(FeedError::UpstreamUnavailable("upstream status 500".into())),
            Mode::Garbled => Err(FeedError::MalformedPayload("expected value".into())),
            Mode::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl RoadmapService for Stub {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn columns(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("released".to_string(), "rel-id".to_string())])
    }

    async fn page(&self, q: &Query, _cancel: &CancellationToken) -> FeedResult<RoadmapPage> {
        Ok(page_of(self.items(q).await?, q.page, 5))
    }

    async fn all(&self, q: &Query, _cancel: &CancellationToken) -> FeedResult<RoadmapAggregate> {
        Ok(RoadmapAggregate {
            column: q.column.clone(),
            pages: paginate(self.items(q).await?, 5),
        })
    }

    fn updates(&self) -> Vec<ChangeEntry> {
        self.tracker.read()
    }

    async fn probe(&self) -> ProbeReport {
        let ok = matches!(self.mode, Mode::Ok);
        ProbeReport {
            ok,
            status: if ok { 200 } else { 500 },
            latency_ms: 1,
            items: 0,
            error: (!ok).then(|| "down".to_string()),
        }
    }
}

fn router_with(hive: Stub, cubecraft: Stub, timeout: Duration) -> Router {
    api::create_router(AppState {
        hive: Arc::new(hive),
        cubecraft: Arc::new(cubecraft),
        request_timeout: timeout,
        metrics: None,
    })
}

fn test_router() -> Router {
    router_with(
        Stub::new(Provider::Hive, Mode::Ok),
        Stub::new(Provider::Cubecraft, Mode::Ok),
        Duration::from_secs(5),
    )
}

async fn get(app: Router, uri: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

#[tokio::test]
async fn health_is_200_when_both_up() {
    let (status, v) = get(test_router(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["ok"], true);
    assert_eq!(v["services"]["hive"]["status"], 200);
    let ts = v["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok(), "timestamp {ts}");
}

#[tokio::test]
async fn health_is_503_when_one_is_down() {
    let app = router_with(
        Stub::new(Provider::Hive, Mode::Ok),
        Stub::new(Provider::Cubecraft, Mode::Down),
        Duration::from_secs(5),
    );
    let (status, v) = get(app, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(v["services"]["cubecraft"]["error"], "down");
    assert_eq!(v["services"]["hive"]["ok"], true);
}

#[tokio::test]
async fn columns_listing() {
    let (status, v) = get(test_router(), "/cubecraft/columns").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["columns"]["released"], "rel-id");
}

#[tokio::test]
async fn single_page_and_all_pages() {
    let (status, v) = get(test_router(), "/hive/released?page=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["meta"]["page"], 3);
    assert_eq!(v["meta"]["totalPages"], 3);
    assert_eq!(v["meta"]["totalResults"], 12);
    assert_eq!(v["items"].as_array().unwrap().len(), 2);
    assert_eq!(v["items"][0]["createdAt"], "2024-05-01T12:00:00Z");

    let (status, v) = get(test_router(), "/hive/released?all=yes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["column"], "released");
    assert_eq!(v["pages"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn bad_input_is_400() {
    let (status, v) = get(test_router(), "/hive/backlog").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["kind"], "invalid_query");

    let (status, v) = get(test_router(), "/hive/released?page=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["error"].as_str().unwrap().contains("page"));
}

#[tokio::test]
async fn upstream_failures_are_502_with_kind() {
    let app = router_with(
        Stub::new(Provider::Hive, Mode::Down),
        Stub::new(Provider::Cubecraft, Mode::Garbled),
        Duration::from_secs(5),
    );
    let (status, v) = get(app.clone(), "/hive/released").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(v["kind"], "upstream_unavailable");

    let (status, v) = get(app, "/cubecraft/released").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(v["kind"], "malformed_upstream_payload");
}

#[tokio::test]
async fn deadline_is_504() {
    let app = router_with(
        Stub::new(Provider::Hive, Mode::Hang),
        Stub::new(Provider::Cubecraft, Mode::Ok),
        Duration::from_millis(50),
    );
    let (status, v) = get(app, "/hive/released").await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(v["kind"], "cancelled");
}

#[tokio::test]
async fn raw_mode_unsupported_on_stub_is_400() {
    let (status, v) = get(test_router(), "/cubecraft/released?raw=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["kind"], "invalid_query");
}

#[tokio::test]
async fn updates_serialises_change_log() {
    let hive = Stub::new(Provider::Hive, Mode::Ok);
    hive.tracker.record(&[item("x", "In Progress")]);
    hive.tracker.record(&[item("x", "Released")]);

    let app = router_with(hive, Stub::new(Provider::Cubecraft, Mode::Ok), Duration::from_secs(5));
    let (status, v) = get(app, "/hive/updates").await;
    assert_eq!(status, StatusCode::OK);
    let ups = v["updates"].as_array().unwrap();
    assert_eq!(ups.len(), 1);
    assert_eq!(ups[0]["from"], "In Progress");
    assert_eq!(ups[0]["to"], "Released");
    assert_eq!(ups[0]["item"]["id"], "x");
    assert!(ups[0]["changedAtMs"].as_i64().unwrap() > 0);
    assert!(ups[0]["changedAt"].is_string());
}
