// tests/metrics_endpoint.rs
//
// Full app (real config → services → router) against a wiremock Hive
// upstream; checks that /metrics exposes the request and cache series.

use axum::body::{self, Body};
use axum::Router;
use http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use roadmap_aggregator::config::AppConfig;

async fn body_string(app: Router, uri: &str) -> (StatusCode, String) {
    let resp = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "id": "a", "slug": "a", "title": "A",
                "date": "2024-01-01T00:00:00Z",
                "postStatus": { "name": "Released" }
            }],
            "page": 1, "limit": 10, "totalPages": 1, "totalResults": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = AppConfig::default();
    cfg.hive.base_url = format!("{}/api/v1/submission", server.uri());
    cfg.hive.cache_ttl_secs = 60;
    let app = roadmap_aggregator::app(&cfg).expect("app() should build Router in tests");

    for _ in 0..2 {
        let (status, _) = body_string(app.clone(), "/hive/released").await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, text) = body_string(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("upstream_requests_total"), "{text}");
    assert!(text.contains("cache_hits_total"), "{text}");
    assert!(text.contains("cache_misses_total"), "{text}");
}
