use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use shuttle_axum::axum::{
    extract::{Path, Query as QueryParams, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::error::FeedError;
use crate::fetch::with_deadline;
use crate::metrics::Metrics;
use crate::providers::types::{CanonicalItem, Query};
use crate::service::RoadmapService;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub hive: Arc<dyn RoadmapService>,
    pub cubecraft: Arc<dyn RoadmapService>,
    pub request_timeout: Duration,
    pub metrics: Option<Metrics>,
}

/// Routes of one provider, mounted under `/<provider>`.
#[derive(Clone)]
struct ProviderState {
    svc: Arc<dyn RoadmapService>,
    request_timeout: Duration,
}

pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .with_state(state.clone())
        .nest("/hive", provider_router(&state.hive, state.request_timeout))
        .nest("/cubecraft", provider_router(&state.cubecraft, state.request_timeout));

    if let Some(m) = &state.metrics {
        router = router.merge(m.router());
    }
    router.layer(CorsLayer::very_permissive())
}

fn provider_router(svc: &Arc<dyn RoadmapService>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/columns", get(columns))
        .route("/updates", get(updates))
        .route("/{column}", get(by_column))
        .with_state(ProviderState {
            svc: Arc::clone(svc),
            request_timeout,
        })
}

impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        let status = match &self {
            FeedError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            FeedError::UpstreamUnavailable(_) | FeedError::MalformedPayload(_) => {
                StatusCode::BAD_GATEWAY
            }
            FeedError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
            FeedError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string(), "kind": self.kind() });
        (status, Json(body)).into_response()
    }
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (hive, cubecraft) = tokio::join!(state.hive.probe(), state.cubecraft.probe());
    let ok = hive.ok && cubecraft.ok;
    if !ok {
        tracing::warn!(hive_ok = hive.ok, cubecraft_ok = cubecraft.ok, "health probe failed");
    }
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ok": ok,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "services": { "hive": hive, "cubecraft": cubecraft },
        })),
    )
}

async fn columns(State(p): State<ProviderState>) -> Json<Value> {
    Json(json!({ "columns": p.svc.columns() }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangeOut {
    changed_at: String,
    changed_at_ms: i64,
    from: String,
    to: String,
    item: CanonicalItem,
}

async fn updates(State(p): State<ProviderState>) -> Json<Value> {
    let out: Vec<ChangeOut> = p
        .svc
        .updates()
        .into_iter()
        .map(|e| ChangeOut {
            changed_at: e.at.to_rfc3339(),
            changed_at_ms: e.at.timestamp_millis(),
            from: e.from,
            to: e.to,
            item: e.item,
        })
        .collect();
    Json(json!({ "updates": out }))
}

async fn by_column(
    State(p): State<ProviderState>,
    Path(column): Path<String>,
    QueryParams(params): QueryParams<HashMap<String, String>>,
) -> Response {
    let q = match parse_query(&column, &params) {
        Ok(q) => q,
        Err(e) => return e.into_response(),
    };
    let all = flag(&params, "all", false);
    let raw = flag(&params, "raw", false);

    // Dropping the handler future (client gone) also cancels the fetch.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let svc = &p.svc;
    let res = if raw {
        with_deadline(p.request_timeout, &cancel, svc.raw(&q, &cancel))
            .await
            .map(|body| {
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    body.to_vec(),
                )
                    .into_response()
            })
    } else if all {
        with_deadline(p.request_timeout, &cancel, svc.all(&q, &cancel))
            .await
            .map(|agg| Json(agg).into_response())
    } else {
        with_deadline(p.request_timeout, &cancel, svc.page(&q, &cancel))
            .await
            .map(|page| Json(page).into_response())
    };

    match res {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(
                provider = svc.provider().as_str(),
                column = %q.column,
                kind = e.kind(),
                error = %e,
                "request failed"
            );
            e.into_response()
        }
    }
}

/// Build a [`Query`] from path + query string.
pub fn parse_query(column: &str, params: &HashMap<String, String>) -> Result<Query, FeedError> {
    let mut q = Query::new(column);
    if let Some(raw) = params.get("page") {
        q.page = raw
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| {
                FeedError::InvalidQuery(format!("page must be a positive integer, got {raw:?}"))
            })?;
    }
    q.sort_by = params
        .get("sortBy")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    q.bypass_cache = !flag(params, "cache", true);
    q.in_review = flag(params, "inReview", false);
    q.include_pinned = flag(params, "includePinned", true);
    Ok(q)
}

/// Lenient boolean: unknown spellings fall back to `default`.
pub fn flag(params: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match params.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "y" | "on" => true,
            "0" | "false" | "no" | "n" | "off" => false,
            _ => default,
        },
        None => default,
    }
}
