// src/lib.rs
// Public library surface for the server, the probe binary, and integration tests.

pub mod api;
pub mod cache;
pub mod changes;
pub mod config;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod paginate;
pub mod providers;
pub mod service;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::changes::ChangeTracker;
use crate::config::{ttl, AppConfig};
use crate::providers::cubecraft::CubecraftClient;
use crate::providers::hive::HiveClient;
use crate::providers::types::Provider;
use crate::service::{CubecraftService, HiveService, RoadmapService};

pub use crate::api::create_router as router;
pub use crate::error::{FeedError, FeedResult};

/// Both provider services, each with its own client and change tracker.
pub struct Services {
    pub hive: Arc<dyn RoadmapService>,
    pub cubecraft: Arc<dyn RoadmapService>,
}

pub fn build_services(cfg: &AppConfig) -> anyhow::Result<Services> {
    let h = &cfg.hive;
    let hive_client = HiveClient::new(&h.base_url, std::time::Duration::from_secs(h.http_timeout_secs))
        .context("building hive client")?
        .with_cache_ttl(ttl(h.cache_ttl_secs))
        .with_max_concurrency(h.max_concurrency)
        .with_max_body_bytes(h.max_body_bytes);

    let c = &cfg.cubecraft;
    let cubecraft_client = CubecraftClient::new(std::time::Duration::from_secs(c.http_timeout_secs))
        .context("building cubecraft client")?
        .with_endpoint(c.endpoint.clone())
        .with_cookie(c.cookie.clone())
        .with_cache_ttl(ttl(c.cache_ttl_secs))
        .with_max_body_bytes(c.max_body_bytes);

    let tracker =
        |p: Provider| Arc::new(ChangeTracker::new(p).with_index_cap(cfg.change_index_cap));

    Ok(Services {
        hive: Arc::new(HiveService::new(Arc::new(hive_client), tracker(Provider::Hive))),
        cubecraft: Arc::new(CubecraftService::new(
            Arc::new(cubecraft_client),
            tracker(Provider::Cubecraft),
        )),
    })
}

/// Full application router for `cfg`, including `/metrics`.
pub fn app(cfg: &AppConfig) -> anyhow::Result<shuttle_axum::axum::Router> {
    let services = build_services(cfg)?;
    let metrics = crate::metrics::Metrics::init().context("installing prometheus recorder")?;
    info!(
        hive = %cfg.hive.base_url,
        hive_ttl_secs = cfg.hive.cache_ttl_secs,
        cubecraft_ttl_secs = cfg.cubecraft.cache_ttl_secs,
        workers = cfg.hive.max_concurrency,
        "roadmap services ready"
    );
    Ok(api::create_router(api::AppState {
        hive: services.hive,
        cubecraft: services.cubecraft,
        request_timeout: cfg.request_timeout(),
        metrics: Some(metrics),
    }))
}
