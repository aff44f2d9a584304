//! Per-provider roadmap services.
//!
//! A service owns its upstream client and its [`ChangeTracker`]; both are
//! handed in at construction so tests can wire stubs without globals.

pub mod cubecraft;
pub mod hive;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::changes::ChangeEntry;
use crate::error::{FeedError, FeedResult};
use crate::providers::types::{ProbeReport, Provider, Query, RoadmapAggregate, RoadmapPage};

pub use cubecraft::CubecraftService;
pub use hive::HiveService;

#[async_trait]
pub trait RoadmapService: Send + Sync {
    fn provider(&self) -> Provider;

    /// Logical column → provider identifier.
    fn columns(&self) -> BTreeMap<String, String>;

    /// One output page for `q`.
    async fn page(&self, q: &Query, cancel: &CancellationToken) -> FeedResult<RoadmapPage>;

    /// Every output page for `q`.
    async fn all(&self, q: &Query, cancel: &CancellationToken) -> FeedResult<RoadmapAggregate>;

    /// Upstream body for `q`, untouched. Only providers with paged upstreams support it.
    async fn raw(&self, _q: &Query, _cancel: &CancellationToken) -> FeedResult<Arc<[u8]>> {
        Err(FeedError::InvalidQuery(format!(
            "raw mode is not supported for {}",
            self.provider().as_str()
        )))
    }

    /// Status changes still inside the retention window, oldest first.
    fn updates(&self) -> Vec<ChangeEntry>;

    async fn probe(&self) -> ProbeReport;
}

/// Page numbers are 1-based.
pub(crate) fn validate_page(q: &Query) -> FeedResult<()> {
    if q.page == 0 {
        return Err(FeedError::InvalidQuery("page must be >= 1".into()));
    }
    Ok(())
}
