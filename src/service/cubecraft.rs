use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{validate_page, RoadmapService};
use crate::changes::{ChangeEntry, ChangeTracker};
use crate::error::FeedResult;
use crate::fetch::run_cancellable;
use crate::paginate::{filter_by_status, page_of, paginate, sort_items, SortSpec};
use crate::providers::cubecraft::{self, CubecraftClient, PAGE_SIZE};
use crate::providers::types::{
    CanonicalItem, ProbeReport, Provider, Query, RoadmapAggregate, RoadmapPage,
};

pub struct CubecraftService {
    client: Arc<CubecraftClient>,
    tracker: Arc<ChangeTracker>,
}

/// Cards of one logical column, sorted for output.
pub fn select(items: &[CanonicalItem], column: &str, sort_by: Option<&str>) -> FeedResult<Vec<CanonicalItem>> {
    let labels: Vec<&str> = cubecraft::native_statuses(column)?
        .iter()
        .map(|s| cubecraft::status_label(s))
        .collect();
    let spec = sort_by
        .and_then(SortSpec::parse)
        .unwrap_or_else(|| cubecraft::default_sort(column));

    let mut selected = filter_by_status(items.to_vec(), &labels);
    sort_items(&mut selected, spec);
    Ok(selected)
}

impl CubecraftService {
    pub fn new(client: Arc<CubecraftClient>, tracker: Arc<ChangeTracker>) -> Self {
        Self { client, tracker }
    }

    async fn load(&self, q: &Query, cancel: &CancellationToken) -> FeedResult<Vec<CanonicalItem>> {
        // Reject bad columns before touching the network.
        cubecraft::native_statuses(&q.column)?;
        let cards = run_cancellable(cancel, self.client.fetch(q.bypass_cache)).await?;
        self.tracker.record(&cards);
        select(&cards, &q.column, q.sort_by.as_deref())
    }
}

#[async_trait]
impl RoadmapService for CubecraftService {
    fn provider(&self) -> Provider {
        Provider::Cubecraft
    }

    fn columns(&self) -> BTreeMap<String, String> {
        cubecraft::columns()
    }

    async fn page(&self, q: &Query, cancel: &CancellationToken) -> FeedResult<RoadmapPage> {
        validate_page(q)?;
        let items = self.load(q, cancel).await?;
        let page = page_of(items, q.page, PAGE_SIZE);
        tracing::debug!(provider = "cubecraft", column = %q.column, page = q.page, total = page.meta.total_results, "page served");
        Ok(page)
    }

    async fn all(&self, q: &Query, cancel: &CancellationToken) -> FeedResult<RoadmapAggregate> {
        let items = self.load(q, cancel).await?;
        Ok(RoadmapAggregate {
            column: q.column.clone(),
            pages: paginate(items, PAGE_SIZE),
        })
    }

    fn updates(&self) -> Vec<ChangeEntry> {
        self.tracker.read()
    }

    async fn probe(&self) -> ProbeReport {
        self.client.probe().await
    }
}
