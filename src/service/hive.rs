use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{validate_page, RoadmapService};
use crate::changes::{ChangeEntry, ChangeTracker};
use crate::error::FeedResult;
use crate::fetch::run_cancellable;
use crate::paginate::{filter_by_status, paginate};
use crate::providers::hive::{self, map_response, HiveClient};
use crate::providers::types::{ProbeReport, Provider, Query, RoadmapAggregate, RoadmapPage};

pub struct HiveService {
    client: Arc<HiveClient>,
    tracker: Arc<ChangeTracker>,
}

impl HiveService {
    pub fn new(client: Arc<HiveClient>, tracker: Arc<ChangeTracker>) -> Self {
        Self { client, tracker }
    }

    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }
}

#[async_trait]
impl RoadmapService for HiveService {
    fn provider(&self) -> Provider {
        Provider::Hive
    }

    fn columns(&self) -> BTreeMap<String, String> {
        hive::columns()
    }

    async fn page(&self, q: &Query, cancel: &CancellationToken) -> FeedResult<RoadmapPage> {
        validate_page(q)?;
        hive::status_id(&q.column)?;

        let (resp, _raw) = run_cancellable(cancel, self.client.fetch_page(q)).await?;
        let page = map_response(&resp);
        self.tracker.record(&page.items);
        tracing::debug!(provider = "hive", column = %q.column, page = page.meta.page, items = page.items.len(), "page served");
        Ok(page)
    }

    async fn all(&self, q: &Query, cancel: &CancellationToken) -> FeedResult<RoadmapAggregate> {
        hive::status_id(&q.column)?;

        let upstream = self.client.fetch_all_pages(q, cancel).await?;
        let limit = upstream.first().map(|p| p.limit).unwrap_or(0);

        let mut items = Vec::new();
        for resp in &upstream {
            items.extend(map_response(resp).items);
        }
        self.tracker.record(&items);

        // Upstream already filtered by status and sorted; only re-slice.
        let items = filter_by_status(items, &[]);
        let limit = if limit > 0 { limit } else { items.len().max(1) as u32 };
        let pages = paginate(items, limit);
        tracing::debug!(
            provider = "hive",
            column = %q.column,
            upstream_pages = upstream.len(),
            pages = pages.len(),
            "aggregate served"
        );
        Ok(RoadmapAggregate {
            column: q.column.clone(),
            pages,
        })
    }

    async fn raw(&self, q: &Query, cancel: &CancellationToken) -> FeedResult<Arc<[u8]>> {
        validate_page(q)?;
        let (_resp, raw) = run_cancellable(cancel, self.client.fetch_page(q)).await?;
        Ok(raw)
    }

    fn updates(&self) -> Vec<ChangeEntry> {
        self.tracker.read()
    }

    async fn probe(&self) -> ProbeReport {
        self.client.probe().await
    }
}
