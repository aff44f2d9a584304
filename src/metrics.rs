use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use shuttle_axum::axum::{routing::get, Router};

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide Prometheus recorder (first call only) and
    /// describe the counters the service emits.
    pub fn init() -> anyhow::Result<Self> {
        let handle = HANDLE
            .get_or_try_init(|| {
                let handle = PrometheusBuilder::new().install_recorder()?;
                describe();
                Ok::<_, anyhow::Error>(handle)
            })?
            .clone();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    metrics::describe_counter!("upstream_requests_total", "Upstream HTTP requests issued");
    metrics::describe_counter!("upstream_errors_total", "Upstream requests that failed");
    metrics::describe_counter!("cache_hits_total", "Response cache hits");
    metrics::describe_counter!("cache_misses_total", "Response cache misses (absent or expired)");
    metrics::describe_counter!("records_skipped_total", "Upstream records dropped by the mapper");
    metrics::describe_counter!("status_changes_total", "Status transitions recorded");
    metrics::describe_histogram!("fetch_pages_ms", "Wall time of a fan-out fetch");
}
