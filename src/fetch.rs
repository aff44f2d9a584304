//! # Page Fetcher
//! Retrieves every page of one upstream query with bounded concurrency.
//!
//! Page 1 is fetched first to learn the declared page count. Pages `2..=N`
//! are then pulled from a shared counter by a fixed pool of workers, each
//! doing the same (cache-checked) fetch as page 1. Results are sorted by page
//! number, so the output order never depends on completion order. A declared
//! count above [`MAX_UPSTREAM_PAGES`] is rejected before any worker starts.
//!
//! Failure policy is strict: the first error any worker hits is kept, the
//! remaining workers stop taking pages, and the whole fetch fails with that
//! error. Pages that did succeed are dropped.

use std::future::Future;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{FeedError, FeedResult};

/// Pool size used when the configuration does not say otherwise.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Largest page count an upstream may declare for a single query.
pub const MAX_UPSTREAM_PAGES: u32 = 1_000;

/// One paginated upstream query, already resolved to provider-native parameters.
#[async_trait]
pub trait PageSource: Send + Sync + 'static {
    type Page: Send + 'static;

    /// Fetch (cache-checked) a single 1-based page.
    async fn fetch_page(&self, page: u32) -> FeedResult<Self::Page>;

    /// Total page count the upstream declares in `page`.
    fn total_pages(page: &Self::Page) -> u32;
}

/// Run `fut` unless `cancel` fires first.
pub async fn run_cancellable<T, F>(cancel: &CancellationToken, fut: F) -> FeedResult<T>
where
    F: Future<Output = FeedResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FeedError::Cancelled),
        res = fut => res,
    }
}

/// Bound `fut` by `deadline`. On expiry `cancel` is fired and the future is dropped,
/// which aborts any in-flight requests it owns.
pub async fn with_deadline<T, F>(deadline: Duration, cancel: &CancellationToken, fut: F) -> FeedResult<T>
where
    F: Future<Output = FeedResult<T>>,
{
    tokio::select! {
        res = fut => res,
        _ = tokio::time::sleep(deadline) => {
            cancel.cancel();
            Err(FeedError::Cancelled)
        }
    }
}

/// Fetch all pages of `source` using at most `concurrency` concurrent workers.
///
/// Returns pages in page-number order `1..=N`.
pub async fn fetch_all_pages<S: PageSource>(
    source: Arc<S>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> FeedResult<Vec<S::Page>> {
    let started = Instant::now();
    let first = run_cancellable(cancel, source.fetch_page(1)).await?;
    let total = S::total_pages(&first);
    if total <= 1 {
        return Ok(vec![first]);
    }
    if total > MAX_UPSTREAM_PAGES {
        return Err(FeedError::MalformedPayload(format!(
            "upstream declares {total} pages, more than the {MAX_UPSTREAM_PAGES} allowed"
        )));
    }

    let workers = concurrency.max(1).min((total - 1) as usize);
    let next_page = Arc::new(AtomicU32::new(2));
    let first_error: Arc<Mutex<Option<FeedError>>> = Arc::new(Mutex::new(None));
    let stop = cancel.child_token();

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let source = Arc::clone(&source);
        let next_page = Arc::clone(&next_page);
        let first_error = Arc::clone(&first_error);
        let stop = stop.clone();
        set.spawn(async move {
            let mut fetched = Vec::new();
            loop {
                if stop.is_cancelled() {
                    break;
                }
                let page = next_page.fetch_add(1, Ordering::Relaxed);
                if page > total {
                    break;
                }
                let res = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    res = source.fetch_page(page) => res,
                };
                match res {
                    Ok(p) => fetched.push((page, p)),
                    Err(e) => {
                        tracing::debug!(page, error = %e, "page fetch failed; stopping workers");
                        record_first(&first_error, e);
                        stop.cancel();
                        break;
                    }
                }
            }
            fetched
        });
    }

    let mut fetched: Vec<(u32, S::Page)> = vec![(1, first)];

    loop {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                set.abort_all();
                return Err(FeedError::Cancelled);
            }
            joined = set.join_next() => joined,
        };
        match joined {
            None => break,
            Some(Ok(batch)) => {
                fetched.extend(batch);
            }
            Some(Err(join_err)) => {
                record_first(
                    &first_error,
                    FeedError::Internal(format!("page worker failed: {join_err}")),
                );
                stop.cancel();
            }
        }
    }

    let err = first_error.lock().unwrap_or_else(|p| p.into_inner()).take();
    if let Some(e) = err {
        return Err(e);
    }
    if cancel.is_cancelled() {
        return Err(FeedError::Cancelled);
    }

    fetched.sort_unstable_by_key(|(page, _)| *page);
    let mut pages = Vec::with_capacity(fetched.len());
    for (expected, (page, p)) in (1..=total).zip(fetched) {
        if page != expected {
            return Err(FeedError::Internal(format!("page {expected} was never fetched")));
        }
        pages.push(p);
    }
    if pages.len() != total as usize {
        return Err(FeedError::Internal(format!(
            "fetched {} of {total} pages",
            pages.len()
        )));
    }

    let ms = started.elapsed().as_secs_f64() * 1_000.0;
    histogram!("fetch_pages_ms").record(ms);
    tracing::debug!(pages = total, workers, elapsed_ms = ms, "fan-out fetch complete");
    Ok(pages)
}

fn record_first(slot: &Mutex<Option<FeedError>>, err: FeedError) {
    let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
    if guard.is_none() {
        *guard = Some(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Single;

    #[async_trait]
    impl PageSource for Single {
        type Page = (u32, u32);
        async fn fetch_page(&self, page: u32) -> FeedResult<Self::Page> {
            Ok((page, 0))
        }
        fn total_pages(page: &Self::Page) -> u32 {
            page.1
        }
    }

    #[tokio::test]
    async fn zero_or_one_declared_pages_returns_first_only() {
        let token = CancellationToken::new();
        let pages = fetch_all_pages(Arc::new(Single), 4, &token).await.unwrap();
        assert_eq!(pages, vec![(1, 0)]);
    }

    #[tokio::test]
    async fn cancelled_before_start_issues_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let err = fetch_all_pages(Arc::new(Single), 4, &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_cancel() {
        let token = CancellationToken::new();
        let res: FeedResult<()> = with_deadline(Duration::from_millis(10), &token, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(res.unwrap_err().is_cancelled());
        assert!(token.is_cancelled());
    }
}
