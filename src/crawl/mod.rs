//! Per-category pagination.
//!
//! Each category walks `page = 1..=max_pages` strictly in sequence with a
//! pacing delay between requests. Categories run as independent tasks and
//! push records into one channel, which the caller drains.

pub mod throttle;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CrawlError, FetchError};
use crate::extract;
use crate::fetch::PageFetcher;
use crate::record::ProductRecord;
use throttle::Throttle;

const CHANNEL_CAPACITY: usize = 256;

/// One category to walk.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryTarget {
    pub category: String,
    pub start_url: String,
    pub max_pages: u32,
    pub items_per_page: u32,
}

impl CategoryTarget {
    /// Page 1 is the start URL; later pages use the site's `_Desde_{offset}`
    /// suffix where offset is the 1-based index of the page's first item.
    pub fn page_url(&self, page: u32) -> String {
        if page <= 1 {
            return self.start_url.clone();
        }
        let offset = u64::from(page - 1) * u64::from(self.items_per_page) + 1;
        format!("{}_Desde_{}_NoIndex_True", self.start_url, offset)
    }
}

#[derive(Debug, Clone)]
pub struct Pacing {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Extra attempts per page after a failed fetch. 0 = fail on first error.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    PageLimit,
    EmptyPage,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Traversal {
    pub category: String,
    pub pages_fetched: u32,
    pub records: usize,
    pub stop: StopReason,
}

pub struct CategoryOutcome {
    pub category: String,
    pub result: Result<Traversal, CrawlError>,
}

/// Walks one category, sending every extracted record to `tx`.
pub async fn traverse<F>(
    fetcher: &F,
    target: &CategoryTarget,
    pacing: &Pacing,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<ProductRecord>,
) -> Result<Traversal, CrawlError>
where
    F: PageFetcher + ?Sized,
{
    let mut throttle = Throttle::new(pacing.min_delay, pacing.max_delay);
    let mut pages_fetched = 0;
    let mut records = 0;

    let mut page = 1;
    let stop = loop {
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        if page > 1 {
            let delay = throttle.delay();
            debug!(category = %target.category, page, delay_ms = delay.as_millis() as u64, "pacing");
            let cancelled = tokio::select! {
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                break StopReason::Cancelled;
            }
        }

        let url = target.page_url(page);
        let fetched = fetch_with_retry(fetcher, &url, pacing, &mut throttle, cancel)
            .await
            .map_err(|source| CrawlError::Fetch {
                category: target.category.clone(),
                page,
                url: url.clone(),
                source,
            })?;
        let Some(html) = fetched else {
            break StopReason::Cancelled;
        };
        pages_fetched = page;

        let extraction = extract::extract_page(&html, &target.category, Utc::now());
        if extraction.fragments == 0 {
            warn!(category = %target.category, page, %url, "no listing items on page, stopping");
            break StopReason::EmptyPage;
        }

        let kept = extraction.records.len();
        for record in extraction.records {
            tx.send(record)
                .await
                .map_err(|_| CrawlError::ChannelClosed(target.category.clone()))?;
        }
        records += kept;
        info!(
            category = %target.category,
            page,
            items = extraction.fragments,
            records = kept,
            "page extracted"
        );

        if page >= target.max_pages {
            break StopReason::PageLimit;
        }
        page += 1;
    };

    Ok(Traversal {
        category: target.category.clone(),
        pages_fetched,
        records,
        stop,
    })
}

/// Fetches `url`, retrying up to `pacing.max_retries` times. Each retry waits
/// the exponential backoff or the current pacing delay, whichever is longer.
///
/// `Ok(None)` means the token was cancelled before a retry went out.
async fn fetch_with_retry<F>(
    fetcher: &F,
    url: &str,
    pacing: &Pacing,
    throttle: &mut Throttle,
    cancel: &CancellationToken,
) -> Result<Option<String>, FetchError>
where
    F: PageFetcher + ?Sized,
{
    let mut attempt = 0;
    loop {
        let start = Instant::now();
        let err = match fetcher.fetch(url).await {
            Ok(html) => {
                throttle.record_success(start.elapsed());
                return Ok(Some(html));
            }
            Err(e) => e,
        };
        throttle.record_failure(start.elapsed());
        if attempt >= pacing.max_retries {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let backoff = pacing
            .retry_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .max(throttle.delay());
        warn!(
            url,
            attempt = attempt + 1,
            max_retries = pacing.max_retries,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "fetch failed, retrying"
        );
        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(backoff) => false,
        };
        if cancelled {
            return Ok(None);
        }
        attempt += 1;
    }
}

/// Runs every category concurrently and gathers their records.
///
/// A failed category is reported in its outcome; the others still finish.
pub async fn harvest<F>(
    fetcher: Arc<F>,
    targets: Vec<CategoryTarget>,
    pacing: Pacing,
    cancel: CancellationToken,
) -> (Vec<ProductRecord>, Vec<CategoryOutcome>)
where
    F: PageFetcher + 'static,
{
    let (tx, mut rx) = mpsc::channel::<ProductRecord>(CHANNEL_CAPACITY);
    let mut handles = Vec::with_capacity(targets.len());

    for target in targets {
        let fetcher = Arc::clone(&fetcher);
        let pacing = pacing.clone();
        let cancel = cancel.clone();
        let tx = tx.clone();
        let category = target.category.clone();
        let handle = tokio::spawn(async move {
            traverse(fetcher.as_ref(), &target, &pacing, &cancel, &tx).await
        });
        handles.push((category, handle));
    }

    // Drop our copy of tx so rx closes when all traversals finish
    drop(tx);

    let mut records = Vec::new();
    while let Some(record) = rx.recv().await {
        records.push(record);
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (category, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(CrawlError::Aborted {
                category: category.clone(),
                reason: e.to_string(),
            }),
        };
        match &result {
            Ok(t) => info!(
                category = %t.category,
                pages = t.pages_fetched,
                records = t.records,
                stop = ?t.stop,
                "category done"
            ),
            Err(e) => warn!(error = %e, "category failed"),
        }
        outcomes.push(CategoryOutcome { category, result });
    }

    (records, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned pages by URL; unknown URLs answer 404.
    #[derive(Default)]
    struct ScriptedFetcher {
        pages: HashMap<String, String>,
        failures: Mutex<HashMap<String, u32>>,
        calls: Mutex<Vec<String>>,
        times: Mutex<Vec<tokio::time::Instant>>,
        cancel_on_fetch: Option<CancellationToken>,
    }

    impl ScriptedFetcher {
        fn page(mut self, url: String, html: String) -> Self {
            self.pages.insert(url, html);
            self
        }

        /// The URL fails `times` times before being served normally.
        fn flaky(self, url: String, times: u32) -> Self {
            self.failures.lock().unwrap().insert(url, times);
            self
        }

        /// Every fetch also cancels `token`.
        fn cancels(mut self, token: CancellationToken) -> Self {
            self.cancel_on_fetch = Some(token);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn gaps(&self) -> Vec<Duration> {
            let times = self.times.lock().unwrap();
            times.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.times.lock().unwrap().push(tokio::time::Instant::now());
            if let Some(token) = &self.cancel_on_fetch {
                token.cancel();
            }
            if let Some(left) = self.failures.lock().unwrap().get_mut(url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(FetchError::Status { url: url.into(), status: 503 });
                }
            }
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Status { url: url.into(), status: 404 })
        }
    }

    fn listing(names: &[&str]) -> String {
        let items: String = names
            .iter()
            .map(|n| {
                format!(
                    r#"<li class="ui-search-layout__item"><a class="poly-component__title" href="https://x.example/{n}">{n}</a></li>"#
                )
            })
            .collect();
        format!("<html><body><ol>{items}</ol></body></html>")
    }

    fn target(max_pages: u32) -> CategoryTarget {
        CategoryTarget {
            category: "laptops".into(),
            start_url: "https://listado.example/laptops".into(),
            max_pages,
            items_per_page: 48,
        }
    }

    fn no_wait() -> Pacing {
        Pacing {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retries: 0,
            retry_backoff: Duration::ZERO,
        }
    }

    fn paced(min_ms: u64) -> Pacing {
        Pacing {
            min_delay: Duration::from_millis(min_ms),
            max_delay: Duration::from_millis(min_ms * 4),
            ..no_wait()
        }
    }

    fn three_pages(t: &CategoryTarget) -> ScriptedFetcher {
        (1..=3).fold(ScriptedFetcher::default(), |f, p| {
            f.page(t.page_url(p), listing(&[&format!("item-{p}")]))
        })
    }

    async fn run(
        fetcher: &ScriptedFetcher,
        target: &CategoryTarget,
        pacing: &Pacing,
        cancel: &CancellationToken,
    ) -> (Result<Traversal, CrawlError>, Vec<ProductRecord>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let result = traverse(fetcher, target, pacing, cancel, &tx).await;
        drop(tx);
        let mut records = Vec::new();
        while let Some(r) = rx.recv().await {
            records.push(r);
        }
        (result, records)
    }

    #[test]
    fn page_urls_follow_offsets() {
        let t = target(5);
        assert_eq!(t.page_url(1), "https://listado.example/laptops");
        assert_eq!(t.page_url(2), "https://listado.example/laptops_Desde_49_NoIndex_True");
        assert_eq!(t.page_url(3), "https://listado.example/laptops_Desde_97_NoIndex_True");
    }

    #[test]
    fn page_url_offset_does_not_overflow() {
        let t = CategoryTarget {
            items_per_page: 100_000_000,
            ..target(50)
        };
        assert_eq!(
            t.page_url(50),
            "https://listado.example/laptops_Desde_4900000001_NoIndex_True"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pages_are_spaced_by_pacing_delay() {
        let t = target(3);
        let fetcher = three_pages(&t);
        let started = tokio::time::Instant::now();

        let (result, records) = run(&fetcher, &t, &paced(2000), &CancellationToken::new()).await;

        assert_eq!(result.unwrap().stop, StopReason::PageLimit);
        assert_eq!(records.len(), 3);
        assert_eq!(fetcher.times.lock().unwrap()[0], started);
        let gaps = fetcher.gaps();
        assert_eq!(gaps.len(), 2);
        assert!(gaps.iter().all(|g| *g >= Duration::from_secs(2)), "{gaps:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_pacing_sleep_stops_traversal() {
        let t = target(3);
        let fetcher = three_pages(&t);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let started = tokio::time::Instant::now();

        let (result, records) = run(&fetcher, &t, &paced(10_000), &cancel).await;
        let traversal = result.unwrap();

        assert_eq!(traversal.stop, StopReason::Cancelled);
        assert_eq!(traversal.pages_fetched, 1);
        assert_eq!(fetcher.calls(), vec![t.page_url(1)]);
        assert_eq!(records.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_at_least_pacing_delay() {
        let t = target(1);
        let fetcher = ScriptedFetcher::default()
            .page(t.page_url(1), listing(&["a"]))
            .flaky(t.page_url(1), 2);
        let pacing = Pacing {
            max_retries: 2,
            retry_backoff: Duration::from_millis(100),
            ..paced(2000)
        };

        let (result, _) = run(&fetcher, &t, &pacing, &CancellationToken::new()).await;

        assert!(result.is_ok());
        let gaps = fetcher.gaps();
        assert_eq!(gaps.len(), 2);
        assert!(gaps.iter().all(|g| *g >= Duration::from_secs(2)), "{gaps:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_stops_retries() {
        let t = target(1);
        let cancel = CancellationToken::new();
        let fetcher = ScriptedFetcher::default().cancels(cancel.clone());
        let pacing = Pacing {
            max_retries: 3,
            retry_backoff: Duration::from_secs(60),
            ..no_wait()
        };
        let started = tokio::time::Instant::now();

        let (result, records) = run(&fetcher, &t, &pacing, &cancel).await;
        let traversal = result.unwrap();

        assert_eq!(traversal.stop, StopReason::Cancelled);
        assert_eq!(traversal.pages_fetched, 0);
        assert_eq!(fetcher.calls().len(), 1);
        assert!(records.is_empty());
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_retry_backoff_stops_fetching() {
        let t = target(1);
        let fetcher = ScriptedFetcher::default()
            .page(t.page_url(1), listing(&["a"]))
            .flaky(t.page_url(1), 3);
        let pacing = Pacing {
            max_retries: 3,
            retry_backoff: Duration::from_secs(60),
            ..no_wait()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let (result, _) = run(&fetcher, &t, &pacing, &cancel).await;

        assert_eq!(result.unwrap().stop, StopReason::Cancelled);
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn page_ceiling_stops_without_extra_fetch() {
        let t = target(3);
        let fetcher = (1..=4).fold(ScriptedFetcher::default(), |f, p| {
            f.page(t.page_url(p), listing(&[&format!("item-{p}")]))
        });

        let (result, records) = run(&fetcher, &t, &no_wait(), &CancellationToken::new()).await;
        let traversal = result.unwrap();

        assert_eq!(fetcher.calls().len(), 3);
        assert_eq!(traversal.pages_fetched, 3);
        assert_eq!(traversal.stop, StopReason::PageLimit);
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.category == "laptops"));
    }

    #[tokio::test]
    async fn empty_page_stops_early() {
        let t = target(5);
        let fetcher = ScriptedFetcher::default()
            .page(t.page_url(1), listing(&["a", "b"]))
            .page(t.page_url(2), listing(&[]))
            .page(t.page_url(3), listing(&["c"]));

        let (result, records) = run(&fetcher, &t, &no_wait(), &CancellationToken::new()).await;
        let traversal = result.unwrap();

        assert_eq!(fetcher.calls(), vec![t.page_url(1), t.page_url(2)]);
        assert_eq!(traversal.stop, StopReason::EmptyPage);
        assert_eq!(traversal.pages_fetched, 2);
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn nameless_tiles_keep_pagination_going() {
        let t = target(2);
        let promos = r#"<html><body><ol>
            <li class="ui-search-layout__item"><div class="banner">Promo</div></li>
            </ol></body></html>"#;
        let fetcher = ScriptedFetcher::default()
            .page(t.page_url(1), promos.to_string())
            .page(t.page_url(2), listing(&["real"]));

        let (result, records) = run(&fetcher, &t, &no_wait(), &CancellationToken::new()).await;

        assert_eq!(fetcher.calls().len(), 2);
        assert_eq!(result.unwrap().stop, StopReason::PageLimit);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "real");
    }

    #[tokio::test]
    async fn fetch_failure_is_fatal_without_retries() {
        let t = target(5);
        let fetcher = ScriptedFetcher::default().page(t.page_url(1), listing(&["a"]));

        let (result, records) = run(&fetcher, &t, &no_wait(), &CancellationToken::new()).await;

        match result {
            Err(CrawlError::Fetch { page, source: FetchError::Status { status, .. }, .. }) => {
                assert_eq!(page, 2);
                assert_eq!(status, 404);
            }
            other => panic!("expected fetch error, got {:?}", other.map(|t| t.stop)),
        }
        assert_eq!(fetcher.calls().len(), 2);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn bounded_retries_recover_flaky_page() {
        let t = target(1);
        let fetcher = ScriptedFetcher::default()
            .page(t.page_url(1), listing(&["a"]))
            .flaky(t.page_url(1), 2);
        let pacing = Pacing { max_retries: 2, ..no_wait() };

        let (result, records) = run(&fetcher, &t, &pacing, &CancellationToken::new()).await;

        assert!(result.is_ok());
        assert_eq!(fetcher.calls().len(), 3);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let t = target(1);
        let fetcher = ScriptedFetcher::default()
            .page(t.page_url(1), listing(&["a"]))
            .flaky(t.page_url(1), 10);
        let pacing = Pacing { max_retries: 2, ..no_wait() };

        let (result, _) = run(&fetcher, &t, &pacing, &CancellationToken::new()).await;

        assert!(matches!(result, Err(CrawlError::Fetch { .. })));
        assert_eq!(fetcher.calls().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_before_start_fetches_nothing() {
        let t = target(5);
        let fetcher = ScriptedFetcher::default().page(t.page_url(1), listing(&["a"]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (result, records) = run(&fetcher, &t, &no_wait(), &cancel).await;

        assert_eq!(result.unwrap().stop, StopReason::Cancelled);
        assert!(fetcher.calls().is_empty());
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn harvest_isolates_failing_category() {
        let good = target(2);
        let bad = CategoryTarget {
            category: "celulares".into(),
            start_url: "https://listado.example/celulares".into(),
            ..target(2)
        };
        let fetcher = ScriptedFetcher::default()
            .page(good.page_url(1), listing(&["a", "b"]))
            .page(good.page_url(2), listing(&["c"]));

        let (records, outcomes) = harvest(
            Arc::new(fetcher),
            vec![good, bad],
            no_wait(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(records.len(), 3);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].category, "laptops");
        assert_eq!(outcomes[0].result.as_ref().unwrap().records, 3);
        assert_eq!(outcomes[1].category, "celulares");
        assert!(outcomes[1].result.is_err());
    }
}
