use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use super::HarvestError;
use crate::pipeline::Reporter;

/// The page-selector controls of the search UI.
#[async_trait]
pub trait PageControls: Send + Sync {
    /// Label of the selector whose index attribute equals `index`, if present.
    async fn probe(&self, index: usize) -> Result<Option<String>, HarvestError>;

    /// Click the selector with the given index.
    async fn activate(&self, index: usize) -> Result<(), HarvestError>;
}

/// How the pager waits for captures after a page change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleMode {
    /// Always sleep the full settle duration.
    Fixed,
    /// Return once captures stop arriving for `quiet`; the settle duration
    /// is only an upper bound.
    Quiescent { quiet: Duration },
}

/// Waits for asynchronous captures to land after navigation.
pub struct Settler {
    mode: SettleMode,
    store_len: watch::Receiver<usize>,
}

impl Settler {
    pub fn new(mode: SettleMode, store_len: watch::Receiver<usize>) -> Self {
        Self { mode, store_len }
    }

    /// Mark the current store length as seen. Call right before navigating.
    pub fn arm(&mut self) {
        let _ = self.store_len.borrow_and_update();
    }

    /// Wait at most `limit` for the page's captures.
    pub async fn settle(&mut self, limit: Duration) {
        let quiet = match self.mode {
            SettleMode::Fixed => {
                tokio::time::sleep(limit).await;
                return;
            }
            SettleMode::Quiescent { quiet } => quiet,
        };

        let deadline = Instant::now() + limit;
        let mut seen_capture = false;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            let window = if seen_capture { quiet.min(remaining) } else { remaining };
            match timeout(window, self.store_len.changed()).await {
                Ok(Ok(())) => seen_capture = true,
                // quiet window or limit elapsed, or the capture side is gone
                _ => return,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PagerConfig {
    pub initial_settle: Duration,
    pub page_settle: Duration,
    pub record_cap: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerSummary {
    /// Pages seen, counting the initial load.
    pub pages: usize,
    /// Whether the record cap cut pagination short.
    pub capped: bool,
}

/// Walks the pager one selector index at a time until no selector remains.
pub struct PaginationDriver {
    config: PagerConfig,
}

impl PaginationDriver {
    pub fn new(config: PagerConfig) -> Self {
        Self { config }
    }

    /// Run after the first results page has started loading.
    ///
    /// Probe or click failures end pagination with a warning; records
    /// captured so far are kept.
    pub async fn run(
        &self,
        controls: &dyn PageControls,
        settler: &mut Settler,
        reporter: &Reporter,
    ) -> PagerSummary {
        settler.settle(self.config.initial_settle).await;

        let mut index = 1usize;
        let mut capped = false;
        loop {
            if self.over_cap(settler) {
                info!("Record cap reached after {} pages, stopping", index);
                capped = true;
                break;
            }

            let label = match controls.probe(index).await {
                Ok(Some(label)) => label,
                Ok(None) => {
                    info!("No page selector at index {}, pagination done", index);
                    break;
                }
                Err(e) => {
                    warn!("Probing page selector {} failed: {}", index, e);
                    break;
                }
            };

            reporter.page_advanced(index, &label);
            settler.arm();
            if let Err(e) = controls.activate(index).await {
                warn!("Clicking page selector {} ({}) failed: {}", index, label, e);
                break;
            }
            settler.settle(self.config.page_settle).await;
            index += 1;
        }

        PagerSummary { pages: index, capped }
    }

    fn over_cap(&self, settler: &Settler) -> bool {
        match self.config.record_cap {
            Some(cap) => *settler.store_len.borrow() > cap,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::{RecordDraft, SharedStore};

    /// Pager with `selectors` page links; each click appends `per_page` records.
    struct FakePager {
        selectors: usize,
        per_page: usize,
        store: SharedStore,
        clicks: AtomicUsize,
        fail_probe_at: Option<usize>,
    }

    impl FakePager {
        fn new(selectors: usize, per_page: usize, store: SharedStore) -> Self {
            Self {
                selectors,
                per_page,
                store,
                clicks: AtomicUsize::new(0),
                fail_probe_at: None,
            }
        }
    }

    #[async_trait]
    impl PageControls for FakePager {
        async fn probe(&self, index: usize) -> Result<Option<String>, HarvestError> {
            if self.fail_probe_at == Some(index) {
                return Err(HarvestError::Page("target closed".into()));
            }
            Ok((index <= self.selectors).then(|| (index + 1).to_string()))
        }

        async fn activate(&self, _index: usize) -> Result<(), HarvestError> {
            self.clicks.fetch_add(1, Ordering::SeqCst);
            self.store
                .extend((0..self.per_page).map(|_| RecordDraft::default()));
            Ok(())
        }
    }

    fn driver(cap: Option<usize>) -> PaginationDriver {
        PaginationDriver::new(PagerConfig {
            initial_settle: Duration::from_secs(5),
            page_settle: Duration::from_secs(8),
            record_cap: cap,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_selector_absent() {
        let store = SharedStore::new();
        let pager = FakePager::new(3, 10, store.clone());
        let mut settler = Settler::new(SettleMode::Fixed, store.subscribe());

        let summary = driver(None).run(&pager, &mut settler, &Reporter::detached()).await;

        assert_eq!(summary, PagerSummary { pages: 4, capped: false });
        assert_eq!(pager.clicks.load(Ordering::SeqCst), 3);
        assert_eq!(store.len(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_result_set_terminates() {
        let store = SharedStore::new();
        let pager = FakePager::new(0, 0, store.clone());
        let mut settler = Settler::new(SettleMode::Fixed, store.subscribe());

        let summary = driver(None).run(&pager, &mut settler, &Reporter::detached()).await;

        assert_eq!(summary.pages, 1);
        assert_eq!(pager.clicks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cap_stops_unbounded_pager() {
        let store = SharedStore::new();
        let pager = FakePager::new(usize::MAX, 10, store.clone());
        let mut settler = Settler::new(SettleMode::Fixed, store.subscribe());

        let summary = driver(Some(25)).run(&pager, &mut settler, &Reporter::detached()).await;

        assert!(summary.capped);
        assert_eq!(store.len(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_error_ends_pagination() {
        let store = SharedStore::new();
        let mut pager = FakePager::new(5, 1, store.clone());
        pager.fail_probe_at = Some(3);
        let mut settler = Settler::new(SettleMode::Fixed, store.subscribe());

        let summary = driver(None).run(&pager, &mut settler, &Reporter::detached()).await;

        assert_eq!(summary.pages, 3);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn quiescent_settle_returns_early_after_captures() {
        let store = SharedStore::new();
        let mut settler = Settler::new(
            SettleMode::Quiescent { quiet: Duration::from_millis(500) },
            store.subscribe(),
        );
        settler.arm();

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            writer.extend(vec![RecordDraft::default()]);
        });

        let start = Instant::now();
        settler.settle(Duration::from_secs(8)).await;
        let waited = start.elapsed();

        assert!(waited >= Duration::from_millis(700));
        assert!(waited < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn quiescent_settle_is_bounded_without_captures() {
        let store = SharedStore::new();
        let mut settler = Settler::new(
            SettleMode::Quiescent { quiet: Duration::from_millis(500) },
            store.subscribe(),
        );
        settler.arm();

        let start = Instant::now();
        settler.settle(Duration::from_secs(8)).await;

        assert!(start.elapsed() >= Duration::from_secs(8));
    }
}
