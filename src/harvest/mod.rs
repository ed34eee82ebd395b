pub mod browser;
pub mod capture;
pub mod pager;

use thiserror::Error;
use tracing::info;

use crate::config::Settings;
use crate::pipeline::Reporter;
use crate::store::{RecordStore, SharedStore};
use browser::BrowserSession;
use capture::ResponseCapture;
use pager::{PagerSummary, PaginationDriver, Settler};

#[derive(Debug, Error)]
pub enum HarvestError {
    /// The browser could not be started. Not retried.
    #[error("browser failed to launch: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("page interaction failed: {0}")]
    Page(String),
}

pub struct Harvest {
    pub store: RecordStore,
    pub summary: PagerSummary,
}

/// Open the search page for `keyword`, walk every results page and collect
/// the records delivered by the data API.
pub async fn harvest(
    settings: &Settings,
    keyword: &str,
    reporter: &Reporter,
) -> Result<Harvest, HarvestError> {
    let url = settings
        .search_url(keyword)
        .map_err(|e| HarvestError::Navigation(e.to_string()))?;

    let session = BrowserSession::launch(settings).await?;
    let store = SharedStore::new();
    let result = drive(&session, settings, url.as_str(), &store, reporter).await;
    session.close().await;
    let summary = result?;

    let store = store.take();
    info!(
        "Harvest finished: {} pages, {} records{}",
        summary.pages,
        store.len(),
        if summary.capped { " (capped)" } else { "" }
    );
    reporter.harvest_finished(summary.pages, store.len(), summary.capped);
    Ok(Harvest { store, summary })
}

async fn drive(
    session: &BrowserSession,
    settings: &Settings,
    url: &str,
    store: &SharedStore,
    reporter: &Reporter,
) -> Result<PagerSummary, HarvestError> {
    let capture = ResponseCapture::new(&settings.endpoint_marker, &settings.search_origin);
    let capture_task = session
        .start_capture(capture, store.clone(), reporter.clone())
        .await?;

    let mut settler = Settler::new(settings.settle_mode(), store.subscribe());
    settler.arm();
    reporter.harvest_started(url);

    let result = match session.open(url).await {
        Ok(()) => {
            let driver = PaginationDriver::new(settings.pager_config());
            let controls = session.controls(settings);
            Ok(driver.run(&controls, &mut settler, reporter).await)
        }
        Err(e) => Err(e),
    };
    capture_task.abort();
    result
}
