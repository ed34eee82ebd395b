use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::capture::{PendingBodies, ResponseCapture};
use super::pager::PageControls;
use super::HarvestError;
use crate::config::Settings;
use crate::pipeline::Reporter;
use crate::store::SharedStore;

/// A headless Chromium with one tab open.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
}

impl BrowserSession {
    /// Start the browser. Failure here almost always means Chromium is not
    /// installed or not runnable, so it is reported as a launch error.
    pub async fn launch(settings: &Settings) -> Result<Self, HarvestError> {
        let mut builder = BrowserConfig::builder()
            .arg(format!("--user-agent={}", settings.user_agent))
            .request_timeout(settings.request_timeout());
        if let Some(path) = &settings.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(HarvestError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| HarvestError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler stopped: {}", e);
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| HarvestError::Launch(e.to_string()))?;

        info!("Browser launched");
        Ok(Self { browser, handler, page })
    }

    /// Subscribe to network traffic and feed matching bodies into `store`.
    ///
    /// Bodies are fetched once loading has finished; the returned task runs
    /// until aborted or the page goes away.
    pub async fn start_capture(
        &self,
        capture: ResponseCapture,
        store: SharedStore,
        reporter: Reporter,
    ) -> Result<JoinHandle<()>, HarvestError> {
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(page_error)?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(page_error)?;
        let page = self.page.clone();

        Ok(tokio::spawn(async move {
            let mut pending = PendingBodies::default();
            loop {
                tokio::select! {
                    Some(event) = responses.next() => {
                        pending.track(&capture, event.request_id.inner(), &event.response.url);
                    }
                    Some(event) = finished.next() => {
                        if let Some(url) = pending.finish(event.request_id.inner()) {
                            let params = GetResponseBodyParams::new(event.request_id.clone());
                            match page.execute(params).await {
                                Ok(body) if body.result.base64_encoded => {
                                    debug!("Skipping binary body from {}", url);
                                }
                                Ok(body) => {
                                    let added = capture.ingest(&url, &body.result.body, &store);
                                    if added > 0 {
                                        reporter.page_captured(added, store.len());
                                    }
                                }
                                Err(e) => debug!("Could not read body of {}: {}", url, e),
                            }
                        }
                    }
                    else => break,
                }
            }
        }))
    }

    pub async fn open(&self, url: &str) -> Result<(), HarvestError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| HarvestError::Navigation(format!("{}: {}", url, e)))?;
        Ok(())
    }

    pub fn controls(&self, settings: &Settings) -> BrowserPager {
        BrowserPager {
            page: self.page.clone(),
            settings: settings.clone(),
        }
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Browser did not close cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Waiting for browser exit failed: {}", e);
        }
        self.handler.abort();
    }
}

/// Page-selector access on the live tab.
pub struct BrowserPager {
    page: Page,
    settings: Settings,
}

#[async_trait]
impl PageControls for BrowserPager {
    async fn probe(&self, index: usize) -> Result<Option<String>, HarvestError> {
        let selector = self.settings.pager_selector_for(index);
        let elements = self.page.find_elements(selector).await.map_err(page_error)?;
        let Some(element) = elements.into_iter().next() else {
            return Ok(None);
        };
        let label = element.inner_text().await.map_err(page_error)?;
        Ok(Some(label.unwrap_or_default().trim().to_string()))
    }

    async fn activate(&self, index: usize) -> Result<(), HarvestError> {
        let selector = self.settings.pager_selector_for(index);
        let element = self.page.find_element(selector).await.map_err(page_error)?;
        element.click().await.map_err(page_error)?;
        Ok(())
    }
}

fn page_error(e: chromiumoxide::error::CdpError) -> HarvestError {
    HarvestError::Page(e.to_string())
}
