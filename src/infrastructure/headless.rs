//! Headless render fallback for JS-populated listing pages
//!
//! Some supplier sites return listing markup with no anchors until their
//! scripts run. When a static fetch harvests zero links the discovery
//! driver asks this renderer for the same URL once before giving up on
//! the page. The browser is launched lazily on first use and reused for
//! the rest of the process.

use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::infrastructure::http_client::FetchError;

struct BrowserHandle {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

pub struct HeadlessRenderer {
    timeout: Duration,
    handle: Mutex<Option<BrowserHandle>>,
}

impl HeadlessRenderer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            handle: Mutex::new(None),
        }
    }

    async fn launch(timeout: Duration) -> Result<BrowserHandle, FetchError> {
        let config = BrowserConfig::builder()
            .request_timeout(timeout)
            .arg("--no-sandbox")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--mute-audio")
            .arg("--hide-scrollbars")
            .build()
            .map_err(FetchError::Render)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Render(e.to_string()))?;

        // The handler stream must be driven for the browser to make progress
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {:?}", e);
                }
            }
        });

        info!("Headless browser launched for render fallback");
        Ok(BrowserHandle {
            browser,
            handler_task,
        })
    }

    /// Render a URL and return the resulting DOM serialized as HTML.
    pub async fn render(&self, url: &str) -> Result<String, FetchError> {
        let mut guard = self.handle.lock().await;
        if guard.is_none() {
            *guard = Some(Self::launch(self.timeout).await?);
        }
        let Some(handle) = guard.as_ref() else {
            return Err(FetchError::Render("browser handle unavailable".to_string()));
        };

        debug!("Rendering {} via headless browser", url);

        let render = async {
            let page = handle
                .browser
                .new_page(url)
                .await
                .map_err(|e| FetchError::Render(e.to_string()))?;
            page.wait_for_navigation()
                .await
                .map_err(|e| FetchError::Render(e.to_string()))?;
            let content = page
                .content()
                .await
                .map_err(|e| FetchError::Render(e.to_string()))?;
            Ok::<String, FetchError>(content)
        };

        match tokio::time::timeout(self.timeout, render).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Headless render of {} timed out", url);
                Err(FetchError::Timeout(self.timeout))
            }
        }
    }
}
