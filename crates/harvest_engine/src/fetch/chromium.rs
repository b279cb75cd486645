//! Headless Chromium backend over the DevTools protocol.

use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use engine_logging::{engine_debug, engine_warn};
use futures_util::StreamExt;
use harvest_core::{FailureKind, FetchError};
use tokio::task::JoinHandle;

use super::{RenderBackend, RenderRequest, RenderedPage};
use crate::EngineError;

const READY_POLL: Duration = Duration::from_millis(100);

/// One shared browser process; each render opens and closes its own tab.
pub struct ChromiumBackend {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromiumBackend {
    pub async fn launch() -> Result<Self, EngineError> {
        let config = BrowserConfig::builder()
            .build()
            .map_err(EngineError::ClientBuild)?;
        let (browser, mut events) = Browser::launch(config)
            .await
            .map_err(|err| EngineError::ClientBuild(err.to_string()))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(err) = event {
                    engine_warn!("chromium handler stopped: {}", err);
                    break;
                }
            }
        });
        Ok(Self { browser, handler })
    }

    async fn wait_until_ready(page: &Page, ready_timeout: Duration) {
        let deadline = tokio::time::Instant::now() + ready_timeout;
        loop {
            let state = page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|value| value.into_value::<String>().ok());
            if state.as_deref() == Some("complete") {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                engine_debug!("document not ready after {:?}; using current DOM", ready_timeout);
                return;
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }
}

impl Drop for ChromiumBackend {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait::async_trait]
impl RenderBackend for ChromiumBackend {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedPage, FetchError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(render_error)?;

        let rendered = async {
            page.set_user_agent(request.user_agent)
                .await
                .map_err(render_error)?;
            page.goto(request.url.as_str()).await.map_err(navigation_error)?;
            Self::wait_until_ready(&page, request.ready_timeout).await;
            let html = page.content().await.map_err(render_error)?;
            let final_url = page
                .url()
                .await
                .map_err(render_error)?
                .unwrap_or_else(|| request.url.to_string());
            Ok(RenderedPage {
                html,
                final_url,
                status: None,
            })
        }
        .await;

        if let Err(err) = page.close().await {
            engine_debug!("failed to close tab: {}", err);
        }
        rendered
    }
}

fn render_error(err: chromiumoxide::error::CdpError) -> FetchError {
    FetchError::new(FailureKind::RenderUnavailable, err.to_string())
}

fn navigation_error(err: chromiumoxide::error::CdpError) -> FetchError {
    FetchError::new(FailureKind::Network, err.to_string())
}
