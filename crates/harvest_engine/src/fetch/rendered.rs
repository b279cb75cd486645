use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use engine_logging::{engine_debug, engine_warn};
use harvest_core::{FailureKind, FetchError, Location, Strategy};
use tokio::sync::Semaphore;
use url::Url;

use super::{Fetcher, UserAgentPool};
use crate::signals::ContentSignals;
use crate::{HarvestSettings, RawPayload};

/// What a render backend is asked to load.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub url: &'a Url,
    pub user_agent: &'a str,
    pub accept_language: &'a str,
    /// How long to wait for the document to settle after navigation.
    pub ready_timeout: Duration,
}

/// Serialized DOM after script execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub html: String,
    pub final_url: String,
    /// Main-document status when the backend can observe it.
    pub status: Option<u16>,
}

/// A headless browser or any other engine able to execute page scripts.
#[async_trait::async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedPage, FetchError>;
}

/// Rendered strategy: loads the page through a [`RenderBackend`], capped at
/// `max_render_sessions` concurrent sessions.
pub struct RenderedFetch {
    backend: Option<Arc<dyn RenderBackend>>,
    sessions: Semaphore,
    agents: UserAgentPool,
    accept_language: String,
    ready_timeout: Duration,
    signals: ContentSignals,
}

impl RenderedFetch {
    pub fn new(settings: &HarvestSettings, backend: Option<Arc<dyn RenderBackend>>) -> Self {
        if backend.is_none() {
            engine_warn!("no render backend configured; rendered fetches will fail");
        }
        Self {
            backend,
            sessions: Semaphore::new(settings.max_render_sessions.max(1)),
            agents: UserAgentPool::new(&settings.user_agent_pool),
            accept_language: settings.accept_language.clone(),
            ready_timeout: settings.render_wait_timeout,
            signals: ContentSignals::new(&settings.block_markers, settings.min_content_chars),
        }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }
}

#[async_trait::async_trait]
impl Fetcher for RenderedFetch {
    async fn fetch(&self, location: &Location, timeout: Duration) -> Result<RawPayload, FetchError> {
        let Some(backend) = self.backend.as_ref() else {
            return Err(FetchError::new(
                FailureKind::RenderUnavailable,
                "no render backend configured",
            ));
        };

        let render = async {
            let _session = self.sessions.acquire().await.map_err(|_| {
                FetchError::new(FailureKind::RenderUnavailable, "render sessions closed")
            })?;
            let user_agent = self.agents.next();
            engine_debug!("rendered fetch {} ua={}", location.url(), user_agent);
            backend
                .render(RenderRequest {
                    url: location.url(),
                    user_agent,
                    accept_language: &self.accept_language,
                    ready_timeout: self.ready_timeout,
                })
                .await
        };

        let page = tokio::time::timeout(timeout, render)
            .await
            .map_err(|_| FetchError::new(FailureKind::Timeout, format!("render exceeded {timeout:?}")))??;

        if let Some(status) = page.status {
            if status == 429 {
                return Err(FetchError::new(
                    FailureKind::RateLimited { retry_after: None },
                    format!("status {status}"),
                ));
            }
            if crate::signals::is_block_status(status) {
                return Err(FetchError::new(FailureKind::Blocked, format!("status {status}")));
            }
            if status >= 400 {
                return Err(FetchError::new(
                    FailureKind::HttpStatus(status),
                    format!("status {status}"),
                ));
            }
        }

        self.signals
            .inspect(&page.html)
            .map_err(|kind| FetchError::new(kind, format!("rendered {}", page.final_url)))?;

        Ok(RawPayload {
            content: Bytes::from(page.html),
            content_type: Some("text/html; charset=utf-8".to_string()),
            source_url: location.url().to_string(),
            final_url: page.final_url,
            status: page.status.unwrap_or(200),
            fetched_at: Utc::now(),
            strategy: Strategy::Rendered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticBackend(String);

    #[async_trait::async_trait]
    impl RenderBackend for StaticBackend {
        async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedPage, FetchError> {
            Ok(RenderedPage {
                html: self.0.clone(),
                final_url: request.url.to_string(),
                status: Some(200),
            })
        }
    }

    fn location() -> Location {
        Location::from_url(Url::parse("https://spa.example/app").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn missing_backend_is_render_unavailable() {
        let fetch = RenderedFetch::new(&HarvestSettings::default(), None);
        let err = fetch
            .fetch(&location(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::RenderUnavailable);
    }

    #[tokio::test]
    async fn rendered_dom_is_inspected() {
        let settings = HarvestSettings {
            min_content_chars: 10,
            ..HarvestSettings::default()
        };
        let html = "<html><body><p>Hydrated listing content</p></body></html>".to_string();
        let fetch = RenderedFetch::new(&settings, Some(Arc::new(StaticBackend(html))));
        let payload = fetch
            .fetch(&location(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(payload.strategy, Strategy::Rendered);
        assert_eq!(payload.final_url, "https://spa.example/app");

        let shell = "<html><body><div id=\"root\"></div></body></html>".to_string();
        let fetch = RenderedFetch::new(&settings, Some(Arc::new(StaticBackend(shell))));
        let err = fetch
            .fetch(&location(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::EmptyContent);
    }
}
