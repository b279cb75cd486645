use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use engine_logging::engine_debug;
use harvest_core::{FailureKind, FetchError, Location, Strategy};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER, RETRY_AFTER, USER_AGENT};
use reqwest::{Response, StatusCode};

use super::{read_limited, Fetcher, UserAgentPool};
use crate::signals::{decode_body, is_block_status, ContentSignals};
use crate::{EngineError, HarvestSettings, RawPayload};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Direct request strategy: one GET with a browser-like header set.
pub struct LightFetch {
    client: reqwest::Client,
    agents: UserAgentPool,
    accept_language: String,
    max_bytes: u64,
    signals: ContentSignals,
}

impl LightFetch {
    pub fn new(settings: &HarvestSettings) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .build()
            .map_err(|err| EngineError::ClientBuild(err.to_string()))?;
        Ok(Self {
            client,
            agents: UserAgentPool::new(&settings.user_agent_pool),
            accept_language: settings.accept_language.clone(),
            max_bytes: settings.max_bytes,
            signals: ContentSignals::new(&settings.block_markers, settings.min_content_chars),
        })
    }

    async fn read_body(&self, response: Response) -> Result<Vec<u8>, FetchError> {
        if let Some(content_len) = response.content_length() {
            if content_len > self.max_bytes {
                return Err(self.too_large(content_len));
            }
        }
        let body = read_limited(response, self.max_bytes)
            .await
            .map_err(map_reqwest_error)?;
        match body.overflow_at {
            Some(seen) => Err(self.too_large(seen)),
            None => Ok(body.bytes),
        }
    }

    fn too_large(&self, actual: u64) -> FetchError {
        FetchError::new(
            FailureKind::TooLarge {
                max_bytes: self.max_bytes,
                actual: Some(actual),
            },
            "response too large",
        )
    }

    async fn refusal(&self, status: StatusCode, response: Response) -> FetchError {
        let code = status.as_u16();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(&response);
            return FetchError::new(FailureKind::RateLimited { retry_after }, status.to_string());
        }
        if is_block_status(code) {
            return FetchError::new(FailureKind::Blocked, status.to_string());
        }
        // Challenge pages often arrive as 503s; anything else keeps its status.
        let content_type = header_string(&response, CONTENT_TYPE);
        if let Ok(body) = self.read_body(response).await {
            let text = decode_body(&body, content_type.as_deref());
            if self.signals.is_challenge_page(&text) {
                return FetchError::new(FailureKind::Blocked, format!("challenge page ({status})"));
            }
        }
        FetchError::new(FailureKind::HttpStatus(code), status.to_string())
    }
}

#[async_trait::async_trait]
impl Fetcher for LightFetch {
    async fn fetch(&self, location: &Location, timeout: Duration) -> Result<RawPayload, FetchError> {
        let user_agent = self.agents.next();
        engine_debug!("light fetch {} ua={}", location.url(), user_agent);

        let response = self
            .client
            .get(location.url().clone())
            .timeout(timeout)
            .header(USER_AGENT, user_agent)
            .header(ACCEPT, ACCEPT_HTML)
            .header(ACCEPT_LANGUAGE, self.accept_language.as_str())
            .header(REFERER, location.origin())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.refusal(status, response).await);
        }

        let final_url = response.url().to_string();
        let content_type = header_string(&response, CONTENT_TYPE);
        let body = self.read_body(response).await?;

        let text = decode_body(&body, content_type.as_deref());
        self.signals
            .inspect(&text)
            .map_err(|kind| FetchError::new(kind, format!("{} bytes from {final_url}", body.len())))?;

        Ok(RawPayload {
            content: Bytes::from(body),
            content_type,
            source_url: location.url().to_string(),
            final_url,
            status: status.as_u16(),
            fetched_at: Utc::now(),
            strategy: Strategy::Light,
        })
    }
}

pub(crate) fn header_string(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// Only the delta-seconds form is honoured; HTTP dates fall back to backoff.
fn parse_retry_after(response: &Response) -> Option<Duration> {
    header_string(response, RETRY_AFTER)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
