//! Fetch strategies: one [`Fetcher`] per [`Strategy`] tag.

mod light;
mod rendered;
#[cfg(feature = "chromium")]
mod chromium;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use harvest_core::{FetchError, Location, Strategy};
use reqwest::Response;

use crate::RawPayload;

pub(crate) use light::header_string;
pub use light::LightFetch;
pub use rendered::{RenderBackend, RenderRequest, RenderedFetch, RenderedPage};
#[cfg(feature = "chromium")]
pub use chromium::ChromiumBackend;

/// Uniform contract for every strategy.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, location: &Location, timeout: Duration) -> Result<RawPayload, FetchError>;
}

/// Dispatch table from strategy tag to its fetcher.
#[derive(Clone)]
pub struct StrategyTable {
    light: Arc<dyn Fetcher>,
    rendered: Arc<dyn Fetcher>,
}

impl StrategyTable {
    pub fn new(light: Arc<dyn Fetcher>, rendered: Arc<dyn Fetcher>) -> Self {
        Self { light, rendered }
    }

    pub fn get(&self, strategy: Strategy) -> &dyn Fetcher {
        match strategy {
            Strategy::Light => self.light.as_ref(),
            Strategy::Rendered => self.rendered.as_ref(),
        }
    }
}

/// Round-robin rotation over the configured user agents.
#[derive(Debug)]
pub(crate) struct UserAgentPool {
    agents: Vec<String>,
    next: AtomicUsize,
}

impl UserAgentPool {
    pub(crate) fn new(agents: &[String]) -> Self {
        let agents: Vec<String> = agents
            .iter()
            .map(|agent| agent.trim().to_string())
            .filter(|agent| !agent.is_empty())
            .collect();
        Self {
            agents,
            next: AtomicUsize::new(0),
        }
    }

    pub(crate) fn next(&self) -> &str {
        if self.agents.is_empty() {
            return concat!("harvest/", env!("CARGO_PKG_VERSION"));
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.agents.len();
        &self.agents[idx]
    }
}

/// A response body read up to a byte limit.
#[derive(Debug)]
pub(crate) struct LimitedBody {
    pub(crate) bytes: Vec<u8>,
    /// Set when the body went past the limit; holds the length seen so far.
    pub(crate) overflow_at: Option<u64>,
}

/// Streams `response` into memory, keeping at most `limit` bytes.
pub(crate) async fn read_limited(
    response: Response,
    limit: u64,
) -> Result<LimitedBody, reqwest::Error> {
    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let seen = bytes.len() as u64 + chunk.len() as u64;
        if seen > limit {
            let room = usize::try_from(limit)
                .unwrap_or(usize::MAX)
                .saturating_sub(bytes.len());
            bytes.extend_from_slice(&chunk[..room.min(chunk.len())]);
            return Ok(LimitedBody {
                bytes,
                overflow_at: Some(seen),
            });
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(LimitedBody {
        bytes,
        overflow_at: None,
    })
}
