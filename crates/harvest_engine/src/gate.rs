//! Per-host politeness gate: robots directives, crawl-delay spacing and the
//! request budget, each host behind its own lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use engine_logging::{engine_debug, engine_info, engine_warn};
use harvest_core::{
    instant_after, parse_directives, DenyReason, DirectiveSet, HostPolicy, Location, PolicyLimits,
};
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::fetch::{header_string, read_limited};
use crate::signals::decode_body;
use crate::{EngineError, HarvestSettings};

/// Robots documents are read up to this size; the rest is ignored.
pub const MAX_ROBOTS_BYTES: u64 = 512 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("directive fetch failed: {0}")]
    Unavailable(String),
}

/// Where robots directives come from.
#[async_trait::async_trait]
pub trait DirectiveSource: Send + Sync {
    async fn fetch_directives(&self, location: &Location) -> Result<DirectiveSet, DirectiveError>;
}

/// Fetches `/robots.txt` over HTTP. A missing file (4xx) means no
/// restrictions; server errors and network failures are retried once.
pub struct HttpDirectiveSource {
    client: reqwest::Client,
    agent_token: String,
    user_agent: String,
}

impl HttpDirectiveSource {
    pub fn new(settings: &HarvestSettings) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .build()
            .map_err(|err| EngineError::ClientBuild(err.to_string()))?;
        let user_agent = settings
            .user_agent_pool
            .iter()
            .find(|ua| !ua.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| settings.robots_agent.clone());
        Ok(Self {
            client,
            agent_token: settings.robots_agent.clone(),
            user_agent,
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<DirectiveSet, DirectiveError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
            .send()
            .await
            .map_err(|err| DirectiveError::Unavailable(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            let content_type = header_string(&response, CONTENT_TYPE);
            let body = read_limited(response, MAX_ROBOTS_BYTES)
                .await
                .map_err(|err| DirectiveError::Unavailable(err.to_string()))?;
            let mut bytes = body.bytes;
            if let Some(seen) = body.overflow_at {
                engine_warn!(
                    "{} is over {} bytes ({} seen); parsing the prefix",
                    url,
                    MAX_ROBOTS_BYTES,
                    seen
                );
                // A cut line could turn into a broader rule.
                let complete = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |idx| idx + 1);
                bytes.truncate(complete);
            }
            let text = decode_body(&bytes, content_type.as_deref());
            return Ok(parse_directives(&text, &self.agent_token));
        }
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            return Ok(DirectiveSet::allow_all());
        }
        Err(DirectiveError::Unavailable(format!("{url} answered {status}")))
    }
}

#[async_trait::async_trait]
impl DirectiveSource for HttpDirectiveSource {
    async fn fetch_directives(&self, location: &Location) -> Result<DirectiveSet, DirectiveError> {
        let url = location.robots_url();
        match self.fetch_once(&url).await {
            Ok(directives) => Ok(directives),
            Err(first) => {
                engine_debug!("retrying {} after: {}", url, first);
                self.fetch_once(&url).await
            }
        }
    }
}

/// A granted fetch slot. Hand it back through [`PolicyGate::record_fetch`]
/// once the request is actually sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    host: String,
    reserved_at: Instant,
}

impl Reservation {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn reserved_at(&self) -> Instant {
        self.reserved_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed(Reservation),
    Denied(DenyReason),
}

/// Checkpointable view of one host's politeness state.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSnapshot {
    pub host: String,
    pub directives: DirectiveSet,
    pub directives_expire_at: Instant,
    pub last_fetch: Option<Instant>,
    pub tokens: f64,
}

#[derive(Debug, Default)]
struct HostSlot {
    policy: Option<HostPolicy>,
    // Set while directives could not be resolved.
    unavailable_until: Option<Instant>,
}

pub struct PolicyGate {
    hosts: DashMap<String, Arc<Mutex<HostSlot>>>,
    source: Arc<dyn DirectiveSource>,
    limits: PolicyLimits,
    failure_ttl: Duration,
    spacing_jitter: Duration,
}

impl PolicyGate {
    pub fn new(settings: &HarvestSettings, source: Arc<dyn DirectiveSource>) -> Self {
        Self {
            hosts: DashMap::new(),
            source,
            limits: settings.policy_limits(),
            failure_ttl: settings.directive_failure_ttl,
            spacing_jitter: settings.spacing_jitter,
        }
    }

    fn slot(&self, host: &str) -> Arc<Mutex<HostSlot>> {
        self.hosts
            .entry(host.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Decides whether `location` may be fetched now and, if so, reserves the
    /// slot. Directives are resolved under the host's lock on first use or
    /// expiry, so concurrent checks for one host share a single fetch.
    pub async fn check_and_reserve(&self, location: &Location) -> GateDecision {
        let host = location.host();
        let slot = self.slot(host);
        let mut slot = slot.lock().await;

        let now = clock();
        if let Some(until) = slot.unavailable_until {
            if now < until {
                return GateDecision::Denied(DenyReason::PolicyUnavailable);
            }
            slot.unavailable_until = None;
        }

        let stale = slot
            .policy
            .as_ref()
            .map_or(true, |policy| policy.directives_expired(now));
        if stale {
            match self.source.fetch_directives(location).await {
                Ok(directives) => {
                    let now = clock();
                    engine_info!(
                        "directives for {}: {} rules, crawl-delay {:?}",
                        host,
                        directives.rules.len(),
                        directives.crawl_delay
                    );
                    match slot.policy.as_mut() {
                        Some(policy) => policy.refresh_directives(directives, &self.limits, now),
                        None => slot.policy = Some(HostPolicy::new(directives, &self.limits, now)),
                    }
                }
                Err(err) => {
                    engine_warn!("denying {} for {:?}: {}", host, self.failure_ttl, err);
                    slot.unavailable_until = Some(instant_after(clock(), self.failure_ttl));
                    return GateDecision::Denied(DenyReason::PolicyUnavailable);
                }
            }
        }

        let extra_spacing = self.sample_spacing();
        let now = clock();
        let Some(policy) = slot.policy.as_mut() else {
            return GateDecision::Denied(DenyReason::PolicyUnavailable);
        };
        match policy.check_and_reserve(&location.request_path(), now, extra_spacing) {
            Ok(()) => GateDecision::Allowed(Reservation {
                host: host.to_string(),
                reserved_at: now,
            }),
            Err(reason) => {
                engine_debug!("gate denied {}: {}", location.url(), reason);
                GateDecision::Denied(reason)
            }
        }
    }

    /// Stamps the actual send time of a reserved fetch.
    pub async fn record_fetch(&self, reservation: &Reservation, at: Instant) {
        let Some(slot) = self.hosts.get(&reservation.host).map(|entry| entry.value().clone()) else {
            return;
        };
        let mut slot = slot.lock().await;
        if let Some(policy) = slot.policy.as_mut() {
            policy.record_fetch(at);
        }
    }

    /// Earliest instant the host accepts its next fetch, if it has state.
    pub async fn next_allowed_at(&self, host: &str) -> Option<Instant> {
        let slot = self.hosts.get(host).map(|entry| entry.value().clone())?;
        let slot = slot.lock().await;
        slot.policy.as_ref().and_then(HostPolicy::next_allowed_at)
    }

    pub async fn fetch_count(&self, host: &str) -> u64 {
        let Some(slot) = self.hosts.get(host).map(|entry| entry.value().clone()) else {
            return 0;
        };
        let slot = slot.lock().await;
        slot.policy.as_ref().map_or(0, HostPolicy::fetch_count)
    }

    pub async fn snapshot(&self) -> Vec<HostSnapshot> {
        let slots: Vec<(String, Arc<Mutex<HostSlot>>)> = self
            .hosts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let now = clock();
        let mut hosts = Vec::with_capacity(slots.len());
        for (host, slot) in slots {
            let mut slot = slot.lock().await;
            if let Some(policy) = slot.policy.as_mut() {
                hosts.push(HostSnapshot {
                    host,
                    directives: policy.directives().clone(),
                    directives_expire_at: policy.directives_expire_at(),
                    last_fetch: policy.last_fetch(),
                    tokens: policy.tokens(now),
                });
            }
        }
        hosts.sort_by(|a, b| a.host.cmp(&b.host));
        hosts
    }

    /// Replaces state for the snapshotted hosts; other hosts are untouched.
    pub fn restore(&self, hosts: Vec<HostSnapshot>) {
        let now = clock();
        for snapshot in hosts {
            let policy = HostPolicy::from_parts(
                snapshot.directives,
                &self.limits,
                snapshot.directives_expire_at,
                snapshot.last_fetch,
                snapshot.tokens,
                now,
            );
            let slot = HostSlot {
                policy: Some(policy),
                unavailable_until: None,
            };
            self.hosts.insert(snapshot.host, Arc::new(Mutex::new(slot)));
        }
    }

    pub fn reset(&self) {
        self.hosts.clear();
    }

    fn sample_spacing(&self) -> Duration {
        if self.spacing_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max = self.spacing_jitter.as_secs_f64();
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=max))
    }
}

/// Current time on the tokio clock, so paused-time tests see virtual time.
pub(crate) fn clock() -> Instant {
    tokio::time::Instant::now().into_std()
}
