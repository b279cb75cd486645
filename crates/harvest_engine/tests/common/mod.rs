#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use harvest_core::{parse_directives, DirectiveSet, FailureKind, FetchError, Location, Strategy};
use harvest_engine::{
    DirectiveError, DirectiveSource, Fetcher, HarvestEngine, HarvestSettings, Normalizer,
    PassthroughNormalizer, RawPayload, StrategyTable,
};
use tokio::time::Instant;

pub fn page_html(marker: &str) -> String {
    format!(
        "<html><body><h1>{marker}</h1><p>{}</p></body></html>",
        "Readable server side content for the harvest tests. ".repeat(4)
    )
}

/// Settings with deterministic backoff and a one second crawl-delay.
pub fn test_settings() -> HarvestSettings {
    HarvestSettings {
        jitter_fraction: 0.0,
        base_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(30),
        default_crawl_delay: Duration::from_secs(1),
        ..HarvestSettings::default()
    }
}

#[derive(Debug, Clone)]
pub struct FetchRecord {
    pub url: String,
    pub strategy: Strategy,
    pub at: Instant,
}

/// Fetcher with per-URL scripted outcomes; unscripted URLs use the default.
pub struct ScriptedFetcher {
    strategy: Strategy,
    default: Result<(), FailureKind>,
    scripts: Mutex<HashMap<String, VecDeque<Result<(), FailureKind>>>>,
    latency: Duration,
    log: Mutex<Vec<FetchRecord>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            default: Ok(()),
            scripts: Mutex::new(HashMap::new()),
            latency: Duration::ZERO,
            log: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn failing(strategy: Strategy, kind: FailureKind) -> Self {
        Self {
            default: Err(kind),
            ..Self::new(strategy)
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn script(self, url: &str, outcomes: Vec<Result<(), FailureKind>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), outcomes.into());
        self
    }

    pub fn records(&self) -> Vec<FetchRecord> {
        self.log.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, location: &Location, _timeout: Duration) -> Result<RawPayload, FetchError> {
        let url = location.url().to_string();
        self.log.lock().unwrap().push(FetchRecord {
            url: url.clone(),
            strategy: self.strategy,
            at: Instant::now(),
        });
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let outcome = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.clone());
        match outcome {
            Ok(()) => Ok(RawPayload {
                content: Bytes::from(page_html(&url)),
                content_type: Some("text/html; charset=utf-8".to_string()),
                source_url: url.clone(),
                final_url: url,
                status: 200,
                fetched_at: Utc::now(),
                strategy: self.strategy,
            }),
            Err(kind) => Err(FetchError::new(kind, "scripted failure")),
        }
    }
}

/// Directive source answering from an in-memory table of robots files.
#[derive(Default)]
pub struct StaticDirectives {
    robots: HashMap<String, Result<String, DirectiveError>>,
    calls: AtomicUsize,
}

impl StaticDirectives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn robots(mut self, host: &str, txt: &str) -> Self {
        self.robots.insert(host.to_string(), Ok(txt.to_string()));
        self
    }

    pub fn failing(mut self, host: &str) -> Self {
        self.robots.insert(
            host.to_string(),
            Err(DirectiveError::Unavailable("robots.txt answered 503".to_string())),
        );
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DirectiveSource for StaticDirectives {
    async fn fetch_directives(&self, location: &Location) -> Result<DirectiveSet, DirectiveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.robots.get(location.host()) {
            Some(Ok(txt)) => Ok(parse_directives(txt, "harvestbot")),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(DirectiveSet::allow_all()),
        }
    }
}

pub struct Harness<N: Normalizer = PassthroughNormalizer> {
    pub engine: HarvestEngine<N>,
    pub light: Arc<ScriptedFetcher>,
    pub rendered: Arc<ScriptedFetcher>,
    pub directives: Arc<StaticDirectives>,
}

pub fn harness(
    settings: HarvestSettings,
    light: ScriptedFetcher,
    rendered: ScriptedFetcher,
    directives: StaticDirectives,
) -> Harness {
    harness_with(settings, light, rendered, directives, PassthroughNormalizer)
}

pub fn harness_with<N: Normalizer>(
    settings: HarvestSettings,
    light: ScriptedFetcher,
    rendered: ScriptedFetcher,
    directives: StaticDirectives,
    normalizer: N,
) -> Harness<N> {
    engine_logging::initialize_for_tests();
    let light = Arc::new(light);
    let rendered = Arc::new(rendered);
    let directives = Arc::new(directives);
    let engine = HarvestEngine::with_components(
        settings,
        StrategyTable::new(light.clone(), rendered.clone()),
        directives.clone(),
        normalizer,
    )
    .expect("valid settings");
    Harness {
        engine,
        light,
        rendered,
        directives,
    }
}
