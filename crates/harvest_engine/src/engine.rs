use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use engine_logging::{engine_debug, engine_error, engine_info};
use futures_util::{Stream, StreamExt};
use harvest_core::{FailureKind, Location, Target};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::Checkpoint;
use crate::fetch::{LightFetch, RenderBackend, RenderedFetch, StrategyTable};
use crate::gate::{DirectiveSource, HttpDirectiveSource, PolicyGate};
use crate::normalize::Normalizer;
use crate::retry::RetryCoordinator;
use crate::selector::StrategySelector;
use crate::{BatchReport, EngineError, HarvestFailure, HarvestResult, HarvestSettings, Harvested};

/// Orchestrates a batch: gate, strategy choice, retried fetch, normalize.
pub struct HarvestEngine<N: Normalizer> {
    inner: Arc<EngineInner<N>>,
}

struct EngineInner<N: Normalizer> {
    settings: HarvestSettings,
    gate: Arc<PolicyGate>,
    selector: StrategySelector,
    coordinator: RetryCoordinator,
    normalizer: N,
}

impl<N: Normalizer> Clone for HarvestEngine<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N: Normalizer> HarvestEngine<N> {
    /// Engine with the HTTP light strategy, robots over HTTP and, if given,
    /// a render backend for the rendered strategy.
    pub fn new(
        settings: HarvestSettings,
        normalizer: N,
        render_backend: Option<Arc<dyn RenderBackend>>,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        let light = Arc::new(LightFetch::new(&settings)?);
        let rendered = Arc::new(RenderedFetch::new(&settings, render_backend));
        let directives = Arc::new(HttpDirectiveSource::new(&settings)?);
        Self::with_components(settings, StrategyTable::new(light, rendered), directives, normalizer)
    }

    pub fn with_components(
        settings: HarvestSettings,
        strategies: StrategyTable,
        directives: Arc<dyn DirectiveSource>,
        normalizer: N,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        let gate = Arc::new(PolicyGate::new(&settings, directives));
        let selector = StrategySelector::new(&settings);
        let coordinator = RetryCoordinator::new(&settings, Arc::clone(&gate), strategies);
        Ok(Self {
            inner: Arc::new(EngineInner {
                settings,
                gate,
                selector,
                coordinator,
                normalizer,
            }),
        })
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.inner.settings
    }

    pub fn policy_gate(&self) -> &PolicyGate {
        &self.inner.gate
    }

    pub fn strategy_selector(&self) -> &StrategySelector {
        &self.inner.selector
    }

    pub async fn checkpoint(&self) -> Checkpoint {
        Checkpoint::capture(&self.inner.gate, &self.inner.selector).await
    }

    pub fn restore(&self, checkpoint: &Checkpoint) {
        checkpoint.apply(&self.inner.gate, &self.inner.selector);
    }

    /// Harvests `targets`, yielding exactly one result per target in
    /// completion order. Dropping the stream cancels the rest of the batch.
    pub fn harvest(
        &self,
        targets: Vec<Target>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = HarvestResult<N::Record>> + Send + 'static {
        let batch = cancel.child_token();
        let guard = batch.clone().drop_guard();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_batch(Arc::clone(&self.inner), targets, batch, tx));

        futures_util::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|result| (result, (rx, guard)))
        })
    }

    pub async fn harvest_all(
        &self,
        targets: Vec<Target>,
        cancel: CancellationToken,
    ) -> BatchReport<N::Record> {
        let results: Vec<_> = self.harvest(targets, cancel).collect().await;
        BatchReport { results }
    }
}

/// Position of a target in its submitted batch. Caller ids need not be unique.
type Slot = usize;

/// Delivers each target's result at most once; whatever is still listed
/// when the batch drains never got a result.
struct Ledger<R> {
    outstanding: DashMap<Slot, Target>,
    tx: mpsc::UnboundedSender<HarvestResult<R>>,
}

impl<R> Ledger<R> {
    fn emit(&self, slot: Slot, result: HarvestResult<R>) {
        if self.outstanding.remove(&slot).is_none() {
            engine_error!("dropping duplicate result for {}", result.target());
            return;
        }
        // A closed receiver means the caller stopped listening.
        let _ = self.tx.send(result);
    }
}

async fn run_batch<N: Normalizer>(
    inner: Arc<EngineInner<N>>,
    targets: Vec<Target>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<HarvestResult<N::Record>>,
) {
    let total = targets.len();
    let ledger = Arc::new(Ledger {
        outstanding: targets.iter().cloned().enumerate().collect(),
        tx,
    });

    // Host lanes in order of first appearance, each in submission order.
    let mut lane_index: HashMap<String, usize> = HashMap::new();
    let mut lanes: Vec<VecDeque<(Slot, Target, Location)>> = Vec::new();
    for (slot, target) in targets.into_iter().enumerate() {
        match target.locate() {
            Ok(location) => {
                let idx = *lane_index
                    .entry(location.host().to_string())
                    .or_insert_with(|| {
                        lanes.push(VecDeque::new());
                        lanes.len() - 1
                    });
                lanes[idx].push_back((slot, target, location));
            }
            Err(error) => {
                engine_info!("skipping {}: {}", target, error);
                ledger.emit(
                    slot,
                    HarvestResult::Failed(HarvestFailure {
                        target,
                        kind: error.kind,
                        attempts: 0,
                        detail: error.message,
                        exhausted: false,
                    }),
                );
            }
        }
    }
    engine_info!("harvesting {} target(s) across {} host(s)", total, lanes.len());

    let permits = Arc::new(Semaphore::new(inner.settings.concurrency_limit));
    let mut lane_tasks = JoinSet::new();
    for lane in lanes {
        lane_tasks.spawn(run_lane(
            Arc::clone(&inner),
            lane,
            Arc::clone(&permits),
            cancel.clone(),
            Arc::clone(&ledger),
        ));
    }
    while let Some(joined) = lane_tasks.join_next().await {
        if let Err(err) = joined {
            engine_error!("host lane stopped: {}", err);
        }
    }

    let mut lost: Vec<(Slot, Target)> = ledger
        .outstanding
        .iter()
        .map(|entry| (*entry.key(), entry.value().clone()))
        .collect();
    lost.sort_by_key(|(slot, _)| *slot);
    for (slot, target) in lost {
        ledger.emit(
            slot,
            HarvestResult::Failed(HarvestFailure {
                target,
                kind: FailureKind::Internal,
                attempts: 0,
                detail: "pipeline ended without a result".to_string(),
                exhausted: false,
            }),
        );
    }
}

async fn run_lane<N: Normalizer>(
    inner: Arc<EngineInner<N>>,
    lane: VecDeque<(Slot, Target, Location)>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    ledger: Arc<Ledger<N::Record>>,
) {
    for (slot, target, location) in lane {
        if cancel.is_cancelled() {
            ledger.emit(slot, HarvestResult::NotAttempted(target));
            continue;
        }
        let permit = tokio::select! {
            permit = Arc::clone(&permits).acquire_owned() => permit.ok(),
            _ = cancel.cancelled() => None,
        };
        let Some(_permit) = permit else {
            ledger.emit(slot, HarvestResult::NotAttempted(target));
            continue;
        };
        let result = run_target(&inner, target, &location, &cancel).await;
        ledger.emit(slot, result);
    }
}

async fn run_target<N: Normalizer>(
    inner: &EngineInner<N>,
    target: Target,
    location: &Location,
    cancel: &CancellationToken,
) -> HarvestResult<N::Record> {
    let host = location.host();
    let strategy = inner.selector.choose_strategy(host);
    engine_debug!("{} starting with {} strategy", target, strategy);

    let report = inner.coordinator.execute(location, strategy, cancel).await;
    for attempt in report.attempts.iter().filter(|attempt| attempt.fetched) {
        inner
            .selector
            .record_outcome(host, attempt.strategy, &attempt.outcome);
    }
    let attempts = report.attempts.len() as u32;

    match report.outcome {
        Ok(payload) => match inner.normalizer.normalize(&payload) {
            Ok(record) => HarvestResult::Harvested(Harvested {
                target,
                record,
                strategy: payload.strategy,
                attempts,
                final_url: payload.final_url,
                fetched_at: payload.fetched_at,
            }),
            Err(err) => HarvestResult::Failed(HarvestFailure {
                target,
                kind: FailureKind::Normalization,
                attempts,
                detail: err.to_string(),
                exhausted: false,
            }),
        },
        Err(error) if error.kind == FailureKind::Cancelled && attempts == 0 => {
            HarvestResult::NotAttempted(target)
        }
        Err(error) => HarvestResult::Failed(HarvestFailure {
            target,
            kind: error.kind,
            attempts,
            detail: error.message,
            exhausted: report.exhausted,
        }),
    }
}
