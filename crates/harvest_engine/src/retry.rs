use std::sync::Arc;
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_trace, engine_warn};
use harvest_core::{
    AttemptOutcome, DenyReason, FailureKind, FetchAttempt, FetchError, Location, RetryMachine,
    RetryPolicy, RetryState, Strategy,
};
use tokio_util::sync::CancellationToken;

use crate::fetch::StrategyTable;
use crate::gate::{clock, GateDecision, PolicyGate};
use crate::{HarvestSettings, RawPayload};

/// Everything one target's attempts produced.
#[derive(Debug, Clone)]
pub struct RetryReport {
    pub outcome: Result<RawPayload, FetchError>,
    pub attempts: Vec<FetchAttempt>,
    /// `true` when the attempt ceiling ended the target.
    pub exhausted: bool,
}

/// Runs the gate-check-then-fetch loop for a single target, sleeping
/// through backoff and crawl-delay spacing in between.
pub struct RetryCoordinator {
    gate: Arc<PolicyGate>,
    strategies: StrategyTable,
    policy: RetryPolicy,
    light_timeout: Duration,
    rendered_timeout: Duration,
}

impl RetryCoordinator {
    pub fn new(settings: &HarvestSettings, gate: Arc<PolicyGate>, strategies: StrategyTable) -> Self {
        Self {
            gate,
            strategies,
            policy: settings.retry_policy(),
            light_timeout: settings.request_timeout,
            rendered_timeout: settings.rendered_timeout(),
        }
    }

    fn timeout_for(&self, strategy: Strategy) -> Duration {
        match strategy {
            Strategy::Light => self.light_timeout,
            Strategy::Rendered => self.rendered_timeout,
        }
    }

    pub async fn execute(
        &self,
        location: &Location,
        initial: Strategy,
        cancel: &CancellationToken,
    ) -> RetryReport {
        let mut machine = RetryMachine::new(self.policy.clone(), initial);
        let mut attempts = Vec::new();

        loop {
            if let RetryState::Backoff { delay, .. } = machine.state() {
                let delay = *delay;
                if !delay.is_zero() && !sleep_or_cancel(delay, cancel).await {
                    machine.abort(cancelled());
                    break;
                }
            }

            let Some(decision) = self.admit(location, cancel).await else {
                machine.abort(cancelled());
                break;
            };
            let Some((number, strategy)) = machine.begin_attempt() else {
                break;
            };

            let error = match decision {
                GateDecision::Denied(reason) => {
                    let error = reason.into_failure(location.url().as_str());
                    attempts.push(FetchAttempt {
                        number,
                        strategy,
                        outcome: AttemptOutcome::Failed(error.kind.clone()),
                        latency: Duration::ZERO,
                        fetched: false,
                    });
                    error
                }
                GateDecision::Allowed(reservation) => {
                    let started = clock();
                    self.gate.record_fetch(&reservation, started).await;
                    let result = self.fetch(location, strategy).await;
                    let latency = clock().saturating_duration_since(started);
                    match result {
                        Ok(payload) => {
                            attempts.push(FetchAttempt {
                                number,
                                strategy,
                                outcome: AttemptOutcome::Succeeded,
                                latency,
                                fetched: true,
                            });
                            machine.succeed();
                            engine_debug!(
                                "{} fetched via {} on attempt {}",
                                location.url(),
                                strategy,
                                number
                            );
                            return RetryReport {
                                outcome: Ok(payload),
                                attempts,
                                exhausted: false,
                            };
                        }
                        Err(error) => {
                            attempts.push(FetchAttempt {
                                number,
                                strategy,
                                outcome: AttemptOutcome::Failed(error.kind.clone()),
                                latency,
                                fetched: true,
                            });
                            error
                        }
                    }
                }
            };

            let state = {
                let mut rng = rand::thread_rng();
                machine.fail(error, &mut rng).clone()
            };
            match state {
                RetryState::Backoff {
                    attempt,
                    delay,
                    next_strategy,
                    last,
                } => engine_info!(
                    "{} attempt {} failed ({}); retrying via {} in {:?}",
                    location.url(),
                    attempt,
                    last,
                    next_strategy,
                    delay
                ),
                RetryState::Exhausted { .. } => break,
                _ => {}
            }
        }

        match machine.state() {
            RetryState::Exhausted {
                attempts: count,
                last,
                retries_exhausted,
            } => {
                if last.kind != FailureKind::Cancelled {
                    engine_warn!(
                        "{} failed after {} attempt(s): {}",
                        location.url(),
                        count,
                        last
                    );
                }
                RetryReport {
                    outcome: Err(last.clone()),
                    attempts,
                    exhausted: *retries_exhausted,
                }
            }
            other => RetryReport {
                outcome: Err(FetchError::new(
                    FailureKind::Internal,
                    format!("retry loop stopped in state {other:?}"),
                )),
                attempts,
                exhausted: false,
            },
        }
    }

    /// Gate check that waits out crawl-delay spacing. Spacing waits are pacing,
    /// not attempts; every other decision is returned to the caller.
    /// `None` means the batch was cancelled first.
    async fn admit(&self, location: &Location, cancel: &CancellationToken) -> Option<GateDecision> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.gate.check_and_reserve(location).await {
                GateDecision::Denied(DenyReason::TooSoon { wait }) => {
                    engine_trace!("pacing {} for {:?}", location.host(), wait);
                    if !sleep_or_cancel(wait, cancel).await {
                        return None;
                    }
                }
                decision => return Some(decision),
            }
        }
    }

    async fn fetch(&self, location: &Location, strategy: Strategy) -> Result<RawPayload, FetchError> {
        let timeout = self.timeout_for(strategy);
        let fetcher = self.strategies.get(strategy);
        match tokio::time::timeout(timeout, fetcher.fetch(location, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::new(
                FailureKind::Timeout,
                format!("no response within {timeout:?}"),
            )),
        }
    }
}

/// Returns `false` if `cancel` fired before `delay` elapsed.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

fn cancelled() -> FetchError {
    FetchError::new(FailureKind::Cancelled, "batch cancelled")
}
