//! Explicit per-target retry state machine.
//!
//! ```text
//! Pending -> Attempting -> Succeeded
//!                      \-> Backoff -> Attempting ...
//!                      \-> Exhausted
//! ```
//!
//! The machine is pure: callers perform the gate check and fetch for each
//! `Attempting` state, sleep through each `Backoff`, and feed outcomes back.

use std::time::Duration;

use rand::Rng;

use crate::{BackoffPolicy, Disposition, FailureKind, FetchError, Strategy};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Ceiling on attempts per target, the first attempt included.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Retry `EmptyContent` with the next more capable strategy.
    pub escalate_within_target: bool,
    /// Longest server-requested wait honoured; a longer hint ends the target.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            escalate_within_target: true,
            max_retry_after: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryState {
    Pending,
    Attempting {
        attempt: u32,
        strategy: Strategy,
    },
    Backoff {
        /// The attempt that just failed.
        attempt: u32,
        delay: Duration,
        next_strategy: Strategy,
        last: FetchError,
    },
    Succeeded {
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        last: FetchError,
        /// `true` when the ceiling was hit, `false` for a terminal failure.
        retries_exhausted: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(FailureKind),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded)
    }
}

/// One try of one target through one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAttempt {
    pub number: u32,
    pub strategy: Strategy,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
    /// `false` when the gate denied the attempt before any network call.
    pub fetched: bool,
}

#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    initial_strategy: Strategy,
    state: RetryState,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy, initial_strategy: Strategy) -> Self {
        Self {
            policy,
            initial_strategy,
            state: RetryState::Pending,
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            RetryState::Succeeded { .. } | RetryState::Exhausted { .. }
        )
    }

    /// Number of attempts started so far.
    pub fn attempts(&self) -> u32 {
        match &self.state {
            RetryState::Pending => 0,
            RetryState::Attempting { attempt, .. } | RetryState::Backoff { attempt, .. } => *attempt,
            RetryState::Succeeded { attempts } | RetryState::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Enters `Attempting` from `Pending` or `Backoff`, returning the attempt
    /// number and strategy to use. Returns `None` in any other state.
    pub fn begin_attempt(&mut self) -> Option<(u32, Strategy)> {
        let (attempt, strategy) = match &self.state {
            RetryState::Pending => (1, self.initial_strategy),
            RetryState::Backoff {
                attempt,
                next_strategy,
                ..
            } => (attempt + 1, *next_strategy),
            _ => return None,
        };
        self.state = RetryState::Attempting { attempt, strategy };
        Some((attempt, strategy))
    }

    pub fn succeed(&mut self) {
        if let RetryState::Attempting { attempt, .. } = self.state {
            self.state = RetryState::Succeeded { attempts: attempt };
        }
    }

    /// Classifies a failed attempt and moves to `Backoff` or `Exhausted`.
    pub fn fail<R: Rng>(&mut self, error: FetchError, rng: &mut R) -> &RetryState {
        let RetryState::Attempting { attempt, strategy } = self.state else {
            return &self.state;
        };
        let has_budget = attempt < self.policy.max_attempts;

        self.state = match error.kind.disposition() {
            Disposition::Terminal => RetryState::Exhausted {
                attempts: attempt,
                last: error,
                retries_exhausted: false,
            },
            Disposition::Escalate => {
                let next = strategy
                    .escalated()
                    .filter(|_| self.policy.escalate_within_target);
                match next {
                    Some(next_strategy) if has_budget => RetryState::Backoff {
                        attempt,
                        delay: Duration::ZERO,
                        next_strategy,
                        last: error,
                    },
                    Some(_) => RetryState::Exhausted {
                        attempts: attempt,
                        last: error,
                        retries_exhausted: true,
                    },
                    None => RetryState::Exhausted {
                        attempts: attempt,
                        last: error,
                        retries_exhausted: false,
                    },
                }
            }
            Disposition::Retry
                if error
                    .kind
                    .retry_after()
                    .is_some_and(|hint| hint > self.policy.max_retry_after) =>
            {
                RetryState::Exhausted {
                    attempts: attempt,
                    last: error,
                    retries_exhausted: false,
                }
            }
            Disposition::Retry if has_budget => {
                let backoff = self.policy.backoff.delay(attempt, rng);
                let delay = error
                    .kind
                    .retry_after()
                    .map_or(backoff, |hint| hint.max(backoff));
                RetryState::Backoff {
                    attempt,
                    delay,
                    next_strategy: strategy,
                    last: error,
                }
            }
            Disposition::Retry => RetryState::Exhausted {
                attempts: attempt,
                last: error,
                retries_exhausted: true,
            },
        };
        &self.state
    }

    /// Ends the machine early (cancellation) unless it already finished.
    pub fn abort(&mut self, error: FetchError) {
        if !self.is_finished() {
            self.state = RetryState::Exhausted {
                attempts: self.attempts(),
                last: error,
                retries_exhausted: false,
            };
        }
    }
}
