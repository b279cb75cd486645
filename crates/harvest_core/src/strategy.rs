use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crate::AttemptOutcome;

/// The closed set of fetch mechanisms, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strategy {
    Light,
    Rendered,
}

impl Strategy {
    pub const ALL: [Strategy; 2] = [Strategy::Light, Strategy::Rendered];

    /// The next more capable strategy, if there is one.
    pub fn escalated(self) -> Option<Strategy> {
        match self {
            Strategy::Light => Some(Strategy::Rendered),
            Strategy::Rendered => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Strategy::Light => "light",
            Strategy::Rendered => "rendered",
        }
    }

    pub fn from_label(label: &str) -> Option<Strategy> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.label().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
    /// Consecutive insufficient light fetches that trigger escalation.
    pub threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    pub window: Duration,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            window: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrategyCounters {
    pub successes: u64,
    pub failures: u64,
}

/// Per-host success signal used to pick a starting strategy.
///
/// Escalation is sticky: once a host is escalated it stays on the rendered
/// strategy until [`StrategyStats::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyStats {
    light: StrategyCounters,
    rendered: StrategyCounters,
    insufficient_light: VecDeque<Instant>,
    escalated: bool,
}

impl StrategyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats for a host known up front to need rendering.
    pub fn pre_escalated() -> Self {
        Self {
            escalated: true,
            ..Self::default()
        }
    }

    pub fn from_parts(light: StrategyCounters, rendered: StrategyCounters, escalated: bool) -> Self {
        Self {
            light,
            rendered,
            insufficient_light: VecDeque::new(),
            escalated,
        }
    }

    pub fn preferred(&self) -> Strategy {
        if self.escalated {
            Strategy::Rendered
        } else {
            Strategy::Light
        }
    }

    /// Records one fetch outcome. Returns `true` if this outcome escalated the host.
    pub fn record(
        &mut self,
        strategy: Strategy,
        outcome: &AttemptOutcome,
        policy: &EscalationPolicy,
        now: Instant,
    ) -> bool {
        let counters = match strategy {
            Strategy::Light => &mut self.light,
            Strategy::Rendered => &mut self.rendered,
        };
        match outcome {
            AttemptOutcome::Succeeded => counters.successes += 1,
            AttemptOutcome::Failed(_) => counters.failures += 1,
        }

        if strategy != Strategy::Light {
            return false;
        }
        match outcome {
            AttemptOutcome::Succeeded => {
                self.insufficient_light.clear();
                false
            }
            AttemptOutcome::Failed(kind) if kind.signals_insufficient_strategy() => {
                self.insufficient_light.push_back(now);
                while let Some(oldest) = self.insufficient_light.front() {
                    if now.saturating_duration_since(*oldest) > policy.window {
                        self.insufficient_light.pop_front();
                    } else {
                        break;
                    }
                }
                let was_escalated = self.escalated;
                if self.insufficient_light.len() >= policy.threshold.max(1) as usize {
                    self.escalated = true;
                }
                self.escalated && !was_escalated
            }
            AttemptOutcome::Failed(_) => false,
        }
    }

    pub fn counters(&self, strategy: Strategy) -> StrategyCounters {
        match strategy {
            Strategy::Light => self.light,
            Strategy::Rendered => self.rendered,
        }
    }

    pub fn consecutive_insufficient(&self) -> usize {
        self.insufficient_light.len()
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
