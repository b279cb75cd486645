//! Harvest core: pure politeness, strategy and retry logic.
//!
//! Nothing in this crate performs IO or reads the clock; time is passed in
//! as `Instant`s so every rule is deterministic under test.
mod backoff;
mod bucket;
mod failure;
mod host_policy;
mod retry;
mod robots;
mod strategy;
mod target;

pub use backoff::BackoffPolicy;
pub use bucket::TokenBucket;
pub use failure::{Disposition, FailureKind, FetchError};
pub use host_policy::{instant_after, DenyReason, HostPolicy, PolicyLimits};
pub use retry::{AttemptOutcome, FetchAttempt, RetryMachine, RetryPolicy, RetryState};
pub use robots::{parse_directives, pattern_matches, DirectiveSet, PathRule, MAX_CRAWL_DELAY};
pub use strategy::{EscalationPolicy, Strategy, StrategyCounters, StrategyStats};
pub use target::{Location, Target, TargetId};
