use bytes::Bytes;
use chrono::{DateTime, Utc};
use harvest_core::{FailureKind, Strategy, Target, TargetId};

/// Raw content of one successful fetch, handed to the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    pub content: Bytes,
    pub content_type: Option<String>,
    pub source_url: String,
    pub final_url: String,
    pub status: u16,
    pub fetched_at: DateTime<Utc>,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Harvested<R> {
    pub target: Target,
    pub record: R,
    pub strategy: Strategy,
    pub attempts: u32,
    pub final_url: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestFailure {
    pub target: Target,
    pub kind: FailureKind,
    pub attempts: u32,
    pub detail: String,
    /// `true` when the retry ceiling was reached.
    pub exhausted: bool,
}

/// Terminal outcome for one target.
#[derive(Debug, Clone, PartialEq)]
pub enum HarvestResult<R> {
    Harvested(Harvested<R>),
    Failed(HarvestFailure),
    /// The batch was cancelled before this target was dispatched.
    NotAttempted(Target),
}

impl<R> HarvestResult<R> {
    pub fn target(&self) -> &Target {
        match self {
            HarvestResult::Harvested(harvested) => &harvested.target,
            HarvestResult::Failed(failure) => &failure.target,
            HarvestResult::NotAttempted(target) => target,
        }
    }

    pub fn target_id(&self) -> TargetId {
        self.target().id()
    }

    pub fn attempts(&self) -> u32 {
        match self {
            HarvestResult::Harvested(harvested) => harvested.attempts,
            HarvestResult::Failed(failure) => failure.attempts,
            HarvestResult::NotAttempted(_) => 0,
        }
    }

    pub fn is_harvested(&self) -> bool {
        matches!(self, HarvestResult::Harvested(_))
    }

    pub fn failure(&self) -> Option<&HarvestFailure> {
        match self {
            HarvestResult::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// A fully collected batch, in completion order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport<R> {
    pub results: Vec<HarvestResult<R>>,
}

impl<R> BatchReport<R> {
    pub fn harvested(&self) -> usize {
        self.results.iter().filter(|r| r.is_harvested()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.failure().is_some()).count()
    }

    pub fn not_attempted(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, HarvestResult::NotAttempted(_)))
            .count()
    }

    pub fn get(&self, id: TargetId) -> Option<&HarvestResult<R>> {
        self.results.iter().find(|r| r.target_id() == id)
    }
}
