use harvest_engine::{HarvestResult, PageSummary};
use serde::Serialize;

/// One stdout line per harvest result.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResultLine<'a> {
    Harvested {
        id: u64,
        target: &'a str,
        strategy: &'static str,
        attempts: u32,
        final_url: &'a str,
        fetched_at: String,
        title: Option<&'a str>,
        text_chars: usize,
        text: &'a str,
    },
    Failed {
        id: u64,
        target: &'a str,
        kind: &'static str,
        attempts: u32,
        exhausted: bool,
        detail: &'a str,
    },
    NotAttempted {
        id: u64,
        target: &'a str,
    },
}

impl<'a> From<&'a HarvestResult<PageSummary>> for ResultLine<'a> {
    fn from(result: &'a HarvestResult<PageSummary>) -> Self {
        match result {
            HarvestResult::Harvested(harvested) => ResultLine::Harvested {
                id: harvested.target.id(),
                target: harvested.target.identifier(),
                strategy: harvested.strategy.label(),
                attempts: harvested.attempts,
                final_url: &harvested.final_url,
                fetched_at: harvested.fetched_at.to_rfc3339(),
                title: harvested.record.title.as_deref(),
                text_chars: harvested.record.text_chars,
                text: &harvested.record.text,
            },
            HarvestResult::Failed(failure) => ResultLine::Failed {
                id: failure.target.id(),
                target: failure.target.identifier(),
                kind: failure.kind.label(),
                attempts: failure.attempts,
                exhausted: failure.exhausted,
                detail: &failure.detail,
            },
            HarvestResult::NotAttempted(target) => ResultLine::NotAttempted {
                id: target.id(),
                target: target.identifier(),
            },
        }
    }
}

pub fn to_json_line(result: &HarvestResult<PageSummary>) -> serde_json::Result<String> {
    serde_json::to_string(&ResultLine::from(result))
}
