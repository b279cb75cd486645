//! Harvest engine: the async side of polite harvesting.
//!
//! Wires the pure rules from `harvest_core` to HTTP, render backends and
//! tokio tasks. The entry point is [`HarvestEngine`].
mod checkpoint;
mod engine;
mod error;
mod fetch;
mod gate;
mod normalize;
mod retry;
mod selector;
mod settings;
mod signals;
mod types;

pub use checkpoint::{
    load_checkpoint, save_checkpoint, Checkpoint, CheckpointError, HostRecord, RuleRecord,
    StrategyRecord,
};
pub use engine::HarvestEngine;
pub use error::EngineError;
#[cfg(feature = "chromium")]
pub use fetch::ChromiumBackend;
pub use fetch::{
    Fetcher, LightFetch, RenderBackend, RenderRequest, RenderedFetch, RenderedPage, StrategyTable,
};
pub use gate::{
    DirectiveError, DirectiveSource, GateDecision, HostSnapshot, HttpDirectiveSource, PolicyGate,
    Reservation, MAX_ROBOTS_BYTES,
};
pub use normalize::{NormalizeError, Normalizer, PageSummary, PageSummaryNormalizer, PassthroughNormalizer};
pub use retry::{RetryCoordinator, RetryReport};
pub use selector::{StrategySelector, StrategySnapshot};
pub use settings::{HarvestSettings, RateBudget};
pub use signals::{decode_body, visible_text, ContentSignals};
pub use types::{BatchReport, HarvestFailure, HarvestResult, Harvested, RawPayload};
