use thiserror::Error;

use crate::CheckpointError;

/// Engine-level failures. Per-target failures are never reported through
/// this type; they come back as [`crate::HarvestFailure`] values.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("failed to build http client: {0}")]
    ClientBuild(String),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}
