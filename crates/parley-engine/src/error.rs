use parley_provider::ProviderError;
use parley_runs::RunStoreError;
use parley_types::RunStatus;
use thiserror::Error;

/// Typed results for every state-machine operation.
///
/// Webhook handlers never let these cross the provider boundary — they log
/// and answer with valid markup regardless. Web-channel operations surface
/// the kind to the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation requires a status the run does not hold.
    #[error("run {run_id} is {status}, operation not valid in this state")]
    InvalidState { run_id: String, status: RunStatus },

    /// The owner is at their concurrency ceiling. Not auto-retried.
    #[error("owner {owner_id} is at their concurrency ceiling")]
    ConcurrencyExceeded { owner_id: String },

    /// Unknown run or agent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller's input cannot be acted on (e.g. phone run without a number).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An external provider call failed after bounded retries.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// An event arrived for a run no longer in the state it presupposes.
    /// Logged and dropped at the webhook boundary, never surfaced there.
    #[error("stale event for run {run_id}: {reason}")]
    StaleEvent { run_id: String, reason: String },

    /// Run-store failure.
    #[error("run store error: {0}")]
    Store(RunStoreError),

    /// Pool exhaustion or task join failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RunStoreError> for EngineError {
    fn from(err: RunStoreError) -> Self {
        match err {
            RunStoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}
