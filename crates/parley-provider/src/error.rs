use thiserror::Error;

/// Errors from external speech/language/telephony providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider did not answer within the configured deadline.
    #[error("provider call '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// The request never completed at the transport level (DNS, connect,
    /// reset). These are the only failures eligible for retry.
    #[error("provider transport error during '{operation}': {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// The provider answered with a non-success status.
    #[error("provider rejected '{operation}' with status {status}")]
    Api {
        operation: &'static str,
        status: u16,
    },

    /// The provider answered 2xx but the body was not in the expected shape.
    #[error("provider returned an invalid response for '{operation}': {message}")]
    InvalidResponse {
        operation: &'static str,
        message: String,
    },
}

impl ProviderError {
    /// Whether retrying the same request can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }
}
