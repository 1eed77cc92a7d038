// =============================================================================
// Error taxonomy shared by every coordination-core component
// =============================================================================
//
// Every fallible operation in the core returns a `CoreError` so that callers
// can make a retry/escalate decision without matching on string messages.
// =============================================================================

use thiserror::Error;

/// Closed set of error kinds produced by the coordination core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Safe to retry; the caller should back off and try again.
    #[error("transient: {reason}")]
    Transient { reason: String },

    /// Will not succeed on retry; surface to the caller verbatim.
    #[error("terminal: {reason}")]
    Terminal { reason: String },

    /// Caller misuse — unknown handle, bad argument, invalid transition.
    #[error("contract violation: {reason}")]
    Contract { reason: String },

    /// Durable store failure. Fatal for any write path that must persist
    /// before a side effect is allowed to happen.
    #[error("persistence failure: {reason}")]
    Persistence { reason: String },

    /// Denied by a safety gate: kill switch, open breaker, lock not held.
    #[error("safety gate denied: {reason}")]
    Safety { reason: String },

    /// An external collaborator (venue, LLM provider, chat API) is down.
    #[error("external unavailable: {reason}")]
    ExternalUnavailable { reason: String },
}

impl CoreError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient { reason: reason.into() }
    }

    pub fn terminal(reason: impl Into<String>) -> Self {
        Self::Terminal { reason: reason.into() }
    }

    pub fn contract(reason: impl Into<String>) -> Self {
        Self::Contract { reason: reason.into() }
    }

    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence { reason: reason.into() }
    }

    pub fn safety(reason: impl Into<String>) -> Self {
        Self::Safety { reason: reason.into() }
    }

    pub fn external_unavailable(reason: impl Into<String>) -> Self {
        Self::ExternalUnavailable { reason: reason.into() }
    }

    /// Whether this error should count against a circuit breaker.
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::ExternalUnavailable { .. })
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Persistence { reason: e.to_string() }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence { reason: format!("json: {e}") }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
