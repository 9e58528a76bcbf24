//! Error taxonomy shared by every reconciler.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PeerageError {
    /// The declaration itself is unusable (self-peering, malformed selector, empty field).
    #[error("invalid_argument: {0}")]
    InvalidArgument(String),
    /// An object the operation depends on does not exist.
    #[error("not_found: {0}")]
    NotFound(String),
    /// The remote state forbids the transition (peering type conflict, foreign ownership).
    #[error("failed_precondition: {0}")]
    FailedPrecondition(String),
    /// Optimistic-concurrency clash that survived the retry budget.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The remote store could not be reached or answered with a server error.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// In-place updates are not supported for this resource.
    #[error("update not permitted: {0}")]
    UpdateNotPermitted(String),
}

pub type PeerageResult<T> = Result<T, PeerageError>;

impl PeerageError {
    pub fn invalid(msg: impl Into<String>) -> Self { Self::InvalidArgument(msg.into()) }
    pub fn not_found(msg: impl Into<String>) -> Self { Self::NotFound(msg.into()) }
    pub fn precondition(msg: impl Into<String>) -> Self { Self::FailedPrecondition(msg.into()) }
    pub fn unavailable(msg: impl Into<String>) -> Self { Self::Unavailable(msg.into()) }

    /// Short machine-friendly code, used as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            PeerageError::InvalidArgument(_) => "invalid_argument",
            PeerageError::NotFound(_) => "not_found",
            PeerageError::FailedPrecondition(_) => "failed_precondition",
            PeerageError::Conflict(_) => "conflict",
            PeerageError::Unavailable(_) => "unavailable",
            PeerageError::UpdateNotPermitted(_) => "update_not_permitted",
        }
    }

    /// Prefix the message with what was being done, keeping the variant.
    pub fn context(self, what: impl std::fmt::Display) -> Self {
        match self {
            PeerageError::InvalidArgument(m) => PeerageError::InvalidArgument(format!("{}: {}", what, m)),
            PeerageError::NotFound(m) => PeerageError::NotFound(format!("{}: {}", what, m)),
            PeerageError::FailedPrecondition(m) => PeerageError::FailedPrecondition(format!("{}: {}", what, m)),
            PeerageError::Conflict(m) => PeerageError::Conflict(format!("{}: {}", what, m)),
            PeerageError::Unavailable(m) => PeerageError::Unavailable(format!("{}: {}", what, m)),
            PeerageError::UpdateNotPermitted(m) => PeerageError::UpdateNotPermitted(format!("{}: {}", what, m)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_variant() {
        let e = PeerageError::not_found("configmap missing").context("resolving identity in liqo");
        assert_eq!(e.code(), "not_found");
        assert_eq!(e.to_string(), "not_found: resolving identity in liqo: configmap missing");
    }
}
