//! Error types.
//!
//! Two layers: [`StoreError`] is what an external collaborator reports,
//! [`CoreError`] is what the core reports upward. Every failure leaves the
//! core as one of these typed values; nothing is allowed to escape as a panic.

use kyoyu_types::{PayloadError, RecordId, RecordKind};
use thiserror::Error;

use crate::gate::Denied;

/// Failure reported by a store (record, grant, profile, or session backend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Unique constraint violated (e.g. a duplicate share grant).
    #[error("unique constraint violated")]
    Conflict,

    /// Target row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend refused the operation (authorization policy, bad input).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Transport or storage failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// True for the "already exists" outcome of a unique constraint.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by the core to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// No principal was supplied. The caller should send the user to sign-in.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Sign-in was refused because the account's email is unconfirmed.
    #[error("email not confirmed: {0}")]
    EmailNotConfirmed(String),

    /// One half (or both) of a resolution failed; nothing was merged.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The local mutation gate refused the action. Never reached the network.
    #[error("mutation denied: {0}")]
    MutationDenied(#[from] Denied),

    /// The store refused an insert, update, or delete.
    #[error("mutation rejected: {0}")]
    MutationRejected(String),

    /// The payload failed validation before being sent.
    #[error("invalid {kind}: {source}")]
    Invalid {
        kind: RecordKind,
        #[source]
        source: PayloadError,
    },

    /// The record is not part of the current view.
    #[error("record not in view: {0}")]
    UnknownRecord(RecordId),
}

impl CoreError {
    pub(crate) fn fetch_failed(side: &str, err: StoreError) -> Self {
        Self::FetchFailed(format!("{side}: {err}"))
    }

    pub(crate) fn rejected(err: StoreError) -> Self {
        Self::MutationRejected(err.to_string())
    }

    /// Whether the failure happened locally, before any store round trip.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated
                | Self::MutationDenied(_)
                | Self::Invalid { .. }
                | Self::UnknownRecord(_)
        )
    }
}

/// Core result type.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_detection() {
        assert!(StoreError::Conflict.is_conflict());
        assert!(!StoreError::backend("timeout").is_conflict());
    }

    #[test]
    fn test_fetch_failed_names_the_side() {
        let err = CoreError::fetch_failed("owned", StoreError::backend("connection reset"));
        let msg = err.to_string();
        assert!(msg.contains("owned"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_denied_converts_and_is_local() {
        let err: CoreError = Denied::NotOwner.into();
        assert_eq!(err.to_string(), "mutation denied: not-owner");
        assert!(err.is_local());
        assert!(!CoreError::MutationRejected("policy".into()).is_local());
    }
}
