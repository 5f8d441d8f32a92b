//! Saga Error Types
//!
//! Error definitions for the governance write orchestrator.

use thiserror::Error;

use gov_core::types::event::EventKind;
use gov_core::types::record::RecordTransitionError;

/// Saga Error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SagaError {
    /// Malformed saga input, rejected before any side effect
    #[error("invalid saga input: {0}")]
    Validation(String),

    /// Write against the relational store failed
    #[error("off-chain write failed: {0}")]
    OffChainWrite(String),

    /// The ledger rejected or could not accept the transaction
    #[error("ledger submission failed: {0}")]
    OnChainSubmission(String),

    /// The transaction did not finalize within the configured bound
    #[error("confirmation timeout after {waited_secs}s for tx {tx_hash}")]
    ConfirmationTimeout { tx_hash: String, waited_secs: u64 },

    /// The transaction finalized without emitting the expected event
    #[error("transaction {tx_hash} finalized without expected {expected} event")]
    EventNotFound {
        tx_hash: String,
        expected: EventKind,
    },

    /// Side-artifact upload failed
    #[error("artifact upload failed: {0}")]
    Upload(String),

    /// The post-confirmation write-back failed
    #[error("record linking failed for {slug}: {reason}")]
    Linking { slug: String, reason: String },

    /// An error while processing a dispatched ledger event
    #[error("reconciliation error: {0}")]
    Reconciliation(String),

    /// The eventual-consistency resolver exhausted all attempts
    #[error("entity not found after {attempts} attempts (last collection size {last_collection_size})")]
    NotFound {
        attempts: u32,
        last_collection_size: usize,
    },

    /// The saga was cancelled before ledger submission
    #[error("saga cancelled before ledger submission")]
    Cancelled,

    /// Invalid state machine transition
    #[error("invalid state transition: {0}")]
    StateTransition(String),

    /// The ledger event subscription closed unexpectedly
    #[error("event subscription closed")]
    SubscriptionClosed,
}

/// Saga Result type
pub type SagaResult<T> = Result<T, SagaError>;

impl From<RecordTransitionError> for SagaError {
    fn from(e: RecordTransitionError) -> Self {
        SagaError::StateTransition(e.to_string())
    }
}

impl From<serde_json::Error> for SagaError {
    fn from(e: serde_json::Error) -> Self {
        SagaError::Validation(format!("payload decode error: {}", e))
    }
}

/// Aggregated failure report for one saga run.
///
/// `ledger_committed` distinguishes a failure after the on-chain effect was
/// already confirmed (the record survives and manual reconciliation may be
/// required) from a pre-ledger failure (the provisional record was cleaned
/// up by compensation).
#[derive(Debug, Clone)]
pub struct SagaFailure {
    /// Errors in the order encountered; the first is the root cause
    pub errors: Vec<SagaError>,
    /// Whether the on-chain transaction was confirmed before the failure
    pub ledger_committed: bool,
    /// Business key of the off-chain record involved, if one was created
    pub slug: Option<String>,
}

impl SagaFailure {
    /// Build a failure report from a single root cause
    pub fn from_error(error: SagaError, ledger_committed: bool, slug: Option<String>) -> Self {
        Self {
            errors: vec![error],
            ledger_committed,
            slug,
        }
    }

    /// The root cause
    pub fn first(&self) -> &SagaError {
        &self.errors[0]
    }
}

impl std::fmt::Display for SagaFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ledger_committed {
            write!(f, "saga failed after ledger commit: {}", self.first())
        } else {
            write!(f, "saga failed: {}", self.first())
        }
    }
}

impl std::error::Error for SagaFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SagaError::ConfirmationTimeout {
            tx_hash: "0xabc".to_string(),
            waited_secs: 120,
        };
        assert!(err.to_string().contains("0xabc"));
        assert!(err.to_string().contains("120"));
    }

    #[test]
    fn test_not_found_display() {
        let err = SagaError::NotFound {
            attempts: 3,
            last_collection_size: 17,
        };
        assert!(err.to_string().contains('3'));
        assert!(err.to_string().contains("17"));
    }

    #[test]
    fn test_failure_report() {
        let failure = SagaFailure::from_error(
            SagaError::OnChainSubmission("no signer".to_string()),
            false,
            Some("add-member-42".to_string()),
        );
        assert_eq!(failure.errors.len(), 1);
        assert!(!failure.ledger_committed);
        assert!(failure.to_string().contains("no signer"));
    }
}
