//! Confirmation Waiter
//!
//! Blocks a saga step (cooperatively) until the ledger finalizes a submitted
//! transaction, then decodes the receipt's log entries into a typed domain
//! event. A transaction that finalizes without the expected event is a logic
//! mismatch between the submitted call and the contract and is surfaced as
//! an error, never ignored.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use gov_core::types::event::{EventKind, LedgerEvent};

use crate::error::{SagaError, SagaResult};
use crate::gateway::{LedgerGateway, LogEntry, Receipt, ReceiptStatus, TransactionHandle};

/// A receipt log decoded against the known governance event schemas
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    /// A space was registered; carries the ledger-assigned space id
    SpaceCreated { space_id: u64 },
    /// A proposal was created; carries the ledger-assigned proposal id
    ProposalCreated { proposal_id: u64 },
    /// A proposal was executed
    ProposalExecuted { proposal_id: u64 },
    /// A proposal was rejected
    ProposalRejected { proposal_id: u64 },
    /// A proposal expired
    ProposalExpired { proposal_id: u64 },
    /// An account joined a space
    MemberJoined { space_id: u64, member: String },
    /// A token contract was deployed
    TokenDeployed { token_address: String },
}

impl DecodedEvent {
    /// Decode a single log entry of the given kind
    pub fn from_log(kind: EventKind, log: &LogEntry) -> Option<Self> {
        if log.event != kind.as_str() {
            return None;
        }
        let u64_arg = |name: &str| log.args.get(name).and_then(|v| v.as_u64());
        let str_arg = |name: &str| {
            log.args
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        match kind {
            EventKind::SpaceCreated => Some(Self::SpaceCreated {
                space_id: u64_arg("space_id")?,
            }),
            EventKind::ProposalCreated => Some(Self::ProposalCreated {
                proposal_id: u64_arg("proposal_id")?,
            }),
            EventKind::ProposalExecuted => Some(Self::ProposalExecuted {
                proposal_id: u64_arg("proposal_id")?,
            }),
            EventKind::ProposalRejected => Some(Self::ProposalRejected {
                proposal_id: u64_arg("proposal_id")?,
            }),
            EventKind::ProposalExpired => Some(Self::ProposalExpired {
                proposal_id: u64_arg("proposal_id")?,
            }),
            EventKind::MemberJoined => Some(Self::MemberJoined {
                space_id: u64_arg("space_id")?,
                member: str_arg("member")?,
            }),
            EventKind::TokenDeployed => Some(Self::TokenDeployed {
                token_address: str_arg("token_address")?,
            }),
        }
    }

    /// Decode a subscription-delivered ledger event
    pub fn from_event(event: &LedgerEvent) -> Option<Self> {
        Self::from_log(
            event.kind,
            &LogEntry {
                event: event.kind.as_str().to_string(),
                args: event.args.clone(),
            },
        )
    }

    /// The ledger-assigned numeric identifier carried by this event, if any
    pub fn ledger_id(&self) -> Option<u64> {
        match self {
            Self::SpaceCreated { space_id } => Some(*space_id),
            Self::ProposalCreated { proposal_id }
            | Self::ProposalExecuted { proposal_id }
            | Self::ProposalRejected { proposal_id }
            | Self::ProposalExpired { proposal_id } => Some(*proposal_id),
            Self::MemberJoined { space_id, .. } => Some(*space_id),
            Self::TokenDeployed { .. } => None,
        }
    }
}

/// Decode the first matching log of `expected` kind from a receipt
pub fn decode_expected(receipt: &Receipt, expected: EventKind) -> Option<DecodedEvent> {
    receipt
        .logs
        .iter()
        .find_map(|log| DecodedEvent::from_log(expected, log))
}

/// Waits for finality and decodes the confirmation
pub struct ConfirmationWaiter {
    ledger: Arc<dyn LedgerGateway>,
    timeout: Duration,
}

impl ConfirmationWaiter {
    /// Create a waiter with the given finality bound
    pub fn new(ledger: Arc<dyn LedgerGateway>, timeout: Duration) -> Self {
        Self { ledger, timeout }
    }

    /// Consume a transaction handle, wait for finality, and decode the
    /// expected event from the receipt.
    pub async fn wait(
        &self,
        handle: TransactionHandle,
        expected: EventKind,
    ) -> SagaResult<DecodedEvent> {
        let tx_hash = handle.tx_hash;
        debug!(tx_hash = %tx_hash, expected = %expected, "waiting for confirmation");

        let receipt = tokio::time::timeout(self.timeout, self.ledger.wait_for_receipt(&tx_hash))
            .await
            .map_err(|_| SagaError::ConfirmationTimeout {
                tx_hash: tx_hash.clone(),
                waited_secs: self.timeout.as_secs(),
            })??;

        if receipt.status == ReceiptStatus::Reverted {
            return Err(SagaError::OnChainSubmission(format!(
                "transaction {} reverted at block {}",
                tx_hash, receipt.block_height
            )));
        }

        let decoded = decode_expected(&receipt, expected).ok_or(SagaError::EventNotFound {
            tx_hash: tx_hash.clone(),
            expected,
        })?;

        info!(
            tx_hash = %tx_hash,
            block_height = receipt.block_height,
            event = %expected,
            "transaction confirmed"
        );
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{LedgerCall, MockLedger};
    use serde_json::json;

    fn proposal_call() -> LedgerCall {
        LedgerCall {
            contract: "0xgov".to_string(),
            function: "createProposal".to_string(),
            args: vec![json!({"kind": "change_voting_method"})],
        }
    }

    #[test]
    fn test_decode_from_log() {
        let log = LogEntry {
            event: "ProposalCreated".to_string(),
            args: json!({"proposal_id": 42}),
        };
        let decoded = DecodedEvent::from_log(EventKind::ProposalCreated, &log).unwrap();
        assert_eq!(decoded, DecodedEvent::ProposalCreated { proposal_id: 42 });
        assert_eq!(decoded.ledger_id(), Some(42));

        // Kind mismatch decodes to nothing
        assert!(DecodedEvent::from_log(EventKind::TokenDeployed, &log).is_none());
    }

    #[test]
    fn test_decode_missing_args() {
        let log = LogEntry {
            event: "MemberJoined".to_string(),
            args: json!({"space_id": 3}),
        };
        // member argument missing
        assert!(DecodedEvent::from_log(EventKind::MemberJoined, &log).is_none());
    }

    #[tokio::test]
    async fn test_wait_decodes_expected_event() {
        let ledger = Arc::new(MockLedger::new());
        let waiter = ConfirmationWaiter::new(ledger.clone(), Duration::from_secs(5));

        let handle = ledger.submit(&proposal_call()).await.unwrap();
        let decoded = waiter
            .wait(handle, EventKind::ProposalCreated)
            .await
            .unwrap();
        assert!(matches!(decoded, DecodedEvent::ProposalCreated { .. }));
    }

    #[tokio::test]
    async fn test_wait_event_not_found() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_withhold_logs(true);
        let waiter = ConfirmationWaiter::new(ledger.clone(), Duration::from_secs(5));

        let handle = ledger.submit(&proposal_call()).await.unwrap();
        let err = waiter
            .wait(handle, EventKind::ProposalCreated)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::EventNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_never_finalize(true);
        let waiter = ConfirmationWaiter::new(ledger.clone(), Duration::from_secs(30));

        let handle = ledger.submit(&proposal_call()).await.unwrap();
        let err = waiter
            .wait(handle, EventKind::ProposalCreated)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::ConfirmationTimeout { .. }));
    }

    #[tokio::test]
    async fn test_wait_surfaces_revert() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_revert_next(true);
        let waiter = ConfirmationWaiter::new(ledger.clone(), Duration::from_secs(5));

        let handle = ledger.submit(&proposal_call()).await.unwrap();
        let err = waiter
            .wait(handle, EventKind::ProposalCreated)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::OnChainSubmission(_)));
    }
}
