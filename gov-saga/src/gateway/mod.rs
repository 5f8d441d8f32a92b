//! Gateway boundary contracts.
//!
//! The orchestrator talks to three external collaborators through these
//! traits: the relational store holding off-chain records, the ledger node,
//! and the artifact upload service. Concrete transports live behind the
//! traits; the in-memory and mock adapters in this module tree are used for
//! tests and development.

pub mod memory;
pub mod mock_ledger;

use async_trait::async_trait;
use tokio::sync::broadcast;

use gov_core::types::common::{BlockHeight, Timestamp, TxHash};
use gov_core::types::event::{EventKind, LedgerEvent};
use gov_core::types::record::{NewRecord, OffChainRecord, RecordPatch};

use crate::error::SagaResult;

pub use memory::{MemoryOffChain, MemoryUploads};
pub use mock_ledger::MockLedger;

/// A ledger contract invocation
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCall {
    /// Target contract address
    pub contract: String,
    /// Function selector
    pub function: String,
    /// Encoded call arguments
    pub args: Vec<serde_json::Value>,
}

/// Opaque reference to a submitted, unconfirmed transaction.
///
/// Returned immediately on submission and consumed exactly once by the
/// confirmation waiter; deliberately not `Clone`.
#[derive(Debug)]
pub struct TransactionHandle {
    /// Hash assigned at submission
    pub tx_hash: TxHash,
    /// Submission time
    pub submitted_at: Timestamp,
}

/// Finality status of a transaction receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// Included and succeeded
    Success,
    /// Included but reverted
    Reverted,
}

/// One decoded log entry from a receipt
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Contract-side event name
    pub event: String,
    /// Event argument object
    pub args: serde_json::Value,
}

/// A finalized transaction receipt
#[derive(Debug, Clone)]
pub struct Receipt {
    /// Transaction hash
    pub tx_hash: TxHash,
    /// Finality status
    pub status: ReceiptStatus,
    /// Block the transaction was included in
    pub block_height: BlockHeight,
    /// Emitted log entries
    pub logs: Vec<LogEntry>,
}

impl Receipt {
    /// Find the first log entry for the given event kind
    pub fn find_log(&self, kind: EventKind) -> Option<&LogEntry> {
        self.logs.iter().find(|l| l.event == kind.as_str())
    }
}

/// Owned subscription to a stream of ledger events of one kind.
///
/// Dropping the subscription (or calling [`EventSubscription::unsubscribe`])
/// detaches it from the ledger's event feed.
pub struct EventSubscription {
    kind: EventKind,
    rx: broadcast::Receiver<LedgerEvent>,
}

impl EventSubscription {
    /// Create a subscription filtering a raw feed down to one event kind
    pub fn new(kind: EventKind, rx: broadcast::Receiver<LedgerEvent>) -> Self {
        Self { kind, rx }
    }

    /// Subscribed event kind
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Next event of the subscribed kind, or `None` once the feed closes.
    ///
    /// Missed events from a lagging receiver are skipped, not treated as a
    /// stream end; the dedup layer downstream tolerates gaps and repeats.
    pub async fn next(&mut self) -> Option<LedgerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.kind == self.kind => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(kind = %self.kind, missed, "event subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Explicitly detach from the event feed
    pub fn unsubscribe(self) {
        drop(self);
    }
}

/// Off-chain relational store boundary.
///
/// All operations complete before returning; callers never observe an
/// in-flight write.
#[async_trait]
pub trait OffChainGateway: Send + Sync {
    /// Create a record. Fails when the creator is missing or the slug
    /// violates the unique constraint.
    async fn create(&self, record: NewRecord) -> SagaResult<OffChainRecord>;

    /// Partially update the record with the given slug
    async fn update_by_slug(&self, slug: &str, patch: RecordPatch) -> SagaResult<OffChainRecord>;

    /// Delete and return the record with the given slug
    async fn delete_by_slug(&self, slug: &str) -> SagaResult<OffChainRecord>;
}

/// Read path over the off-chain store that may lag the write path.
///
/// The eventual-consistency resolver drives this contract: refresh the
/// cached collection, poll it, and fall back to a direct fetch that bypasses
/// the cache entirely.
#[async_trait]
pub trait RecordReadSource: Send + Sync {
    /// Invalidate and repopulate the cached collection
    async fn refresh_cache(&self) -> SagaResult<()>;

    /// The cached collection as last refreshed
    async fn cached(&self) -> Vec<OffChainRecord>;

    /// Fetch the collection directly from the source of truth
    async fn fetch_direct(&self) -> SagaResult<Vec<OffChainRecord>>;
}

/// Ledger node boundary
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Submit a state-changing transaction; returns before confirmation
    async fn submit(&self, call: &LedgerCall) -> SagaResult<TransactionHandle>;

    /// Resolve once the transaction is finalized.
    ///
    /// This future completes only at finality; callers bound it with a
    /// timeout.
    async fn wait_for_receipt(&self, tx_hash: &str) -> SagaResult<Receipt>;

    /// Read-only contract call
    async fn read_contract(
        &self,
        contract: &str,
        function: &str,
        args: &[serde_json::Value],
    ) -> SagaResult<serde_json::Value>;

    /// Subscribe to all future events of one kind
    fn subscribe_events(&self, kind: EventKind) -> EventSubscription;
}

/// A file handed to the upload gateway
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// File name
    pub name: String,
    /// MIME type
    pub content_type: String,
    /// Raw content
    pub bytes: Vec<u8>,
}

/// A stored artifact reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedArtifact {
    /// Original file name
    pub name: String,
    /// Public URL
    pub url: String,
}

/// Artifact upload boundary
#[async_trait]
pub trait UploadGateway: Send + Sync {
    /// Upload a batch of files, returning one artifact per file
    async fn upload(&self, files: Vec<UploadFile>) -> SagaResult<Vec<UploadedArtifact>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_receipt_find_log() {
        let receipt = Receipt {
            tx_hash: "0xabc".to_string(),
            status: ReceiptStatus::Success,
            block_height: 7,
            logs: vec![
                LogEntry {
                    event: "Transfer".to_string(),
                    args: json!({}),
                },
                LogEntry {
                    event: "ProposalCreated".to_string(),
                    args: json!({"proposal_id": 9}),
                },
            ],
        };

        let log = receipt.find_log(EventKind::ProposalCreated).unwrap();
        assert_eq!(log.args["proposal_id"], 9);
        assert!(receipt.find_log(EventKind::TokenDeployed).is_none());
    }

    #[tokio::test]
    async fn test_subscription_filters_by_kind() {
        let (tx, rx) = broadcast::channel(8);
        let mut sub = EventSubscription::new(EventKind::ProposalExecuted, rx);

        tx.send(LedgerEvent {
            kind: EventKind::MemberJoined,
            tx_hash: "0x1".to_string(),
            block_height: 1,
            args: json!({}),
        })
        .unwrap();
        tx.send(LedgerEvent {
            kind: EventKind::ProposalExecuted,
            tx_hash: "0x2".to_string(),
            block_height: 2,
            args: json!({"proposal_id": 4}),
        })
        .unwrap();

        let event = sub.next().await.unwrap();
        assert_eq!(event.kind, EventKind::ProposalExecuted);
        assert_eq!(event.tx_hash, "0x2");

        drop(tx);
        assert!(sub.next().await.is_none());
    }
}
