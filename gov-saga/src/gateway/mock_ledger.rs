//! Scriptable ledger adapter.
//!
//! A deterministic in-process stand-in for a ledger node, used in tests and
//! development. Submissions are assigned digest-derived transaction hashes
//! and canned receipts; governance events are fanned out over a broadcast
//! channel that [`super::EventSubscription`]s filter by kind.
//!
//! Failure modes (submission rejection, withheld logs, reverts, a
//! transaction that never finalizes) are switchable per test.

use async_trait::async_trait;
use sha2::{Digest as Sha2Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

use gov_core::types::common::Timestamp;
use gov_core::types::event::{EventKind, LedgerEvent};

use crate::error::{SagaError, SagaResult};

use super::{
    EventSubscription, LedgerCall, LedgerGateway, LogEntry, Receipt, ReceiptStatus,
    TransactionHandle,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Scriptable in-process ledger
pub struct MockLedger {
    events_tx: broadcast::Sender<LedgerEvent>,
    receipts: RwLock<HashMap<String, Receipt>>,
    submitted: RwLock<Vec<LedgerCall>>,
    proposal_actions: RwLock<HashMap<u64, Vec<String>>>,
    next_space_id: AtomicU64,
    next_proposal_id: AtomicU64,
    block_height: AtomicU64,
    nonce: AtomicU64,
    finalize_delay_ms: AtomicU64,
    fail_next_submit: RwLock<Option<String>>,
    withhold_logs: AtomicBool,
    revert_next: AtomicBool,
    never_finalize: AtomicBool,
}

impl MockLedger {
    /// Create a ledger that confirms immediately
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events_tx,
            receipts: RwLock::new(HashMap::new()),
            submitted: RwLock::new(Vec::new()),
            proposal_actions: RwLock::new(HashMap::new()),
            next_space_id: AtomicU64::new(1),
            next_proposal_id: AtomicU64::new(1),
            block_height: AtomicU64::new(100),
            nonce: AtomicU64::new(0),
            finalize_delay_ms: AtomicU64::new(0),
            fail_next_submit: RwLock::new(None),
            withhold_logs: AtomicBool::new(false),
            revert_next: AtomicBool::new(false),
            never_finalize: AtomicBool::new(false),
        }
    }

    /// Delay between submission and finality
    pub fn set_finalize_delay(&self, delay: Duration) {
        self.finalize_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Reject the next submission with the given message
    pub async fn fail_next_submit(&self, message: impl Into<String>) {
        *self.fail_next_submit.write().await = Some(message.into());
    }

    /// Finalize subsequent transactions without their expected logs
    pub fn set_withhold_logs(&self, withhold: bool) {
        self.withhold_logs.store(withhold, Ordering::SeqCst);
    }

    /// Revert the next transaction at inclusion time
    pub fn set_revert_next(&self, revert: bool) {
        self.revert_next.store(revert, Ordering::SeqCst);
    }

    /// Make subsequent transactions never reach finality
    pub fn set_never_finalize(&self, never: bool) {
        self.never_finalize.store(never, Ordering::SeqCst);
    }

    /// Declare the action set of a proposal, as the governor would report it
    pub async fn set_proposal_actions(&self, proposal_id: u64, actions: Vec<String>) {
        self.proposal_actions
            .write()
            .await
            .insert(proposal_id, actions);
    }

    /// All calls submitted so far
    pub async fn submitted_calls(&self) -> Vec<LedgerCall> {
        self.submitted.read().await.clone()
    }

    /// Number of submissions so far
    pub async fn submission_count(&self) -> usize {
        self.submitted.read().await.len()
    }

    /// Register a receipt for an externally-known transaction hash.
    ///
    /// Used to model execution transactions the orchestrator did not submit
    /// itself, e.g. the receipt a reconciliation watcher decodes for a
    /// token-deployment sub-event.
    pub async fn push_receipt(&self, receipt: Receipt) {
        self.receipts
            .write()
            .await
            .insert(receipt.tx_hash.clone(), receipt);
    }

    /// Emit a governance event to all subscribers
    pub fn emit(&self, event: LedgerEvent) {
        // No subscribers is fine; the event is simply unobserved
        let _ = self.events_tx.send(event);
    }

    /// Convenience constructor-and-emit for tests
    pub fn emit_event(&self, kind: EventKind, tx_hash: &str, args: serde_json::Value) {
        self.emit(LedgerEvent {
            kind,
            tx_hash: tx_hash.to_string(),
            block_height: self.block_height.fetch_add(1, Ordering::SeqCst),
            args,
        });
    }

    fn derive_tx_hash(&self, call: &LedgerCall) -> String {
        let mut hasher = Sha256::new();
        hasher.update(call.contract.as_bytes());
        hasher.update(call.function.as_bytes());
        for arg in &call.args {
            hasher.update(arg.to_string().as_bytes());
        }
        hasher.update(
            self.nonce
                .fetch_add(1, Ordering::SeqCst)
                .to_be_bytes(),
        );
        format!("0x{}", hex::encode(hasher.finalize()))
    }

    fn logs_for_call(&self, call: &LedgerCall) -> Vec<LogEntry> {
        if self.withhold_logs.load(Ordering::SeqCst) {
            return Vec::new();
        }

        let first_arg = call.args.first().cloned().unwrap_or(serde_json::Value::Null);
        match call.function.as_str() {
            "createSpace" => vec![LogEntry {
                event: EventKind::SpaceCreated.as_str().to_string(),
                args: serde_json::json!({
                    "space_id": self.next_space_id.fetch_add(1, Ordering::SeqCst),
                }),
            }],
            "joinSpace" => vec![LogEntry {
                event: EventKind::MemberJoined.as_str().to_string(),
                args: serde_json::json!({
                    "space_id": first_arg.get("space_id").and_then(|v| v.as_u64()).unwrap_or(0),
                    "member": first_arg.get("member").and_then(|v| v.as_str()).unwrap_or("0x0"),
                }),
            }],
            "createProposal" => vec![LogEntry {
                event: EventKind::ProposalCreated.as_str().to_string(),
                args: serde_json::json!({
                    "proposal_id": self.next_proposal_id.fetch_add(1, Ordering::SeqCst),
                }),
            }],
            _ => Vec::new(),
        }
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerGateway for MockLedger {
    async fn submit(&self, call: &LedgerCall) -> SagaResult<TransactionHandle> {
        if let Some(message) = self.fail_next_submit.write().await.take() {
            return Err(SagaError::OnChainSubmission(message));
        }

        let tx_hash = self.derive_tx_hash(call);
        let status = if self.revert_next.swap(false, Ordering::SeqCst) {
            ReceiptStatus::Reverted
        } else {
            ReceiptStatus::Success
        };
        let receipt = Receipt {
            tx_hash: tx_hash.clone(),
            status,
            block_height: self.block_height.fetch_add(1, Ordering::SeqCst),
            logs: self.logs_for_call(call),
        };

        self.receipts.write().await.insert(tx_hash.clone(), receipt);
        self.submitted.write().await.push(call.clone());

        Ok(TransactionHandle {
            tx_hash,
            submitted_at: Timestamp::now(),
        })
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> SagaResult<Receipt> {
        if self.never_finalize.load(Ordering::SeqCst) {
            // Pends until the caller's timeout fires
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }

        let delay = self.finalize_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.receipts
            .read()
            .await
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| SagaError::OnChainSubmission(format!("unknown transaction {}", tx_hash)))
    }

    async fn read_contract(
        &self,
        _contract: &str,
        function: &str,
        args: &[serde_json::Value],
    ) -> SagaResult<serde_json::Value> {
        match function {
            "proposalActions" => {
                let proposal_id = args
                    .first()
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| SagaError::Validation("proposal id argument required".to_string()))?;
                let actions = self
                    .proposal_actions
                    .read()
                    .await
                    .get(&proposal_id)
                    .cloned()
                    .unwrap_or_default();
                Ok(serde_json::json!(actions))
            }
            _ => Ok(serde_json::Value::Null),
        }
    }

    fn subscribe_events(&self, kind: EventKind) -> EventSubscription {
        EventSubscription::new(kind, self.events_tx.subscribe())
    }
}
