//! Saga Coordinator
//!
//! One generic engine executes every governance action as an ordered
//! pipeline of typed steps:
//!
//! ```text
//! validate → create off-chain → submit + confirm → upload → link
//! ```
//!
//! The off-chain creation runs first and unconditionally: it needs no
//! ledger and produces the durable slug compensation uses to locate the
//! record. Any failure up to and including confirmation deletes that record
//! again. Once the ledger transaction is confirmed nothing is rolled back —
//! later upload or linking failures are surfaced as warnings on a partial
//! result, and failed write-backs are handed to the link retry queue.

pub mod definitions;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use gov_core::types::record::{OffChainRecord, RecordPatch, RecordState};

use crate::confirm::ConfirmationWaiter;
use crate::config::OrchestratorConfig;
use crate::error::{SagaError, SagaFailure, SagaResult};
use crate::gateway::{LedgerGateway, OffChainGateway, UploadGateway};
use crate::link_retry::LinkRetryQueue;
use crate::metrics::SagaMetrics;
use crate::task::TaskTracker;

pub use definitions::{
    AddMember, ChangeEntryMethod, ChangeVotingMethod, CreateSpace, EntryMethod, GovernanceAction,
    IssueToken, MintToTreasury, SagaPlan, VotingMethod,
};

/// Step name: off-chain record creation
pub const CREATE_OFFCHAIN: &str = "CREATE_OFFCHAIN";
/// Step name: ledger submission and confirmation
pub const SUBMIT_ONCHAIN: &str = "SUBMIT_ONCHAIN";
/// Step name: side-artifact uploads
pub const UPLOAD_FILES: &str = "UPLOAD_FILES";
/// Step name: write-back of ledger id and artifact references
pub const LINK_RECORDS: &str = "LINK_RECORDS";

/// Aggregated result of a saga run.
///
/// A run that hit post-confirmation trouble still returns an output; the
/// warnings list and `requires_manual_reconciliation` make the partial
/// nature explicit.
#[derive(Debug, Clone)]
pub struct SagaOutput {
    /// The off-chain record as last observed
    pub record: OffChainRecord,
    /// Ledger-assigned identifier extracted from the confirmation
    pub ledger_id: Option<u64>,
    /// Hash of the submitted transaction, if one was submitted
    pub tx_hash: Option<String>,
    /// URLs of uploaded artifacts
    pub artifact_urls: Vec<String>,
    /// Post-confirmation errors that did not abort the run
    pub warnings: Vec<SagaError>,
    /// Whether an operator may need to reconcile the two systems by hand
    pub requires_manual_reconciliation: bool,
}

/// Executes governance sagas against the gateway boundaries
pub struct SagaCoordinator {
    offchain: Arc<dyn OffChainGateway>,
    ledger: Arc<dyn LedgerGateway>,
    uploads: Arc<dyn UploadGateway>,
    tracker: Arc<TaskTracker>,
    waiter: ConfirmationWaiter,
    link_retry: Arc<LinkRetryQueue>,
    metrics: Arc<SagaMetrics>,
    config: OrchestratorConfig,
    cancel_requested: AtomicBool,
}

impl SagaCoordinator {
    /// Create a coordinator
    pub fn new(
        offchain: Arc<dyn OffChainGateway>,
        ledger: Arc<dyn LedgerGateway>,
        uploads: Arc<dyn UploadGateway>,
        link_retry: Arc<LinkRetryQueue>,
        metrics: Arc<SagaMetrics>,
        config: OrchestratorConfig,
    ) -> Self {
        let waiter = ConfirmationWaiter::new(ledger.clone(), config.confirmation_timeout());
        Self {
            offchain,
            ledger,
            uploads,
            tracker: Arc::new(TaskTracker::new()),
            waiter,
            link_retry,
            metrics,
            config,
            cancel_requested: AtomicBool::new(false),
        }
    }

    /// Task tracker driving caller-visible progress
    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    /// Request cancellation of the in-flight run.
    ///
    /// Honored only before the ledger submission step; once a transaction is
    /// submitted the run continues to completion or failure.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Execute one governance action end to end
    pub async fn run(&self, action: &GovernanceAction) -> Result<SagaOutput, SagaFailure> {
        let result = self.run_inner(action).await;
        // A cancel that arrived too late to be honored must not leak into
        // the next run
        self.cancel_requested.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self, action: &GovernanceAction) -> Result<SagaOutput, SagaFailure> {
        self.metrics.saga_started();

        // Validate before any side effect
        let plan = match action.plan(&self.config) {
            Ok(plan) => plan,
            Err(e) => {
                self.metrics.saga_failed();
                return Err(SagaFailure::from_error(e, false, None));
            }
        };

        self.tracker.declare(plan.step_names()).await;
        let slug = plan.record.slug.clone();
        info!(action = plan.action, slug = %slug, "saga started");

        // Off-chain creation: runs first, produces the durable slug
        self.tracker.start(CREATE_OFFCHAIN).await;
        let mut record = match self.offchain.create(plan.record.clone()).await {
            Ok(record) => record,
            Err(e) => {
                self.tracker.fail(CREATE_OFFCHAIN, e.to_string()).await;
                self.metrics.saga_failed();
                return Err(SagaFailure::from_error(e, false, Some(slug)));
            }
        };
        self.tracker.complete(CREATE_OFFCHAIN).await;

        if self.cancel_requested.swap(false, Ordering::SeqCst) {
            self.compensate(&slug).await;
            self.metrics.saga_failed();
            return Err(SagaFailure::from_error(SagaError::Cancelled, false, Some(slug)));
        }

        // Ledger submission and confirmation
        let mut decoded = None;
        let mut tx_hash = None;
        let mut ledger_committed = false;

        if let Some((call, expected)) = &plan.ledger_call {
            self.tracker.start(SUBMIT_ONCHAIN).await;

            let handle = match self.ledger.submit(call).await {
                Ok(handle) => handle,
                Err(e) => {
                    self.tracker.fail(SUBMIT_ONCHAIN, e.to_string()).await;
                    self.compensate(&slug).await;
                    self.metrics.saga_failed();
                    return Err(SagaFailure::from_error(e, false, Some(slug)));
                }
            };
            tx_hash = Some(handle.tx_hash.clone());

            match self.waiter.wait(handle, *expected).await {
                Ok(event) => {
                    decoded = Some(event);
                    ledger_committed = true;
                    self.tracker.complete(SUBMIT_ONCHAIN).await;
                }
                Err(e) => {
                    self.tracker.fail(SUBMIT_ONCHAIN, e.to_string()).await;
                    self.compensate(&slug).await;
                    self.metrics.saga_failed();
                    return Err(SagaFailure::from_error(e, false, Some(slug)));
                }
            }
        }

        // Side-artifact uploads, concurrently per file
        let mut warnings = Vec::new();
        let mut artifact_urls = Vec::new();

        if !plan.uploads.is_empty() {
            self.tracker.start(UPLOAD_FILES).await;
            match self.upload_all(&plan).await {
                Ok(urls) => {
                    artifact_urls = urls;
                    self.tracker.complete(UPLOAD_FILES).await;
                }
                Err(e) => {
                    self.tracker.fail(UPLOAD_FILES, e.to_string()).await;
                    if ledger_committed {
                        // The ledger effect is irreversible; carry on and
                        // make sure the linking write-back still happens
                        warn!(slug = %slug, error = %e, "upload failed after ledger commit");
                        warnings.push(e);
                    } else {
                        self.compensate(&slug).await;
                        self.metrics.saga_failed();
                        return Err(SagaFailure::from_error(e, false, Some(slug)));
                    }
                }
            }
        }

        // Linking write-back: idempotent, retried, never compensated
        self.tracker.start(LINK_RECORDS).await;
        let ledger_id = decoded.as_ref().and_then(|d| d.ledger_id());
        let target_state = if ledger_committed {
            RecordState::Linked
        } else {
            RecordState::Active
        };
        let patch = RecordPatch {
            state: Some(target_state),
            linked_ledger_id: ledger_id,
            ledger_tx_hash: if ledger_committed { tx_hash.clone() } else { None },
            artifact_urls: if artifact_urls.is_empty() {
                None
            } else {
                Some(artifact_urls.clone())
            },
            fields: plan.link_fields.clone(),
        };

        match self.link_with_retry(&slug, patch.clone()).await {
            Ok(linked) => {
                record = linked;
                self.tracker.complete(LINK_RECORDS).await;
            }
            Err(e) => {
                let link_error = SagaError::Linking {
                    slug: slug.clone(),
                    reason: e.to_string(),
                };
                self.tracker.fail(LINK_RECORDS, link_error.to_string()).await;
                self.link_retry.enqueue(&slug, patch, e.to_string()).await;
                warnings.push(link_error);
            }
        }

        let requires_manual_reconciliation = ledger_committed && !warnings.is_empty();
        if warnings.is_empty() {
            self.metrics.saga_completed();
            info!(action = plan.action, slug = %slug, "saga completed");
        } else {
            self.metrics.saga_partial();
            warn!(
                action = plan.action,
                slug = %slug,
                warnings = warnings.len(),
                "saga completed partially"
            );
        }

        Ok(SagaOutput {
            record,
            ledger_id,
            tx_hash,
            artifact_urls,
            warnings,
            requires_manual_reconciliation,
        })
    }

    /// Upload every file of the plan concurrently; any failure aborts the
    /// step once all uploads have settled.
    async fn upload_all(&self, plan: &SagaPlan) -> SagaResult<Vec<String>> {
        let mut handles = Vec::with_capacity(plan.uploads.len());
        for file in plan.uploads.clone() {
            let gateway = self.uploads.clone();
            handles.push(tokio::spawn(
                async move { gateway.upload(vec![file]).await },
            ));
        }

        let mut urls = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(artifacts)) => {
                    urls.extend(artifacts.into_iter().map(|a| a.url));
                }
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(SagaError::Upload(format!("upload task failed: {}", e)));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(urls),
        }
    }

    /// Apply the linking patch with a small inline retry budget
    async fn link_with_retry(&self, slug: &str, patch: RecordPatch) -> SagaResult<OffChainRecord> {
        let attempts = self.config.link_inline_attempts.max(1);
        let mut last_error = SagaError::Linking {
            slug: slug.to_string(),
            reason: "no attempt made".to_string(),
        };

        for attempt in 1..=attempts {
            match self.offchain.update_by_slug(slug, patch.clone()).await {
                Ok(record) => {
                    info!(slug, ledger_id = ?record.linked_ledger_id, "record linked");
                    return Ok(record);
                }
                Err(e) => {
                    debug!(slug, attempt, error = %e, "link write-back attempt failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Delete the record created by this run. Idempotent; secondary
    /// failures are logged, never raised, so the original error stays the
    /// one the caller sees.
    async fn compensate(&self, slug: &str) {
        self.metrics.compensation_run();
        match self.offchain.delete_by_slug(slug).await {
            Ok(_) => info!(slug, "compensation: provisional record deleted"),
            Err(e) => warn!(slug, error = %e, "compensation delete failed"),
        }
    }
}
