//! Orchestrator Service Layer
//!
//! Caller-facing facade over the saga coordinator, the reconciliation
//! watcher factory and the link retry queue. A caller runs governance
//! actions, observes task-by-task progress, subscribes reconciliation
//! watchers and controls the background write-back loop through this one
//! type.

use std::sync::Arc;
use tracing::info;

use gov_core::types::event::EventKind;

use crate::config::OrchestratorConfig;
use crate::error::SagaFailure;
use crate::gateway::{LedgerGateway, OffChainGateway, RecordReadSource, UploadGateway};
use crate::link_retry::{LinkRetryQueue, PendingLink};
use crate::metrics::{MetricsSnapshot, SagaMetrics};
use crate::saga::{GovernanceAction, SagaCoordinator, SagaOutput};
use crate::task::TaskState;
use crate::watcher::{NoticeHandler, ReconciliationWatcher, WatcherHandle};

/// Everything a caller observes about one saga run
#[derive(Debug)]
pub struct SagaRunReport {
    /// Final task snapshot of the run
    pub task_state: TaskState,
    /// Final derived progress
    pub progress: u8,
    /// Aggregated output or failure
    pub result: Result<SagaOutput, SagaFailure>,
}

/// Orchestrator service
pub struct SagaService {
    coordinator: SagaCoordinator,
    watcher: ReconciliationWatcher,
    link_retry: Arc<LinkRetryQueue>,
    metrics: Arc<SagaMetrics>,
    config: OrchestratorConfig,
}

impl SagaService {
    /// Wire the service against its gateway boundaries
    pub fn new(
        offchain: Arc<dyn OffChainGateway>,
        reads: Arc<dyn RecordReadSource>,
        ledger: Arc<dyn LedgerGateway>,
        uploads: Arc<dyn UploadGateway>,
        config: OrchestratorConfig,
    ) -> Self {
        let metrics = Arc::new(SagaMetrics::new());
        let link_retry = Arc::new(LinkRetryQueue::new(
            offchain.clone(),
            &config.link_retry,
            metrics.clone(),
        ));
        let coordinator = SagaCoordinator::new(
            offchain.clone(),
            ledger.clone(),
            uploads,
            link_retry.clone(),
            metrics.clone(),
            config.clone(),
        );
        let watcher =
            ReconciliationWatcher::new(ledger, offchain, reads, metrics.clone(), &config);

        info!(ledger_enabled = config.ledger_enabled(), "saga service created");
        Self {
            coordinator,
            watcher,
            link_retry,
            metrics,
            config,
        }
    }

    /// Run one governance action and report its outcome
    pub async fn run(&self, action: GovernanceAction) -> SagaRunReport {
        let result = self.coordinator.run(&action).await;
        let task_state = self.coordinator.tracker().snapshot().await;
        let progress = task_state.progress();
        SagaRunReport {
            task_state,
            progress,
            result,
        }
    }

    /// Current task snapshot
    pub async fn task_state(&self) -> TaskState {
        self.coordinator.tracker().snapshot().await
    }

    /// Current derived progress
    pub async fn progress(&self) -> u8 {
        self.coordinator.tracker().progress().await
    }

    /// Subscribe to task snapshot updates
    pub fn subscribe_tasks(&self) -> tokio::sync::watch::Receiver<TaskState> {
        self.coordinator.tracker().subscribe()
    }

    /// Return every declared step to idle for re-use
    pub async fn reset(&self) {
        self.coordinator.tracker().reset().await;
    }

    /// Request cancellation of the in-flight run (pre-submission only)
    pub fn cancel(&self) {
        self.coordinator.cancel();
    }

    /// Start a reconciliation watcher for one event kind
    pub fn watch(
        &self,
        kind: EventKind,
        correlation: Option<u64>,
        handler: NoticeHandler,
    ) -> WatcherHandle {
        self.watcher.watch(kind, correlation, handler)
    }

    /// Spawn the short-lived token-deployment sub-watcher for one
    /// transaction
    pub fn watch_token_deployment(&self, tx_hash: String, token_slug: String) -> WatcherHandle {
        self.watcher
            .watch_token_deployment(tx_hash, token_slug, self.config.deploy_watch_timeout())
    }

    /// Start the background link retry loop
    pub async fn start_background(&self) {
        self.link_retry.start().await;
    }

    /// Stop the background link retry loop
    pub fn stop_background(&self) {
        self.link_retry.stop();
    }

    /// Queued linking write-backs
    pub async fn pending_links(&self) -> Vec<PendingLink> {
        self.link_retry.pending().await
    }

    /// Write-backs whose retry budget is spent
    pub async fn exhausted_links(&self) -> Vec<PendingLink> {
        self.link_retry.exhausted().await
    }

    /// Drive one link retry cycle inline
    pub async fn process_link_retries(&self) -> crate::error::SagaResult<Vec<String>> {
        self.link_retry.process_retries().await
    }

    /// Current metric counter values
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
