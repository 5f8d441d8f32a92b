//! Link Write-Back Retry Queue
//!
//! Handles retry of linking write-backs that failed after the on-chain
//! transaction was already confirmed. Rolling back is not an option at that
//! point (the ledger effect is irreversible), so the failed patch is queued
//! and re-applied with backoff until it lands or its attempt budget is
//! spent. Exhaustion is kept visible: the pending entry stays in the queue
//! marked exhausted and is reported through queue stats, never silently
//! dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use gov_core::types::record::RecordPatch;

use crate::config::LinkRetryConfig;
use crate::error::SagaResult;
use crate::gateway::OffChainGateway;
use crate::metrics::SagaMetrics;

/// Retry strategy
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// No retry
    None,
    /// Fixed delay between retries
    Fixed { delay_secs: u64 },
    /// Exponential backoff
    Exponential {
        initial_delay_secs: u64,
        max_delay_secs: u64,
        multiplier: f64,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_secs: 15,
            max_delay_secs: 900,
            multiplier: 2.0,
        }
    }
}

impl RetryStrategy {
    /// Calculate delay for attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::None => Duration::ZERO,
            RetryStrategy::Fixed { delay_secs } => Duration::from_secs(*delay_secs),
            RetryStrategy::Exponential {
                initial_delay_secs,
                max_delay_secs,
                multiplier,
            } => {
                let delay = (*initial_delay_secs as f64) * multiplier.powi(attempt as i32 - 1);
                let delay = delay.min(*max_delay_secs as f64);
                Duration::from_secs(delay as u64)
            }
        }
    }
}

/// Status of a queued write-back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingLinkStatus {
    /// Waiting for its next attempt
    Pending,
    /// Write-back landed
    Succeeded,
    /// Attempt budget spent; manual reconciliation required
    Exhausted,
}

/// A queued linking write-back
#[derive(Debug, Clone)]
pub struct PendingLink {
    /// Record business key
    pub slug: String,
    /// The patch that failed to land
    pub patch: RecordPatch,
    /// Number of queued attempts so far
    pub attempts: u32,
    /// Maximum queued attempts
    pub max_attempts: u32,
    /// Earliest time of the next attempt
    pub next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Last error message
    pub last_error: Option<String>,
    /// Status
    pub status: PendingLinkStatus,
    /// Created timestamp
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Retry queue for failed linking write-backs
pub struct LinkRetryQueue {
    offchain: Arc<dyn OffChainGateway>,
    strategy: RetryStrategy,
    pending: Arc<RwLock<Vec<PendingLink>>>,
    metrics: Arc<SagaMetrics>,
    interval_secs: u64,
    max_attempts: u32,
    running: Arc<AtomicBool>,
}

impl LinkRetryQueue {
    /// Create a new retry queue
    pub fn new(
        offchain: Arc<dyn OffChainGateway>,
        config: &LinkRetryConfig,
        metrics: Arc<SagaMetrics>,
    ) -> Self {
        Self {
            offchain,
            strategy: RetryStrategy::Exponential {
                initial_delay_secs: config.initial_delay_secs,
                max_delay_secs: config.initial_delay_secs * 10,
                multiplier: 2.0,
            },
            pending: Arc::new(RwLock::new(Vec::new())),
            metrics,
            interval_secs: config.interval_secs,
            max_attempts: config.max_attempts,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set retry strategy
    pub fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Queue a write-back that failed inline
    pub async fn enqueue(&self, slug: &str, patch: RecordPatch, last_error: String) {
        let entry = PendingLink {
            slug: slug.to_string(),
            patch,
            attempts: 0,
            max_attempts: self.max_attempts,
            next_retry_at: None,
            last_error: Some(last_error),
            status: PendingLinkStatus::Pending,
            created_at: chrono::Utc::now(),
        };

        let mut pending = self.pending.write().await;
        // One queued write-back per slug; the newest patch wins
        pending.retain(|p| p.slug != entry.slug || p.status != PendingLinkStatus::Pending);
        pending.push(entry);
        self.metrics.link_retry_scheduled();

        info!(slug, "queued link write-back for retry");
    }

    /// All queued entries
    pub async fn pending(&self) -> Vec<PendingLink> {
        self.pending.read().await.clone()
    }

    /// Entries whose attempt budget is spent
    pub async fn exhausted(&self) -> Vec<PendingLink> {
        self.pending
            .read()
            .await
            .iter()
            .filter(|p| p.status == PendingLinkStatus::Exhausted)
            .cloned()
            .collect()
    }

    /// Process a single retry cycle, returning the slugs that landed
    pub async fn process_retries(&self) -> SagaResult<Vec<String>> {
        let now = chrono::Utc::now();

        let due: Vec<(String, RecordPatch)> = {
            let pending = self.pending.read().await;
            pending
                .iter()
                .filter(|entry| {
                    if entry.status != PendingLinkStatus::Pending {
                        return false;
                    }
                    match entry.next_retry_at {
                        Some(at) => now >= at,
                        None => true,
                    }
                })
                .map(|entry| (entry.slug.clone(), entry.patch.clone()))
                .collect()
        };

        let mut landed = Vec::new();

        for (slug, patch) in due {
            let result = self.offchain.update_by_slug(&slug, patch).await;

            let mut pending = self.pending.write().await;
            let Some(entry) = pending
                .iter_mut()
                .find(|p| p.slug == slug && p.status == PendingLinkStatus::Pending)
            else {
                continue;
            };

            entry.attempts += 1;
            match result {
                Ok(record) => {
                    entry.status = PendingLinkStatus::Succeeded;
                    entry.last_error = None;
                    self.metrics.link_retry_succeeded();
                    info!(slug = %record.slug, attempts = entry.attempts, "link write-back landed");
                    landed.push(slug);
                }
                Err(e) => {
                    entry.last_error = Some(e.to_string());
                    if entry.attempts >= entry.max_attempts {
                        entry.status = PendingLinkStatus::Exhausted;
                        self.metrics.link_retry_exhausted();
                        error!(
                            slug = %entry.slug,
                            attempts = entry.attempts,
                            error = %e,
                            "link write-back retry budget exhausted, manual reconciliation required"
                        );
                    } else {
                        let delay = self.strategy.delay_for_attempt(entry.attempts);
                        entry.next_retry_at = now
                            .checked_add_signed(
                                chrono::Duration::from_std(delay)
                                    .unwrap_or_else(|_| chrono::Duration::seconds(60)),
                            );
                        warn!(
                            slug = %entry.slug,
                            attempt = entry.attempts,
                            error = %e,
                            "link write-back failed, scheduling retry"
                        );
                    }
                }
            }
        }

        Ok(landed)
    }

    /// Remove entries that landed
    pub async fn cleanup_completed(&self) {
        let mut pending = self.pending.write().await;
        pending.retain(|p| p.status != PendingLinkStatus::Succeeded);
    }

    /// Start background retry processing
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("link retry queue already running");
            return;
        }

        let queue = self.clone();
        let running = self.running.clone();
        let interval_secs = self.interval_secs;

        tokio::spawn(async move {
            let mut timer = interval(Duration::from_secs(interval_secs));
            info!("link retry queue started (interval: {}s)", interval_secs);

            while running.load(Ordering::SeqCst) {
                timer.tick().await;

                match queue.process_retries().await {
                    Ok(landed) => {
                        if !landed.is_empty() {
                            debug!("landed {} queued write-backs", landed.len());
                            queue.cleanup_completed().await;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "link retry processing error");
                    }
                }
            }

            info!("link retry queue stopped");
        });
    }

    /// Stop background retry processing
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the queue loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MemoryOffChain, OffChainGateway};
    use gov_core::types::record::{NewRecord, RecordKind, RecordState};
    use serde_json::json;

    #[test]
    fn test_retry_strategy_fixed() {
        let strategy = RetryStrategy::Fixed { delay_secs: 30 };
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_secs(30));
        assert_eq!(strategy.delay_for_attempt(5), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_strategy_exponential() {
        let strategy = RetryStrategy::Exponential {
            initial_delay_secs: 15,
            max_delay_secs: 120,
            multiplier: 2.0,
        };

        assert_eq!(strategy.delay_for_attempt(1), Duration::from_secs(15));
        assert_eq!(strategy.delay_for_attempt(2), Duration::from_secs(30));
        assert_eq!(strategy.delay_for_attempt(3), Duration::from_secs(60));
        assert_eq!(strategy.delay_for_attempt(10), Duration::from_secs(120)); // capped
    }

    fn queue_with_store() -> (Arc<MemoryOffChain>, LinkRetryQueue) {
        let store = Arc::new(MemoryOffChain::new());
        let queue = LinkRetryQueue::new(
            store.clone(),
            &LinkRetryConfig {
                interval_secs: 1,
                max_attempts: 2,
                initial_delay_secs: 1,
            },
            Arc::new(SagaMetrics::new()),
        )
        .with_strategy(RetryStrategy::None);
        (store, queue)
    }

    #[tokio::test]
    async fn test_queued_write_back_lands() {
        let (store, queue) = queue_with_store();
        store
            .create(NewRecord {
                kind: RecordKind::Token,
                slug: "gov-token-1".to_string(),
                creator: "0xcafe".to_string(),
                fields: json!({}),
            })
            .await
            .unwrap();

        queue
            .enqueue(
                "gov-token-1",
                RecordPatch {
                    state: Some(RecordState::Linked),
                    linked_ledger_id: Some(9),
                    ..Default::default()
                },
                "transient store error".to_string(),
            )
            .await;

        let landed = queue.process_retries().await.unwrap();
        assert_eq!(landed, vec!["gov-token-1".to_string()]);

        let record = store.get("gov-token-1").await.unwrap();
        assert_eq!(record.linked_ledger_id, Some(9));
        assert_eq!(record.state, RecordState::Linked);
    }

    #[tokio::test]
    async fn test_exhaustion_is_kept_visible() {
        let (_store, queue) = queue_with_store();

        // No record with this slug exists, so every attempt fails
        queue
            .enqueue(
                "missing-record",
                RecordPatch {
                    linked_ledger_id: Some(1),
                    ..Default::default()
                },
                "not found".to_string(),
            )
            .await;

        assert!(queue.process_retries().await.unwrap().is_empty());
        assert!(queue.process_retries().await.unwrap().is_empty());

        let exhausted = queue.exhausted().await;
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].attempts, 2);
        assert!(exhausted[0].last_error.is_some());

        // A third cycle does not re-attempt an exhausted entry
        assert!(queue.process_retries().await.unwrap().is_empty());
        assert_eq!(queue.exhausted().await[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_newest_patch_wins_per_slug() {
        let (_store, queue) = queue_with_store();

        queue
            .enqueue(
                "slug-a",
                RecordPatch {
                    linked_ledger_id: Some(1),
                    ..Default::default()
                },
                "err".to_string(),
            )
            .await;
        queue
            .enqueue(
                "slug-a",
                RecordPatch {
                    linked_ledger_id: Some(2),
                    ..Default::default()
                },
                "err".to_string(),
            )
            .await;

        let pending = queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].patch.linked_ledger_id, Some(2));
    }
}
