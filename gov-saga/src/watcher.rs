//! Reconciliation Watcher
//!
//! Long-lived subscriptions against the ledger's event stream that apply
//! off-chain side effects for governance events, independent of whichever
//! saga (if any) produced them.
//!
//! Per watched event kind the loop is: subscribed → dispatch on event →
//! subscribed again, until explicit teardown through the returned handle.
//! Dispatch dedupes on `(tx_hash, kind)` in a set shared by every watcher,
//! filters by the caller's correlation id, and isolates per-event errors:
//! a failed dispatch is logged and counted, the subscription lives on.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gov_core::types::event::{EventKey, EventKind, LedgerEvent};
use gov_core::types::record::{NewRecord, OffChainRecord, RecordKind, RecordPatch, RecordState};

use crate::confirm::{decode_expected, DecodedEvent};
use crate::config::OrchestratorConfig;
use crate::error::{SagaError, SagaResult};
use crate::gateway::{LedgerGateway, OffChainGateway, RecordReadSource};
use crate::metrics::SagaMetrics;
use crate::resolver::{resolve, ResolverSettings};

/// Notification forwarded to the watch caller
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherNotice {
    /// A tracked proposal was executed
    ProposalExecuted { proposal_id: u64 },
    /// A tracked proposal was rejected
    ProposalRejected { proposal_id: u64 },
    /// A tracked proposal expired
    ProposalExpired { proposal_id: u64 },
    /// An account joined a space
    MemberJoined { space_slug: String, member: String },
    /// A token contract was deployed
    TokenDeployed {
        tx_hash: String,
        token_address: String,
    },
}

/// Caller callback invoked on forwarded notices
pub type NoticeHandler = Arc<dyn Fn(WatcherNotice) + Send + Sync>;

/// Owned handle to one running watcher.
///
/// Dropping the handle leaves the watcher running; call
/// [`WatcherHandle::unsubscribe`] to tear it down deterministically.
pub struct WatcherHandle {
    kind: EventKind,
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl WatcherHandle {
    /// Watched event kind
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Stop the watcher and wait for its loop to exit
    pub async fn unsubscribe(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.join.await;
    }
}

/// Watcher factory holding the shared dispatch context
pub struct ReconciliationWatcher {
    ctx: WatchContext,
}

#[derive(Clone)]
struct WatchContext {
    ledger: Arc<dyn LedgerGateway>,
    offchain: Arc<dyn OffChainGateway>,
    reads: Arc<dyn RecordReadSource>,
    governor: Option<String>,
    resolver: ResolverSettings,
    dispatched: Arc<RwLock<HashSet<EventKey>>>,
    metrics: Arc<SagaMetrics>,
}

impl ReconciliationWatcher {
    /// Create a watcher factory
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        offchain: Arc<dyn OffChainGateway>,
        reads: Arc<dyn RecordReadSource>,
        metrics: Arc<SagaMetrics>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            ctx: WatchContext {
                ledger,
                offchain,
                reads,
                governor: config.ledger.as_ref().map(|l| l.governor_address.clone()),
                resolver: ResolverSettings::from(&config.resolver),
                dispatched: Arc::new(RwLock::new(HashSet::new())),
                metrics,
            },
        }
    }

    /// Start a long-lived watcher for one event kind.
    ///
    /// With a correlation id, only events carrying that id are dispatched;
    /// unrelated events are ignored without error.
    pub fn watch(
        &self,
        kind: EventKind,
        correlation: Option<u64>,
        handler: NoticeHandler,
    ) -> WatcherHandle {
        let ctx = self.ctx.clone();
        let mut sub = ctx.ledger.subscribe_events(kind);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let join = tokio::spawn(async move {
            info!(kind = %kind, correlation, "watcher subscribed");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    maybe_event = sub.next() => {
                        match maybe_event {
                            None => {
                                warn!(kind = %kind, "event feed closed");
                                break;
                            }
                            Some(event) => {
                                if let Err(e) = ctx.dispatch(&event, correlation, &handler).await {
                                    ctx.metrics.watcher_error();
                                    warn!(
                                        kind = %kind,
                                        tx_hash = %event.tx_hash,
                                        error = %e,
                                        "event dispatch failed, watcher continues"
                                    );
                                }
                            }
                        }
                    }
                }
            }

            sub.unsubscribe();
            info!(kind = %kind, "watcher unsubscribed");
        });

        WatcherHandle {
            kind,
            shutdown_tx,
            join,
        }
    }

    /// Spawn a short-lived sub-watcher that waits for the token-deployment
    /// event of one transaction and writes the deployed address into the
    /// token record. Self-cancels on first match or after the configured
    /// timeout, whichever comes first; the handle allows earlier teardown.
    pub fn watch_token_deployment(
        &self,
        tx_hash: String,
        token_slug: String,
        timeout: std::time::Duration,
    ) -> WatcherHandle {
        let ctx = self.ctx.clone();
        let mut sub = ctx.ledger.subscribe_events(EventKind::TokenDeployed);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let join = tokio::spawn(async move {
            debug!(tx_hash = %tx_hash, slug = %token_slug, "deploy sub-watcher started");
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        debug!(tx_hash = %tx_hash, "deploy sub-watcher timed out");
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    maybe_event = sub.next() => {
                        match maybe_event {
                            None => break,
                            Some(event) if event.tx_hash == tx_hash => {
                                if let Err(e) = ctx.apply_token_deployed(&event, &token_slug).await {
                                    ctx.metrics.watcher_error();
                                    warn!(tx_hash = %tx_hash, error = %e, "deploy sub-watcher dispatch failed");
                                }
                                // First match ends the sub-watcher
                                break;
                            }
                            Some(_) => continue,
                        }
                    }
                }
            }

            sub.unsubscribe();
            debug!(tx_hash = %tx_hash, "deploy sub-watcher unsubscribed");
        });

        WatcherHandle {
            kind: EventKind::TokenDeployed,
            shutdown_tx,
            join,
        }
    }
}

impl WatchContext {
    async fn dispatch(
        &self,
        event: &LedgerEvent,
        correlation: Option<u64>,
        handler: &NoticeHandler,
    ) -> SagaResult<()> {
        let decoded = DecodedEvent::from_event(event).ok_or_else(|| {
            SagaError::Reconciliation(format!(
                "undecodable {} event in tx {}",
                event.kind, event.tx_hash
            ))
        })?;

        // Unrelated events are ignored without error and without being
        // marked dispatched
        if let Some(correlation_id) = correlation {
            if decoded.ledger_id() != Some(correlation_id) {
                debug!(
                    kind = %event.kind,
                    tx_hash = %event.tx_hash,
                    correlation_id,
                    "unrelated event ignored"
                );
                return Ok(());
            }
        }

        // At-most-once side effects, enforced at the dispatch boundary
        {
            let mut dispatched = self.dispatched.write().await;
            if !dispatched.insert(event.dedup_key()) {
                self.metrics.event_deduplicated();
                debug!(kind = %event.kind, tx_hash = %event.tx_hash, "duplicate delivery dropped");
                return Ok(());
            }
        }
        self.metrics.event_dispatched();

        match decoded {
            DecodedEvent::ProposalExecuted { proposal_id } => {
                self.on_proposal_settled(event, proposal_id, true, handler)
                    .await
            }
            DecodedEvent::ProposalRejected { proposal_id }
            | DecodedEvent::ProposalExpired { proposal_id } => {
                self.on_proposal_settled(event, proposal_id, false, handler)
                    .await
            }
            DecodedEvent::MemberJoined { space_id, member } => {
                self.on_member_joined(event, space_id, &member, handler).await
            }
            DecodedEvent::TokenDeployed { token_address } => {
                (handler)(WatcherNotice::TokenDeployed {
                    tx_hash: event.tx_hash.clone(),
                    token_address,
                });
                Ok(())
            }
            // Creation events are consumed synchronously by the saga that
            // submitted them
            DecodedEvent::SpaceCreated { .. } | DecodedEvent::ProposalCreated { .. } => {
                debug!(kind = %event.kind, "creation event needs no reconciliation");
                Ok(())
            }
        }
    }

    /// Executed / rejected / expired handling: token-deployment proposals
    /// get type-specific cleanup, everything else a generic notice.
    async fn on_proposal_settled(
        &self,
        event: &LedgerEvent,
        proposal_id: u64,
        executed: bool,
        handler: &NoticeHandler,
    ) -> SagaResult<()> {
        if self.is_token_deployment(proposal_id).await? {
            match self.find_token_record(proposal_id).await {
                Some(token) => {
                    if executed {
                        self.link_deployed_token(event, &token).await?;
                    } else {
                        let removed = self.offchain.delete_by_slug(&token.slug).await?;
                        info!(
                            slug = %removed.slug,
                            proposal_id,
                            "provisional token removed after proposal defeat"
                        );
                    }
                    Ok(())
                }
                None => Err(SagaError::Reconciliation(format!(
                    "no token record linked to proposal {}",
                    proposal_id
                ))),
            }
        } else {
            let notice = match (executed, event.kind) {
                (true, _) => WatcherNotice::ProposalExecuted { proposal_id },
                (false, EventKind::ProposalExpired) => {
                    WatcherNotice::ProposalExpired { proposal_id }
                }
                (false, _) => WatcherNotice::ProposalRejected { proposal_id },
            };
            (handler)(notice);
            Ok(())
        }
    }

    /// Member-joined handling: the space record may not have propagated to
    /// the read path yet, so it is resolved with the bounded retry loop
    /// before the derived notification is written.
    async fn on_member_joined(
        &self,
        event: &LedgerEvent,
        space_id: u64,
        member: &str,
        handler: &NoticeHandler,
    ) -> SagaResult<()> {
        let space = match resolve(
            self.reads.as_ref(),
            |r| r.kind == RecordKind::Space && r.linked_ledger_id == Some(space_id),
            &self.resolver,
        )
        .await
        {
            Ok(space) => {
                self.metrics.resolver_hit();
                space
            }
            Err(e) => {
                self.metrics.resolver_miss();
                return Err(SagaError::Reconciliation(format!(
                    "space {} not visible for member-joined event: {}",
                    space_id, e
                )));
            }
        };

        let suffix: String = event
            .tx_hash
            .trim_start_matches("0x")
            .chars()
            .take(8)
            .collect();
        self.offchain
            .create(NewRecord {
                kind: RecordKind::Notification,
                slug: format!("member-joined-{}-{}", space.slug, suffix),
                creator: member.to_string(),
                fields: serde_json::json!({
                    "event": "member_joined",
                    "space_slug": space.slug,
                    "member": member,
                }),
            })
            .await?;

        (handler)(WatcherNotice::MemberJoined {
            space_slug: space.slug,
            member: member.to_string(),
        });
        Ok(())
    }

    /// Decode the token-deployment sub-event from the execution receipt and
    /// write the deployed address into the token record.
    async fn link_deployed_token(
        &self,
        event: &LedgerEvent,
        token: &OffChainRecord,
    ) -> SagaResult<()> {
        let receipt = self.ledger.wait_for_receipt(&event.tx_hash).await?;
        let deployed =
            decode_expected(&receipt, EventKind::TokenDeployed).ok_or(SagaError::EventNotFound {
                tx_hash: event.tx_hash.clone(),
                expected: EventKind::TokenDeployed,
            })?;
        let DecodedEvent::TokenDeployed { token_address } = deployed else {
            return Err(SagaError::Reconciliation(
                "token deployment decoded to unexpected event".to_string(),
            ));
        };

        self.offchain
            .update_by_slug(
                &token.slug,
                RecordPatch {
                    state: Some(RecordState::Active),
                    fields: Some(serde_json::json!({"token_address": token_address})),
                    ..Default::default()
                },
            )
            .await?;

        info!(slug = %token.slug, token_address = %token_address, "token address linked");
        Ok(())
    }

    async fn apply_token_deployed(&self, event: &LedgerEvent, token_slug: &str) -> SagaResult<()> {
        // At-most-once across the main watchers and this sub-watcher
        {
            let mut dispatched = self.dispatched.write().await;
            if !dispatched.insert(event.dedup_key()) {
                self.metrics.event_deduplicated();
                return Ok(());
            }
        }
        self.metrics.event_dispatched();

        let token_address = event
            .arg_str("token_address")
            .ok_or_else(|| {
                SagaError::Reconciliation(format!(
                    "token-deployed event in tx {} lacks an address",
                    event.tx_hash
                ))
            })?
            .to_string();

        self.offchain
            .update_by_slug(
                token_slug,
                RecordPatch {
                    state: Some(RecordState::Active),
                    fields: Some(serde_json::json!({"token_address": token_address})),
                    ..Default::default()
                },
            )
            .await?;

        info!(slug = %token_slug, token_address = %token_address, "token address linked by sub-watcher");
        Ok(())
    }

    /// Whether the proposal's action set is exclusively token deployment
    async fn is_token_deployment(&self, proposal_id: u64) -> SagaResult<bool> {
        let Some(governor) = &self.governor else {
            return Ok(false);
        };

        let actions = self
            .ledger
            .read_contract(governor, "proposalActions", &[serde_json::json!(proposal_id)])
            .await?;
        let actions: Vec<String> = serde_json::from_value(actions)?;
        Ok(!actions.is_empty() && actions.iter().all(|a| a == "deploy_token"))
    }

    /// Find the token record linked to a proposal on the primary read path
    async fn find_token_record(&self, proposal_id: u64) -> Option<OffChainRecord> {
        match self.reads.fetch_direct().await {
            Ok(records) => records
                .into_iter()
                .find(|r| r.kind == RecordKind::Token && r.linked_ledger_id == Some(proposal_id)),
            Err(e) => {
                warn!(proposal_id, error = %e, "token record lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MemoryOffChain, MockLedger};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        ledger: Arc<MockLedger>,
        store: Arc<MemoryOffChain>,
        watcher: ReconciliationWatcher,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MockLedger::new());
        let store = Arc::new(MemoryOffChain::new());
        let watcher = ReconciliationWatcher::new(
            ledger.clone(),
            store.clone(),
            store.clone(),
            Arc::new(SagaMetrics::new()),
            &OrchestratorConfig::development(),
        );
        Fixture {
            ledger,
            store,
            watcher,
        }
    }

    fn counting_handler() -> (NoticeHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handler: NoticeHandler = Arc::new(move |_notice| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    #[tokio::test]
    async fn test_duplicate_delivery_dispatches_once() {
        let fx = fixture();
        let (handler, count) = counting_handler();
        let handle = fx
            .watcher
            .watch(EventKind::ProposalExecuted, Some(7), handler);

        // Same logical event delivered twice
        for _ in 0..2 {
            fx.ledger.emit_event(
                EventKind::ProposalExecuted,
                "0xsame",
                json!({"proposal_id": 7}),
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        handle.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_unrelated_correlation_ignored() {
        let fx = fixture();
        let (handler, count) = counting_handler();
        let handle = fx
            .watcher
            .watch(EventKind::ProposalExecuted, Some(7), handler);

        fx.ledger.emit_event(
            EventKind::ProposalExecuted,
            "0xother",
            json!({"proposal_id": 8}),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        handle.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_no_dispatch_after_unsubscribe() {
        let fx = fixture();
        let (handler, count) = counting_handler();
        let handle = fx.watcher.watch(EventKind::ProposalExecuted, None, handler);

        handle.unsubscribe().await;
        fx.ledger.emit_event(
            EventKind::ProposalExecuted,
            "0xlate",
            json!({"proposal_id": 1}),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_in_one_event_does_not_stop_watcher() {
        let fx = fixture();
        let (handler, count) = counting_handler();
        let handle = fx.watcher.watch(EventKind::ProposalExecuted, None, handler);

        // Undecodable payload: dispatch errors, subscription survives
        fx.ledger
            .emit_event(EventKind::ProposalExecuted, "0xbad", json!({}));
        // A well-formed event afterwards is still processed
        fx.ledger.emit_event(
            EventKind::ProposalExecuted,
            "0xgood",
            json!({"proposal_id": 3}),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        handle.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_rejected_token_proposal_removes_provisional_record() {
        let fx = fixture();
        fx.store
            .create(NewRecord {
                kind: RecordKind::Token,
                slug: "gov-token-1".to_string(),
                creator: "0xcafe".to_string(),
                fields: json!({"symbol": "GOV"}),
            })
            .await
            .unwrap();
        fx.store
            .update_by_slug(
                "gov-token-1",
                RecordPatch {
                    state: Some(RecordState::Linked),
                    linked_ledger_id: Some(7),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        fx.ledger
            .set_proposal_actions(7, vec!["deploy_token".to_string()])
            .await;

        let (handler, count) = counting_handler();
        let handle = fx
            .watcher
            .watch(EventKind::ProposalRejected, Some(7), handler);

        fx.ledger.emit_event(
            EventKind::ProposalRejected,
            "0xreject",
            json!({"proposal_id": 7}),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(fx.store.get("gov-token-1").await.is_none());
        // Type-specific cleanup replaces the generic notice
        assert_eq!(count.load(Ordering::SeqCst), 0);
        handle.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_executed_token_proposal_links_address() {
        let fx = fixture();
        fx.store
            .create(NewRecord {
                kind: RecordKind::Token,
                slug: "gov-token-1".to_string(),
                creator: "0xcafe".to_string(),
                fields: json!({"symbol": "GOV"}),
            })
            .await
            .unwrap();
        fx.store
            .update_by_slug(
                "gov-token-1",
                RecordPatch {
                    state: Some(RecordState::Linked),
                    linked_ledger_id: Some(9),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        fx.ledger
            .set_proposal_actions(9, vec!["deploy_token".to_string()])
            .await;
        fx.ledger
            .push_receipt(crate::gateway::Receipt {
                tx_hash: "0xexec".to_string(),
                status: crate::gateway::ReceiptStatus::Success,
                block_height: 50,
                logs: vec![crate::gateway::LogEntry {
                    event: "TokenDeployed".to_string(),
                    args: json!({"token_address": "0x7070"}),
                }],
            })
            .await;

        let (handler, _count) = counting_handler();
        let handle = fx
            .watcher
            .watch(EventKind::ProposalExecuted, Some(9), handler);

        fx.ledger.emit_event(
            EventKind::ProposalExecuted,
            "0xexec",
            json!({"proposal_id": 9}),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let token = fx.store.get("gov-token-1").await.unwrap();
        assert_eq!(token.state, RecordState::Active);
        assert_eq!(token.fields["token_address"], "0x7070");
        handle.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_member_joined_resolves_space_and_notifies() {
        let fx = fixture();
        fx.store
            .create(NewRecord {
                kind: RecordKind::Space,
                slug: "my-space".to_string(),
                creator: "0xcafe".to_string(),
                fields: json!({}),
            })
            .await
            .unwrap();
        fx.store
            .update_by_slug(
                "my-space",
                RecordPatch {
                    state: Some(RecordState::Linked),
                    linked_ledger_id: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let notices = Arc::new(RwLock::new(Vec::new()));
        let sink = notices.clone();
        let handler: NoticeHandler = Arc::new(move |notice| {
            let sink = sink.clone();
            tokio::spawn(async move { sink.write().await.push(notice) });
        });
        let handle = fx.watcher.watch(EventKind::MemberJoined, None, handler);

        fx.ledger.emit_event(
            EventKind::MemberJoined,
            "0xjoin1234",
            json!({"space_id": 3, "member": "0xbeef"}),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = notices.read().await.clone();
        assert_eq!(
            seen,
            vec![WatcherNotice::MemberJoined {
                space_slug: "my-space".to_string(),
                member: "0xbeef".to_string(),
            }]
        );
        // Derived notification record was created
        assert!(fx.store.get("member-joined-my-space-join1234").await.is_some());
        handle.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_deploy_sub_watcher_matches_by_tx_hash() {
        let fx = fixture();
        fx.store
            .create(NewRecord {
                kind: RecordKind::Token,
                slug: "gov-token-1".to_string(),
                creator: "0xcafe".to_string(),
                fields: json!({}),
            })
            .await
            .unwrap();

        let handle = fx.watcher.watch_token_deployment(
            "0xdeploy".to_string(),
            "gov-token-1".to_string(),
            Duration::from_secs(30),
        );

        // An unrelated deployment is skipped
        fx.ledger.emit_event(
            EventKind::TokenDeployed,
            "0xother",
            json!({"token_address": "0x1111"}),
        );
        fx.ledger.emit_event(
            EventKind::TokenDeployed,
            "0xdeploy",
            json!({"token_address": "0x2222"}),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let token = fx.store.get("gov-token-1").await.unwrap();
        assert_eq!(token.fields["token_address"], "0x2222");
        // First match already ended the loop; unsubscribe is a no-op join
        handle.unsubscribe().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_sub_watcher_times_out() {
        let fx = fixture();
        let handle = fx.watcher.watch_token_deployment(
            "0xnever".to_string(),
            "gov-token-1".to_string(),
            Duration::from_secs(30),
        );

        // No matching event arrives; the sub-watcher self-cancels
        tokio::time::sleep(Duration::from_secs(31)).await;
        handle.unsubscribe().await;
    }
}
