//! End-to-end saga scenarios against the in-memory gateways.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gov_core::types::event::EventKind;
use gov_core::types::record::RecordState;
use gov_saga::{
    AddMember, CreateSpace, EntryMethod, GovernanceAction, MemoryOffChain, MemoryUploads,
    MockLedger, NoticeHandler, OrchestratorConfig, SagaError, SagaService, UploadFile,
    VotingMethod,
};

struct Harness {
    store: Arc<MemoryOffChain>,
    ledger: Arc<MockLedger>,
    uploads: Arc<MemoryUploads>,
    service: SagaService,
}

fn harness(config: OrchestratorConfig) -> Harness {
    let store = Arc::new(MemoryOffChain::new());
    let ledger = Arc::new(MockLedger::new());
    let uploads = Arc::new(MemoryUploads::new());
    let service = SagaService::new(
        store.clone(),
        store.clone(),
        ledger.clone(),
        uploads.clone(),
        config,
    );
    Harness {
        store,
        ledger,
        uploads,
        service,
    }
}

fn create_space_action(slug: Option<&str>, images: Vec<UploadFile>) -> GovernanceAction {
    GovernanceAction::CreateSpace(CreateSpace {
        title: "Builders Collective".to_string(),
        description: "A space for builders".to_string(),
        creator: "0xcafe".to_string(),
        entry_method: EntryMethod::Open,
        voting_method: VotingMethod::MemberOneVote,
        slug: slug.map(str::to_string),
        images,
    })
}

fn logo() -> UploadFile {
    UploadFile {
        name: "logo.png".to_string(),
        content_type: "image/png".to_string(),
        bytes: vec![0x89, 0x50, 0x4e, 0x47],
    }
}

#[tokio::test]
async fn create_space_links_ledger_id() {
    let h = harness(OrchestratorConfig::development());

    let report = h.service.run(create_space_action(None, vec![])).await;

    let output = report.result.expect("saga should succeed");
    assert_eq!(report.progress, 100);
    assert!(report.task_state.is_complete());
    assert!(output.warnings.is_empty());
    assert!(!output.requires_manual_reconciliation);

    let record = h.store.get(&output.record.slug).await.unwrap();
    assert_eq!(record.state, RecordState::Linked);
    assert_eq!(record.linked_ledger_id, Some(1));
    assert_eq!(record.ledger_tx_hash, output.tx_hash);
    assert_eq!(h.ledger.submission_count().await, 1);
}

#[tokio::test]
async fn submission_failure_compensates_offchain_record() {
    // Ledger submission fails for a caller-supplied slug: the off-chain
    // record is created then deleted, and exactly one submission error is
    // reported.
    let h = harness(OrchestratorConfig::development());
    h.ledger.fail_next_submit("missing signer").await;

    let action = GovernanceAction::AddMember(AddMember {
        space_slug: "builders".to_string(),
        space_ledger_id: Some(1),
        member: "0xbeef".to_string(),
        creator: "0xcafe".to_string(),
        slug: Some("add-member-42".to_string()),
    });
    let report = h.service.run(action).await;

    let failure = report.result.expect_err("saga should fail");
    assert_eq!(failure.errors.len(), 1);
    assert!(matches!(failure.first(), SagaError::OnChainSubmission(_)));
    assert!(!failure.ledger_committed);
    assert_eq!(failure.slug.as_deref(), Some("add-member-42"));
    assert!(report.progress < 100);

    // Compensation ran: the record no longer exists
    assert!(h.store.get("add-member-42").await.is_none());
    let stats = h.store.stats().await;
    assert_eq!(stats.creates, 1);
    assert_eq!(stats.deletes, 1);
}

#[tokio::test]
async fn offchain_only_saga_makes_no_ledger_calls() {
    let h = harness(OrchestratorConfig::offchain_only());

    let report = h
        .service
        .run(create_space_action(Some("builders"), vec![logo()]))
        .await;

    let output = report.result.expect("saga should succeed");
    assert_eq!(report.progress, 100);
    assert!(output.ledger_id.is_none());
    assert!(output.tx_hash.is_none());
    assert_eq!(output.artifact_urls, vec!["memory://uploads/logo.png"]);

    // No ledger interaction at all
    assert_eq!(h.ledger.submission_count().await, 0);

    // Without a ledger half the record activates directly
    let record = h.store.get("builders").await.unwrap();
    assert_eq!(record.state, RecordState::Active);
    assert!(record.linked_ledger_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn confirmation_timeout_compensates() {
    let h = harness(OrchestratorConfig::development());
    h.ledger.set_never_finalize(true);

    let report = h
        .service
        .run(create_space_action(Some("builders"), vec![]))
        .await;

    let failure = report.result.expect_err("saga should fail");
    assert!(matches!(
        failure.first(),
        SagaError::ConfirmationTimeout { .. }
    ));
    assert!(h.store.get("builders").await.is_none());
}

#[tokio::test]
async fn missing_event_compensates() {
    let h = harness(OrchestratorConfig::development());
    h.ledger.set_withhold_logs(true);

    let report = h
        .service
        .run(create_space_action(Some("builders"), vec![]))
        .await;

    let failure = report.result.expect_err("saga should fail");
    assert!(matches!(failure.first(), SagaError::EventNotFound { .. }));
    assert!(h.store.get("builders").await.is_none());
}

#[tokio::test]
async fn upload_failure_after_commit_is_partial_success() {
    let h = harness(OrchestratorConfig::development());
    h.uploads.fail_with("storage quota exceeded").await;

    let report = h
        .service
        .run(create_space_action(Some("builders"), vec![logo()]))
        .await;

    // The ledger effect happened, so the run reports a partial success
    // instead of compensating
    let output = report.result.expect("partial success, not failure");
    assert_eq!(output.warnings.len(), 1);
    assert!(matches!(output.warnings[0], SagaError::Upload(_)));
    assert!(output.requires_manual_reconciliation);
    assert!(report.progress < 100);

    // The record survived and the linking write-back still landed
    let record = h.store.get("builders").await.unwrap();
    assert_eq!(record.state, RecordState::Linked);
    assert_eq!(record.linked_ledger_id, output.ledger_id);
    assert!(record.artifact_urls.is_empty());
}

#[tokio::test]
async fn cancellation_before_submission_deletes_record() {
    let h = harness(OrchestratorConfig::development());

    h.service.cancel();
    let report = h
        .service
        .run(create_space_action(Some("builders"), vec![]))
        .await;

    let failure = report.result.expect_err("cancelled run fails");
    assert!(matches!(failure.first(), SagaError::Cancelled));
    assert!(!failure.ledger_committed);

    // Same cleanup path as failure compensation; no ledger call was made
    assert!(h.store.get("builders").await.is_none());
    assert_eq!(h.ledger.submission_count().await, 0);

    // The cancel does not leak into the next run
    let report = h
        .service
        .run(create_space_action(Some("builders"), vec![]))
        .await;
    assert!(report.result.is_ok());
}

#[tokio::test]
async fn rerun_with_same_slug_does_not_duplicate() {
    let h = harness(OrchestratorConfig::development());

    let first = h
        .service
        .run(create_space_action(Some("builders"), vec![]))
        .await;
    assert!(first.result.is_ok());

    let second = h
        .service
        .run(create_space_action(Some("builders"), vec![]))
        .await;
    let failure = second.result.expect_err("duplicate slug must be rejected");
    assert!(failure.first().to_string().contains("unique constraint"));

    // The record from the first run is untouched
    let record = h.store.get("builders").await.unwrap();
    assert_eq!(record.state, RecordState::Linked);
    assert_eq!(h.store.stats().await.records, 1);
}

#[tokio::test]
async fn duplicate_event_delivery_applies_once() {
    let h = harness(OrchestratorConfig::development());

    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let handler: NoticeHandler = Arc::new(move |_notice| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let handle = h.service.watch(EventKind::ProposalExecuted, Some(7), handler);

    for _ in 0..2 {
        h.ledger.emit_event(
            EventKind::ProposalExecuted,
            "0xdup",
            serde_json::json!({"proposal_id": 7}),
        );
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(h.service.metrics().events_deduplicated, 1);
    handle.unsubscribe().await;
}

#[tokio::test]
async fn reset_clears_task_state_for_reuse() {
    let h = harness(OrchestratorConfig::development());

    let report = h
        .service
        .run(create_space_action(Some("builders"), vec![]))
        .await;
    assert_eq!(report.progress, 100);

    h.service.reset().await;
    assert_eq!(h.service.progress().await, 0);
    assert!(!h.service.task_state().await.is_complete());
}

#[tokio::test]
async fn metrics_reflect_outcomes() {
    let h = harness(OrchestratorConfig::development());

    // One success
    h.service
        .run(create_space_action(Some("space-a"), vec![]))
        .await
        .result
        .unwrap();

    // One failure with compensation
    h.ledger.fail_next_submit("nonce too low").await;
    h.service
        .run(create_space_action(Some("space-b"), vec![]))
        .await
        .result
        .unwrap_err();

    let snapshot = h.service.metrics();
    assert_eq!(snapshot.sagas_started, 2);
    assert_eq!(snapshot.sagas_completed, 1);
    assert_eq!(snapshot.sagas_failed, 1);
    assert_eq!(snapshot.compensations, 1);
}

#[tokio::test]
async fn progress_is_monotonic_across_snapshots() {
    let h = harness(OrchestratorConfig::development());
    let mut rx = h.service.subscribe_tasks();

    let observed = Arc::new(tokio::sync::RwLock::new(Vec::new()));
    let sink = observed.clone();
    let observer = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let progress = rx.borrow().progress();
            sink.write().await.push(progress);
        }
    });

    let report = h
        .service
        .run(create_space_action(Some("builders"), vec![logo()]))
        .await;
    assert!(report.result.is_ok());

    tokio::time::sleep(Duration::from_millis(50)).await;
    observer.abort();

    let seen = observed.read().await.clone();
    assert!(!seen.is_empty());
    for pair in seen.windows(2) {
        assert!(pair[1] >= pair[0], "progress regressed: {:?}", seen);
    }
    assert_eq!(*seen.last().unwrap(), 100);
}
