//! GovSync Saga Layer - Cross-System Write Orchestration
//!
//! This crate orchestrates governance actions that span two systems: an
//! off-chain relational store and an on-chain governance ledger. Every
//! action (create space, add member, change entry method, change voting
//! method, issue token, mint to treasury) runs as a saga:
//!
//! 1. create the off-chain record (producing the durable `slug` join key)
//! 2. submit the ledger transaction and wait for its confirmation
//! 3. decode the ledger-assigned identifier from the confirmation
//! 4. upload side artifacts
//! 5. write the identifier and artifact references back into the record
//!
//! # Architecture
//!
//! - **Task State Store**: immutable per-step state snapshots and derived
//!   progress, published to subscribers
//! - **Saga Coordinator**: one engine executing declarative per-action
//!   plans, with compensating deletes for pre-confirmation failures
//! - **Confirmation Waiter**: bounded wait for finality plus typed log
//!   decoding
//! - **Reconciliation Watcher**: long-lived, deduplicating subscriptions
//!   applying off-chain effects for asynchronously observed ledger events
//! - **Eventual-Consistency Resolver**: bounded refresh/poll/bypass loop
//!   tolerating read-path lag
//! - **Link Retry Queue**: background re-application of write-backs that
//!   failed after the ledger effect was already irreversible
//!
//! # Usage
//!
//! ```rust,ignore
//! use gov_saga::{GovernanceAction, CreateSpace, OrchestratorConfig, SagaService};
//!
//! async fn example(service: SagaService) {
//!     let report = service
//!         .run(GovernanceAction::CreateSpace(CreateSpace {
//!             title: "My Space".into(),
//!             description: "".into(),
//!             creator: "0xcafe".into(),
//!             entry_method: gov_saga::EntryMethod::Open,
//!             voting_method: gov_saga::VotingMethod::MemberOneVote,
//!             slug: None,
//!             images: vec![],
//!         }))
//!         .await;
//!     assert_eq!(report.progress, 100);
//! }
//! ```

pub mod config;
pub mod confirm;
pub mod error;
pub mod gateway;
pub mod link_retry;
pub mod metrics;
pub mod resolver;
pub mod saga;
pub mod service;
pub mod task;
pub mod watcher;

pub use config::{LedgerConfig, LinkRetryConfig, OrchestratorConfig, ResolverConfig};
pub use confirm::{ConfirmationWaiter, DecodedEvent};
pub use error::{SagaError, SagaFailure, SagaResult};
pub use gateway::{
    EventSubscription, LedgerCall, LedgerGateway, LogEntry, MemoryOffChain, MemoryUploads,
    MockLedger, OffChainGateway, Receipt, ReceiptStatus, RecordReadSource, TransactionHandle,
    UploadFile, UploadGateway, UploadedArtifact,
};
pub use link_retry::{LinkRetryQueue, PendingLink, PendingLinkStatus, RetryStrategy};
pub use metrics::{MetricsSnapshot, SagaMetrics};
pub use resolver::{resolve, ResolverSettings};
pub use saga::{
    AddMember, ChangeEntryMethod, ChangeVotingMethod, CreateSpace, EntryMethod, GovernanceAction,
    IssueToken, MintToTreasury, SagaCoordinator, SagaOutput, SagaPlan, VotingMethod,
    CREATE_OFFCHAIN, LINK_RECORDS, SUBMIT_ONCHAIN, UPLOAD_FILES,
};
pub use service::{SagaRunReport, SagaService};
pub use task::{TaskEntry, TaskState, TaskStatus, TaskTracker};
pub use watcher::{NoticeHandler, ReconciliationWatcher, WatcherHandle, WatcherNotice};
