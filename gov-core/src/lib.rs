//! GovSync Core - Shared Domain Types
//!
//! This crate provides the domain model shared between the governance write
//! orchestrator and its collaborators:
//!
//! - **Off-chain records**: the relational-store view of a governance entity
//!   (space, member, token, proposal, notification) and its state machine
//! - **Ledger events**: typed events emitted by the on-chain governance
//!   contracts, with the deduplication key used by event consumers
//! - **Common types**: identifiers, timestamps, slug derivation
//!
//! The off-chain record and the on-chain side of the same logical action are
//! joined by the record's `slug`, a stable business key generated before any
//! ledger submission so that cleanup can always locate the record.

pub mod logging;
pub mod types;

pub use types::common::{derive_slug, BlockHeight, Digest32, ProposalId, RecordId, Timestamp, TxHash};
pub use types::event::{EventKey, EventKind, LedgerEvent};
pub use types::record::{
    NewRecord, OffChainRecord, RecordKind, RecordPatch, RecordState, RecordTransitionError,
};
