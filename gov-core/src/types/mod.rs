//! Domain type definitions.

pub mod common;
pub mod event;
pub mod record;

pub use common::{derive_slug, BlockHeight, Digest32, ProposalId, RecordId, Timestamp, TxHash};
pub use event::{EventKey, EventKind, LedgerEvent};
pub use record::{
    NewRecord, OffChainRecord, RecordKind, RecordPatch, RecordState, RecordTransitionError,
};
