//! Off-chain record model.
//!
//! An `OffChainRecord` is the relational-store view of one governance entity.
//! It is created before the corresponding ledger transaction is submitted and
//! later linked to the ledger-assigned identifier extracted from the
//! transaction's confirmation.
//!
//! # State machine
//!
//! ```text
//! provisional ──→ linked ──→ active ──→ removed
//!      │            │                      ↑
//!      ├──→ active (no ledger half)        │
//!      └───────────────────────────────────┘
//! ```
//!
//! A record may only be deleted while provisional (cleanup of a failed run)
//! or through an explicit removal of an already-active entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::{RecordId, TxHash};

/// Kind of governance entity a record represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A governance space (DAO)
    Space,
    /// A space membership
    Member,
    /// A governance token
    Token,
    /// A governance proposal
    Proposal,
    /// A derived notification
    Notification,
}

impl RecordKind {
    /// String representation used in storage and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Space => "space",
            Self::Member => "member",
            Self::Token => "token",
            Self::Proposal => "proposal",
            Self::Notification => "notification",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Created off-chain, ledger half not yet linked
    #[default]
    Provisional,
    /// Ledger identifier written back
    Linked,
    /// Fully live entity
    Active,
    /// Deleted or compensated away
    Removed,
}

impl RecordState {
    /// Whether this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Removed)
    }

    /// Whether a transition to `target` is allowed
    pub fn can_transition_to(&self, target: RecordState) -> bool {
        match (self, target) {
            (Self::Provisional, Self::Linked) => true,
            // Sagas with no ledger half activate directly
            (Self::Provisional, Self::Active) => true,
            (Self::Provisional, Self::Removed) => true,
            (Self::Linked, Self::Active) => true,
            (Self::Linked, Self::Removed) => true,
            (Self::Active, Self::Removed) => true,
            _ => false,
        }
    }
}

/// Invalid record state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTransitionError {
    pub from: RecordState,
    pub to: RecordState,
}

impl std::fmt::Display for RecordTransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid record transition from {:?} to {:?}",
            self.from, self.to
        )
    }
}

impl std::error::Error for RecordTransitionError {}

/// Fields supplied when creating a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord {
    /// Entity kind
    pub kind: RecordKind,
    /// Stable business key, generated before ledger submission
    pub slug: String,
    /// Creator identity (required by the store)
    pub creator: String,
    /// Kind-specific payload
    pub fields: serde_json::Value,
}

/// Partial update applied to a record by slug.
///
/// `None` fields are left untouched, which makes re-applying the same patch
/// idempotent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordPatch {
    /// New lifecycle state
    pub state: Option<RecordState>,
    /// Ledger-assigned identifier
    pub linked_ledger_id: Option<u64>,
    /// Hash of the confirming transaction
    pub ledger_tx_hash: Option<TxHash>,
    /// Uploaded artifact URLs
    pub artifact_urls: Option<Vec<String>>,
    /// Kind-specific fields to merge (object-merge at the top level)
    pub fields: Option<serde_json::Value>,
}

impl RecordPatch {
    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.linked_ledger_id.is_none()
            && self.ledger_tx_hash.is_none()
            && self.artifact_urls.is_none()
            && self.fields.is_none()
    }
}

/// Off-chain record - the relational-store view of a governance entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffChainRecord {
    /// Store-assigned identifier
    pub id: RecordId,
    /// Entity kind
    pub kind: RecordKind,
    /// Stable business key (unique)
    pub slug: String,
    /// Creator identity
    pub creator: String,
    /// Lifecycle state
    pub state: RecordState,
    /// Ledger-assigned identifier (filled by the linking step)
    pub linked_ledger_id: Option<u64>,
    /// Hash of the confirming transaction (filled by the linking step)
    pub ledger_tx_hash: Option<TxHash>,
    /// Uploaded artifact URLs
    pub artifact_urls: Vec<String>,
    /// Kind-specific payload
    pub fields: serde_json::Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl OffChainRecord {
    /// Create a new provisional record
    pub fn new(id: RecordId, input: NewRecord) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: input.kind,
            slug: input.slug,
            creator: input.creator,
            state: RecordState::Provisional,
            linked_ledger_id: None,
            ledger_tx_hash: None,
            artifact_urls: Vec::new(),
            fields: input.fields,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new lifecycle state
    pub fn transition_to(&mut self, target: RecordState) -> Result<(), RecordTransitionError> {
        if !self.state.can_transition_to(target) {
            return Err(RecordTransitionError {
                from: self.state,
                to: target,
            });
        }
        self.state = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Apply a partial update.
    ///
    /// State changes go through the transition table; re-applying a patch
    /// whose state the record already holds is a no-op rather than an error,
    /// so the linking step stays idempotent.
    pub fn apply_patch(&mut self, patch: &RecordPatch) -> Result<(), RecordTransitionError> {
        if let Some(state) = patch.state {
            if state != self.state {
                self.transition_to(state)?;
            }
        }
        if let Some(id) = patch.linked_ledger_id {
            self.linked_ledger_id = Some(id);
        }
        if let Some(ref tx_hash) = patch.ledger_tx_hash {
            self.ledger_tx_hash = Some(tx_hash.clone());
        }
        if let Some(ref urls) = patch.artifact_urls {
            self.artifact_urls = urls.clone();
        }
        if let Some(ref extra) = patch.fields {
            merge_fields(&mut self.fields, extra);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether the ledger half has been linked
    pub fn is_linked(&self) -> bool {
        self.linked_ledger_id.is_some()
    }
}

/// Merge `extra` into `base` at the top object level.
fn merge_fields(base: &mut serde_json::Value, extra: &serde_json::Value) {
    match (base.as_object_mut(), extra.as_object()) {
        (Some(base_map), Some(extra_map)) => {
            for (k, v) in extra_map {
                base_map.insert(k.clone(), v.clone());
            }
        }
        _ => {
            *base = extra.clone();
        }
    }
}
