//! Ledger event model.
//!
//! Events are emitted by the on-chain governance contracts and arrive
//! asynchronously. The same logical event may be delivered more than once
//! (re-org or duplicate delivery), so consumers dedupe on the
//! `(tx_hash, kind)` pair exposed by [`LedgerEvent::dedup_key`].

use serde::{Deserialize, Serialize};

use super::common::{BlockHeight, TxHash};

/// Event kinds emitted by the governance contracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A governance space was registered
    SpaceCreated,
    /// A proposal was created
    ProposalCreated,
    /// A proposal passed and was executed
    ProposalExecuted,
    /// A proposal was voted down
    ProposalRejected,
    /// A proposal expired without reaching quorum
    ProposalExpired,
    /// An account joined a space
    MemberJoined,
    /// A governance token contract was deployed
    TokenDeployed,
}

impl EventKind {
    /// Contract-side event name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpaceCreated => "SpaceCreated",
            Self::ProposalCreated => "ProposalCreated",
            Self::ProposalExecuted => "ProposalExecuted",
            Self::ProposalRejected => "ProposalRejected",
            Self::ProposalExpired => "ProposalExpired",
            Self::MemberJoined => "MemberJoined",
            Self::TokenDeployed => "TokenDeployed",
        }
    }

    /// Parse from a contract-side event name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SpaceCreated" => Some(Self::SpaceCreated),
            "ProposalCreated" => Some(Self::ProposalCreated),
            "ProposalExecuted" => Some(Self::ProposalExecuted),
            "ProposalRejected" => Some(Self::ProposalRejected),
            "ProposalExpired" => Some(Self::ProposalExpired),
            "MemberJoined" => Some(Self::MemberJoined),
            "TokenDeployed" => Some(Self::TokenDeployed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deduplication key for ledger events
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    /// Emitting transaction hash
    pub tx_hash: TxHash,
    /// Event kind
    pub kind: EventKind,
}

/// A ledger-emitted event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Event kind
    pub kind: EventKind,
    /// Emitting transaction hash
    pub tx_hash: TxHash,
    /// Block the event was included in
    pub block_height: BlockHeight,
    /// Typed payload (contract-specific argument object)
    pub args: serde_json::Value,
}

impl LedgerEvent {
    /// Key used by consumers to dedupe duplicate deliveries
    pub fn dedup_key(&self) -> EventKey {
        EventKey {
            tx_hash: self.tx_hash.clone(),
            kind: self.kind,
        }
    }

    /// Read a u64 argument by name
    pub fn arg_u64(&self, name: &str) -> Option<u64> {
        self.args.get(name).and_then(|v| v.as_u64())
    }

    /// Read a string argument by name
    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_roundtrip() {
        for kind in [
            EventKind::SpaceCreated,
            EventKind::ProposalCreated,
            EventKind::ProposalExecuted,
            EventKind::ProposalRejected,
            EventKind::ProposalExpired,
            EventKind::MemberJoined,
            EventKind::TokenDeployed,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("Unknown"), None);
    }

    #[test]
    fn test_dedup_key_equality() {
        let a = LedgerEvent {
            kind: EventKind::ProposalExecuted,
            tx_hash: "0xaaa".to_string(),
            block_height: 10,
            args: json!({"proposal_id": 7}),
        };
        // Same logical event re-delivered at a different block height
        let b = LedgerEvent {
            block_height: 11,
            ..a.clone()
        };
        assert_eq!(a.dedup_key(), b.dedup_key());

        let other = LedgerEvent {
            kind: EventKind::ProposalRejected,
            ..a.clone()
        };
        assert_ne!(a.dedup_key(), other.dedup_key());
    }

    #[test]
    fn test_arg_accessors() {
        let event = LedgerEvent {
            kind: EventKind::MemberJoined,
            tx_hash: "0xbbb".to_string(),
            block_height: 5,
            args: json!({"space_id": 3, "member": "0xcafe"}),
        };
        assert_eq!(event.arg_u64("space_id"), Some(3));
        assert_eq!(event.arg_str("member"), Some("0xcafe"));
        assert_eq!(event.arg_u64("missing"), None);
    }
}
