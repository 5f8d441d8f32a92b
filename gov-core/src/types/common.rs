//! Common base types shared across modules.

use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// 32-byte digest type
pub type Digest32 = [u8; 32];

/// Off-chain record identifier (assigned by the relational store)
pub type RecordId = u64;

/// On-chain proposal identifier (assigned by the governance contract)
pub type ProposalId = u64;

/// Ledger block height
pub type BlockHeight = u64;

/// Ledger transaction hash (hex string)
pub type TxHash = String;

/// Timestamp type (Unix milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Get the current timestamp
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Create from milliseconds
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Convert to milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Whether the timestamp is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive a unique, stable slug for a governance action.
///
/// The slug is the join key between the off-chain record and the on-chain
/// half of the same logical action, so it must exist before any ledger
/// submission. Uniqueness comes from a short digest suffix over the title,
/// the creator and the creation instant.
pub fn derive_slug(title: &str, creator: &str) -> String {
    let base = slugify(title);
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(creator.as_bytes());
    hasher.update(Timestamp::now().as_millis().to_be_bytes());
    let digest = hasher.finalize();
    format!("{}-{}", base, hex::encode(&digest[..4]))
}

/// Lowercase a title and collapse non-alphanumeric runs into single dashes.
pub fn slugify(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("action");
    }
    out
}
