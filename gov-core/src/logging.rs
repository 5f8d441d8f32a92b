//! Logging Standards and Conventions
//!
//! This module defines logging conventions for the GovSync orchestrator.
//! All modules should follow these standards for consistent log output.
//!
//! # Log Levels
//!
//! | Level | Usage | Examples |
//! |-------|-------|----------|
//! | ERROR | Unrecoverable errors | Compensation delete failed, queue exhausted |
//! | WARN  | Recoverable issues, degraded operation | Link retry scheduled, event handler error |
//! | INFO  | Significant state changes | Saga completed, record linked, watcher started |
//! | DEBUG | Detailed operation flow | Step transitions, dedup hits, poll iterations |
//! | TRACE | Fine-grained debugging | Full event payloads |
//!
//! # Structured Logging Fields
//!
//! Always use structured fields for key information:
//! - `slug`: off-chain record business key
//! - `tx_hash`: ledger transaction hash
//! - `proposal_id`: on-chain proposal identifier
//! - `kind`: event or record kind
//! - `attempt`: retry attempt number
//! - `error`: error message
//!
//! # Examples
//!
//! ```ignore
//! use tracing::{info, warn};
//!
//! // Good: structured logging with context
//! info!(slug = %record.slug, proposal_id, "Record linked to ledger");
//!
//! // Good: error with context
//! warn!(slug = %slug, error = %e, attempt, "Link write-back failed, scheduling retry");
//! ```

use serde::{Deserialize, Serialize};

/// Log level enumeration matching tracing levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Unrecoverable errors
    Error,
    /// Recoverable warnings
    Warn,
    /// Significant events
    Info,
    /// Detailed debugging
    Debug,
    /// Fine-grained tracing
    Trace,
}

impl LogLevel {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    /// Check if this level is enabled for the given max level
    pub fn is_enabled(&self, max_level: LogLevel) -> bool {
        self.priority() <= max_level.priority()
    }

    fn priority(&self) -> u8 {
        match self {
            Self::Error => 0,
            Self::Warn => 1,
            Self::Info => 2,
            Self::Debug => 3,
            Self::Trace => 4,
        }
    }
}
