//! Orchestrator Configuration
//!
//! Configuration for the saga coordinator, confirmation waiter, link retry
//! queue, reconciliation watcher and eventual-consistency resolver.
//! Supports loading from environment variables with a GOV_SAGA_ prefix.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Ledger connection settings.
///
/// Presence of this configuration is the feature flag for the on-chain half
/// of a saga: without it, sagas complete off-chain only and no ledger calls
/// are made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Governance registry / governor contract address
    pub governor_address: String,
    /// Token factory contract address
    pub token_factory_address: String,
    /// Chain identifier
    pub chain_id: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            governor_address: "0x0000000000000000000000000000000000000001".to_string(),
            token_factory_address: "0x0000000000000000000000000000000000000002".to_string(),
            chain_id: 1,
        }
    }
}

/// Eventual-consistency resolver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Maximum refresh/poll/bypass attempts
    pub max_attempts: u32,
    /// Granularity of cache polling within one attempt (milliseconds)
    pub poll_interval_ms: u64,
    /// Cache polling window per attempt (milliseconds)
    pub poll_window_ms: u64,
    /// Fixed delay between attempts (milliseconds)
    pub attempt_delay_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            poll_interval_ms: 500,
            poll_window_ms: 2_000,
            attempt_delay_ms: 1_000,
        }
    }
}

impl ResolverConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Poll window as a duration
    pub fn poll_window(&self) -> Duration {
        Duration::from_millis(self.poll_window_ms)
    }

    /// Attempt delay as a duration
    pub fn attempt_delay(&self) -> Duration {
        Duration::from_millis(self.attempt_delay_ms)
    }
}

/// Link retry queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRetryConfig {
    /// Background processing interval (seconds)
    pub interval_secs: u64,
    /// Maximum queued attempts per pending link
    pub max_attempts: u32,
    /// Initial backoff delay (seconds)
    pub initial_delay_secs: u64,
}

impl Default for LinkRetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_attempts: 5,
            initial_delay_secs: 15,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Ledger settings; `None` disables the on-chain half of every saga
    pub ledger: Option<LedgerConfig>,
    /// Bound on waiting for transaction finality (seconds)
    pub confirmation_timeout_secs: u64,
    /// Inline write-back attempts before handing off to the retry queue
    pub link_inline_attempts: u32,
    /// Link retry queue settings
    pub link_retry: LinkRetryConfig,
    /// Resolver settings
    pub resolver: ResolverConfig,
    /// Lifetime of a per-saga token-deployment sub-watcher (seconds)
    pub deploy_watch_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ledger: Some(LedgerConfig::default()),
            confirmation_timeout_secs: 300,
            link_inline_attempts: 3,
            link_retry: LinkRetryConfig::default(),
            resolver: ResolverConfig::default(),
            deploy_watch_timeout_secs: 30,
        }
    }
}

impl OrchestratorConfig {
    /// Development configuration with short timings
    pub fn development() -> Self {
        Self {
            ledger: Some(LedgerConfig::default()),
            confirmation_timeout_secs: 30,
            link_inline_attempts: 2,
            link_retry: LinkRetryConfig {
                interval_secs: 2,
                max_attempts: 3,
                initial_delay_secs: 1,
            },
            resolver: ResolverConfig {
                max_attempts: 3,
                poll_interval_ms: 50,
                poll_window_ms: 200,
                attempt_delay_ms: 100,
            },
            deploy_watch_timeout_secs: 5,
        }
    }

    /// Off-chain-only configuration (no ledger half)
    pub fn offchain_only() -> Self {
        Self {
            ledger: None,
            ..Self::development()
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - GOV_SAGA_GOVERNOR_ADDRESS: governor contract address (unset disables the ledger half)
    /// - GOV_SAGA_TOKEN_FACTORY_ADDRESS: token factory contract address
    /// - GOV_SAGA_CHAIN_ID: chain identifier
    /// - GOV_SAGA_CONFIRMATION_TIMEOUT: confirmation bound in seconds
    /// - GOV_SAGA_LINK_RETRY_INTERVAL: retry queue interval in seconds
    /// - GOV_SAGA_LINK_RETRY_MAX_ATTEMPTS: retry queue attempt budget
    /// - GOV_SAGA_RESOLVER_MAX_ATTEMPTS: resolver attempt budget
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ledger = env::var("GOV_SAGA_GOVERNOR_ADDRESS").ok().map(|governor| {
            let base = LedgerConfig::default();
            LedgerConfig {
                governor_address: governor,
                token_factory_address: env::var("GOV_SAGA_TOKEN_FACTORY_ADDRESS")
                    .unwrap_or(base.token_factory_address),
                chain_id: env::var("GOV_SAGA_CHAIN_ID")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(base.chain_id),
            }
        });

        Self {
            ledger,
            confirmation_timeout_secs: env_u64(
                "GOV_SAGA_CONFIRMATION_TIMEOUT",
                defaults.confirmation_timeout_secs,
            ),
            link_inline_attempts: env_u64(
                "GOV_SAGA_LINK_INLINE_ATTEMPTS",
                u64::from(defaults.link_inline_attempts),
            ) as u32,
            link_retry: LinkRetryConfig {
                interval_secs: env_u64(
                    "GOV_SAGA_LINK_RETRY_INTERVAL",
                    defaults.link_retry.interval_secs,
                ),
                max_attempts: env_u64(
                    "GOV_SAGA_LINK_RETRY_MAX_ATTEMPTS",
                    u64::from(defaults.link_retry.max_attempts),
                ) as u32,
                initial_delay_secs: env_u64(
                    "GOV_SAGA_LINK_RETRY_DELAY",
                    defaults.link_retry.initial_delay_secs,
                ),
            },
            resolver: ResolverConfig {
                max_attempts: env_u64(
                    "GOV_SAGA_RESOLVER_MAX_ATTEMPTS",
                    u64::from(defaults.resolver.max_attempts),
                ) as u32,
                poll_interval_ms: env_u64(
                    "GOV_SAGA_RESOLVER_POLL_INTERVAL_MS",
                    defaults.resolver.poll_interval_ms,
                ),
                poll_window_ms: env_u64(
                    "GOV_SAGA_RESOLVER_POLL_WINDOW_MS",
                    defaults.resolver.poll_window_ms,
                ),
                attempt_delay_ms: env_u64(
                    "GOV_SAGA_RESOLVER_ATTEMPT_DELAY_MS",
                    defaults.resolver.attempt_delay_ms,
                ),
            },
            deploy_watch_timeout_secs: env_u64(
                "GOV_SAGA_DEPLOY_WATCH_TIMEOUT",
                defaults.deploy_watch_timeout_secs,
            ),
        }
    }

    /// Confirmation bound as a duration
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// Sub-watcher lifetime as a duration
    pub fn deploy_watch_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_watch_timeout_secs)
    }

    /// Whether the on-chain half is enabled
    pub fn ledger_enabled(&self) -> bool {
        self.ledger.is_some()
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
