//! Eventual-Consistency Resolver
//!
//! Bounded retry logic for observing an off-chain entity through a read path
//! that may lag the write path. Each attempt refreshes the cached
//! collection, polls it for a bounded window, and then tries a direct fetch
//! that bypasses the cache; after the attempt budget is spent one final
//! bypass fetch runs before giving up. Total wall-clock time is strictly
//! bounded and the loop suspends between checks rather than spinning.

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use gov_core::types::record::OffChainRecord;

use crate::config::ResolverConfig;
use crate::error::{SagaError, SagaResult};
use crate::gateway::RecordReadSource;

/// Resolver timing settings
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Maximum refresh/poll/bypass attempts
    pub max_attempts: u32,
    /// Granularity of cache polling within one attempt
    pub poll_interval: Duration,
    /// Cache polling window per attempt
    pub poll_window: Duration,
    /// Fixed delay between attempts
    pub attempt_delay: Duration,
}

impl From<&ResolverConfig> for ResolverSettings {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            poll_interval: config.poll_interval(),
            poll_window: config.poll_window(),
            attempt_delay: config.attempt_delay(),
        }
    }
}

/// Resolve a record matching `predicate` from a possibly-lagging read path.
///
/// Fails with [`SagaError::NotFound`] carrying the attempt count and the
/// last observed collection size once the budget is exhausted.
pub async fn resolve<F>(
    source: &dyn RecordReadSource,
    predicate: F,
    settings: &ResolverSettings,
) -> SagaResult<OffChainRecord>
where
    F: Fn(&OffChainRecord) -> bool,
{
    let mut last_size = 0usize;

    for attempt in 1..=settings.max_attempts {
        // (a) invalidate and repopulate the cached collection
        if let Err(e) = source.refresh_cache().await {
            warn!(attempt, error = %e, "cache refresh failed");
        }

        // (b) poll the refreshed cache for up to the per-attempt window
        let deadline = Instant::now() + settings.poll_window;
        loop {
            let cached = source.cached().await;
            last_size = cached.len();
            if let Some(found) = cached.iter().find(|r| predicate(r)) {
                debug!(attempt, slug = %found.slug, "resolved from cache");
                return Ok(found.clone());
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(settings.poll_interval).await;
        }

        // (c) bypass the cache entirely
        match source.fetch_direct().await {
            Ok(records) => {
                last_size = records.len();
                if let Some(found) = records.into_iter().find(|r| predicate(r)) {
                    debug!(attempt, slug = %found.slug, "resolved via cache bypass");
                    // Pull the cache forward so later readers see the record
                    if let Err(e) = source.refresh_cache().await {
                        warn!(error = %e, "cache refresh after bypass hit failed");
                    }
                    return Ok(found);
                }
            }
            Err(e) => {
                warn!(attempt, error = %e, "direct fetch failed");
            }
        }

        // (d) fixed delay before the next attempt
        if attempt < settings.max_attempts {
            sleep(settings.attempt_delay).await;
        }
    }

    // Final bypass fetch after the attempt budget is spent
    if let Ok(records) = source.fetch_direct().await {
        last_size = records.len();
        if let Some(found) = records.into_iter().find(|r| predicate(r)) {
            debug!(slug = %found.slug, "resolved on final bypass fetch");
            if let Err(e) = source.refresh_cache().await {
                warn!(error = %e, "cache refresh after final bypass failed");
            }
            return Ok(found);
        }
    }

    Err(SagaError::NotFound {
        attempts: settings.max_attempts,
        last_collection_size: last_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MemoryOffChain, OffChainGateway};
    use gov_core::types::record::{NewRecord, RecordKind};
    use serde_json::json;
    use std::sync::Arc;

    fn settings() -> ResolverSettings {
        ResolverSettings {
            max_attempts: 3,
            poll_interval: Duration::from_millis(50),
            poll_window: Duration::from_millis(200),
            attempt_delay: Duration::from_millis(100),
        }
    }

    fn space_record(slug: &str) -> NewRecord {
        NewRecord {
            kind: RecordKind::Space,
            slug: slug.to_string(),
            creator: "0xcafe".to_string(),
            fields: json!({}),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_from_cache() {
        let store = MemoryOffChain::new();
        store.create(space_record("space-1")).await.unwrap();

        let found = resolve(&store, |r| r.slug == "space-1", &settings())
            .await
            .unwrap();
        assert_eq!(found.slug, "space-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_via_bypass_when_cache_frozen() {
        let store = MemoryOffChain::new();
        store.set_cache_frozen(true);
        store.create(space_record("space-1")).await.unwrap();

        let found = resolve(&store, |r| r.slug == "space-1", &settings())
            .await
            .unwrap();
        assert_eq!(found.slug, "space-1");
        // Cache stayed frozen: the hit came from the bypass path
        assert!(store.cached().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_after_budget() {
        let store = MemoryOffChain::new();
        store.create(space_record("other")).await.unwrap();

        let start = Instant::now();
        let err = resolve(&store, |r| r.slug == "missing", &settings())
            .await
            .unwrap_err();

        match err {
            SagaError::NotFound {
                attempts,
                last_collection_size,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_collection_size, 1);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Hard bound: attempts x (window + delay) plus scheduling slack
        let bound = Duration::from_millis(3 * (200 + 100) + 200);
        assert!(start.elapsed() <= bound, "elapsed {:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finds_record_created_mid_poll() {
        let store = Arc::new(MemoryOffChain::new());
        let writer = store.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            writer.create(space_record("late-arrival")).await.unwrap();
        });

        let found = resolve(store.as_ref(), |r| r.slug == "late-arrival", &settings())
            .await
            .unwrap();
        assert_eq!(found.slug, "late-arrival");
        handle.await.unwrap();
    }
}
