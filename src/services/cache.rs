use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::{CohortId, PassKind, PassReport};

/// Errors that can occur with cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Cache miss: {0}")]
    CacheMiss(String),
}

/// Multi-tier cache manager
///
/// L1 is an in-process `moka` cache. L2 is Redis when configured, so every
/// engine instance sees the latest pass report of every cohort.
pub struct CacheManager {
    redis: Option<Arc<tokio::sync::Mutex<ConnectionManager>>>,
    l1_cache: moka::future::Cache<String, Vec<u8>>,
    ttl_secs: u64,
}

impl CacheManager {
    /// Create a new cache manager; `redis_url = None` keeps everything in process
    pub async fn new(redis_url: Option<&str>, l1_size: u64, ttl_secs: u64) -> Result<Self, CacheError> {
        let redis = match redis_url {
            Some(url) => {
                let client = redis::Client::open(url)?;
                let manager = ConnectionManager::new(client).await?;
                Some(Arc::new(tokio::sync::Mutex::new(manager)))
            }
            None => None,
        };

        let l1_cache = moka::future::CacheBuilder::new(l1_size)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Ok(Self {
            redis,
            l1_cache,
            ttl_secs,
        })
    }

    pub fn has_redis(&self) -> bool {
        self.redis.is_some()
    }

    /// Get a value from cache (L1 first, then L2)
    pub async fn get<T>(&self, key: &str) -> Result<T, CacheError>
    where
        T: for<'de> Deserialize<'de>,
    {
        if let Some(bytes) = self.l1_cache.get(key).await {
            tracing::trace!("L1 cache hit: {}", key);
            return Ok(serde_json::from_slice(&bytes)?);
        }

        if let Some(redis) = &self.redis {
            let mut conn = redis.lock().await;
            let value: Option<String> = redis::cmd("GET")
                .arg(key)
                .query_async(&mut *conn)
                .await?;
            drop(conn);

            if let Some(json) = value {
                tracing::trace!("L2 cache hit: {}", key);
                self.l1_cache
                    .insert(key.to_string(), json.as_bytes().to_vec())
                    .await;
                return Ok(serde_json::from_str(&json)?);
            }
        }

        tracing::trace!("Cache miss: {}", key);
        Err(CacheError::CacheMiss(key.to_string()))
    }

    /// Set a value in cache (both tiers)
    pub async fn set<T>(&self, key: &str, value: &T) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        let json = serde_json::to_string(value)?;

        self.l1_cache
            .insert(key.to_string(), json.as_bytes().to_vec())
            .await;

        if let Some(redis) = &self.redis {
            let mut conn = redis.lock().await;
            redis::cmd("SETEX")
                .arg(key)
                .arg(self.ttl_secs)
                .arg(json)
                .query_async::<()>(&mut *conn)
                .await?;
        }

        tracing::trace!("Cache set: {}", key);
        Ok(())
    }

    /// Store the latest report of a cohort's run
    pub async fn store_report(&self, report: &PassReport) -> Result<(), CacheError> {
        self.set(&CacheKey::report(report.cohort_id, report.kind), report)
            .await
    }

    /// Latest report of a cohort's run, if any pass has finished
    pub async fn latest_report(
        &self,
        cohort_id: CohortId,
        kind: PassKind,
    ) -> Result<Option<PassReport>, CacheError> {
        match self.get(&CacheKey::report(cohort_id, kind)).await {
            Ok(report) => Ok(Some(report)),
            Err(CacheError::CacheMiss(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Latest pass report of a cohort for one kind of run
    pub fn report(cohort_id: CohortId, kind: PassKind) -> String {
        format!("report:{}:{}", cohort_id, kind.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn report(cohort_id: CohortId) -> PassReport {
        PassReport {
            cohort_id,
            kind: PassKind::Grouping,
            pass_number: 2,
            created: 3,
            remaining: 1,
            genders: vec![],
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_report_round_trip_in_process() {
        let cache = CacheManager::new(None, 100, 60).await.unwrap();
        assert!(!cache.has_redis());

        assert!(cache.latest_report(7, PassKind::Grouping).await.unwrap().is_none());

        cache.store_report(&report(7)).await.unwrap();
        let stored = cache.latest_report(7, PassKind::Grouping).await.unwrap();
        assert_eq!(stored.map(|r| r.pass_number), Some(2));
        assert!(cache.latest_report(7, PassKind::Matching).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_report_through_redis() {
        let cache = CacheManager::new(Some("redis://127.0.0.1:6379"), 100, 60)
            .await
            .expect("Failed to create cache");

        cache.store_report(&report(8)).await.unwrap();
        let stored = cache.latest_report(8, PassKind::Grouping).await.unwrap();
        assert!(stored.is_some());
    }

    #[test]
    fn test_cache_key_builder() {
        assert_eq!(CacheKey::report(12, PassKind::Matching), "report:12:matching");
        assert_eq!(CacheKey::report(12, PassKind::Grouping), "report:12:grouping");
    }
}
