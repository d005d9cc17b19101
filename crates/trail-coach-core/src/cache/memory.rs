//! In-memory [`IndexCache`] for tests and the `memory` cache backend.
//!
//! Holds at most one record behind a `std::sync::RwLock`. Contents live as
//! long as the value does.

use std::sync::RwLock;

use async_trait::async_trait;

use super::{CacheRecord, IndexCache};
use crate::error::{CoachError, Result};

/// Process-lifetime cache.
#[derive(Default)]
pub struct InMemoryCache {
    record: RwLock<Option<CacheRecord>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a record is currently stored.
    pub fn is_populated(&self) -> bool {
        self.record.read().map(|r| r.is_some()).unwrap_or(false)
    }
}

fn poisoned(op: &str) -> CoachError {
    CoachError::CacheWrite {
        backend: "memory".to_string(),
        message: format!("lock poisoned during {}", op),
    }
}

#[async_trait]
impl IndexCache for InMemoryCache {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn get(&self) -> Result<Option<CacheRecord>> {
        let guard = self.record.read().map_err(|_| CoachError::CacheRead {
            backend: "memory".to_string(),
            message: "lock poisoned during get".to_string(),
        })?;
        Ok(guard.clone())
    }

    async fn put(&self, record: &CacheRecord) -> Result<()> {
        let mut guard = self.record.write().map_err(|_| poisoned("put"))?;
        *guard = Some(record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self.record.write().map_err(|_| poisoned("clear"))?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: &str) -> CacheRecord {
        CacheRecord {
            version: version.to_string(),
            model: "test".to_string(),
            dims: 1,
            created_at: 1_700_000_000,
            entries: Vec::new(),
        }
    }

    #[tokio::test]
    async fn put_replaces_previous_record() {
        let cache = InMemoryCache::new();
        assert!(cache.get().await.unwrap().is_none());

        cache.put(&record("a")).await.unwrap();
        cache.put(&record("b")).await.unwrap();
        assert_eq!(cache.get().await.unwrap().unwrap().version, "b");
    }

    #[tokio::test]
    async fn clear_removes_record() {
        let cache = InMemoryCache::new();
        cache.put(&record("a")).await.unwrap();
        assert!(cache.is_populated());
        cache.clear().await.unwrap();
        assert!(!cache.is_populated());
        assert!(cache.get().await.unwrap().is_none());
    }
}
