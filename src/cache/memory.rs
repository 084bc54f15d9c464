//! In-process cache storage.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Cache, CacheError, CacheStorage, RequestKey, ensure_storable, is_matchable};
use crate::http::{Request, Response};

/// Cache storage held entirely in memory.
///
/// Cloning yields another handle to the same generations.
///
/// # Examples
///
/// ```
/// use shellcache::cache::{CacheStorage, MemoryStorage};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), shellcache::cache::CacheError> {
/// let storage = MemoryStorage::new();
/// storage.open("shell-v1").await?;
/// storage.open("shell-v2").await?;
/// assert_eq!(storage.keys().await?, vec!["shell-v1", "shell-v2"]);
///
/// assert!(storage.delete("shell-v1").await?);
/// assert_eq!(storage.keys().await?, vec!["shell-v2"]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    generations: Arc<RwLock<Vec<MemoryCache>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    type Cache = MemoryCache;

    async fn open(&self, name: &str) -> Result<MemoryCache, CacheError> {
        let mut generations = self.generations.write().await;
        if let Some(existing) = generations.iter().find(|c| c.name() == name) {
            return Ok(existing.clone());
        }
        debug!(generation = name, "creating cache generation");
        let cache = MemoryCache::new(name);
        generations.push(cache.clone());
        Ok(cache)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let generations = self.generations.read().await;
        Ok(generations.iter().map(|c| c.name().to_owned()).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut generations = self.generations.write().await;
        let Some(pos) = generations.iter().position(|c| c.name() == name) else {
            return Ok(false);
        };
        let removed = generations.remove(pos);
        // Flagged under the entries lock so no put can land after the removal.
        let mut entries = removed.inner.entries.write().await;
        removed.inner.deleted.store(true, Ordering::Release);
        entries.clear();
        Ok(true)
    }

    async fn match_any(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        let generations = self.generations.read().await.clone();
        for cache in &generations {
            if let Some(response) = cache.match_request(request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

/// A handle to one in-memory generation.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    inner: Arc<Generation>,
}

#[derive(Debug)]
struct Generation {
    name: String,
    entries: RwLock<BTreeMap<RequestKey, Response>>,
    writes: AtomicUsize,
    deleted: AtomicBool,
}

impl MemoryCache {
    fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(Generation {
                name: name.to_owned(),
                entries: RwLock::new(BTreeMap::new()),
                writes: AtomicUsize::new(0),
                deleted: AtomicBool::new(false),
            }),
        }
    }

    /// Number of entries successfully written through [`Cache::put`] or
    /// [`Cache::put_all`] since the generation was created.
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::Acquire)
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.entries.read().await.is_empty()
    }

    fn ensure_live(&self) -> Result<(), CacheError> {
        if self.inner.deleted.load(Ordering::Acquire) {
            return Err(CacheError::Deleted {
                name: self.inner.name.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        if !is_matchable(request) {
            return Ok(None);
        }
        let entries = self.inner.entries.read().await;
        Ok(entries.get(&RequestKey::of(request)).cloned())
    }

    async fn put(&self, request: &Request, response: Response) -> Result<(), CacheError> {
        ensure_storable(request, &response)?;
        let mut entries = self.inner.entries.write().await;
        self.ensure_live()?;
        let key = RequestKey::of(request);
        debug!(generation = %self.inner.name, key = %key, status = %response.status(), "cache put");
        entries.insert(key, response);
        self.inner.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn put_all(&self, entries: Vec<(Request, Response)>) -> Result<(), CacheError> {
        for (request, response) in &entries {
            ensure_storable(request, response)?;
        }
        let mut map = self.inner.entries.write().await;
        self.ensure_live()?;
        let count = entries.len();
        for (request, response) in entries {
            map.insert(RequestKey::of(&request), response);
        }
        self.inner.writes.fetch_add(count, Ordering::AcqRel);
        Ok(())
    }
}
