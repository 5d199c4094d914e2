use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::{StoreError, StoreResult};

/// Byte-oriented key/value store backing the conditional cache.
///
/// Implementations must be safe to share between concurrent requests; the
/// caching layer does not serialize access.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the bytes stored under `key`
    async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    async fn write(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Drop `key` if present
    async fn remove(&self, key: &str) -> StoreResult<()>;
}

#[async_trait]
impl<S: CacheStore + ?Sized> CacheStore for Arc<S> {
    async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).read(key).await
    }

    async fn write(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        (**self).write(key, value).await
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        (**self).remove(key).await
    }
}

/// In-memory store using Moka
pub struct MemoryStore {
    cache: Cache<String, Arc<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// Number of live entries, after pending maintenance has run
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(3600))
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.cache.get(key).await.map(|value| value.as_ref().clone()))
    }

    async fn write(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.cache
            .insert(key.to_string(), Arc::new(value.to_vec()))
            .await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.cache.remove(key).await;
        Ok(())
    }
}

/// Persistent store using cacache for corruption-resistant storage
pub struct DiskStore {
    directory: PathBuf,
}

impl DiskStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Number of index entries; an unreadable index counts as empty
    pub fn entry_count(&self) -> u64 {
        cacache::index::ls(&self.directory)
            .filter_map(Result::ok)
            .count() as u64
    }

    pub async fn clear(&self) -> StoreResult<()> {
        cacache::clear(&self.directory)
            .await
            .map_err(|e| StoreError::WriteError {
                key: "*".to_string(),
                details: e.to_string(),
            })
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match cacache::read(&self.directory, key).await {
            Ok(data) => Ok(Some(data)),
            Err(cacache::Error::EntryNotFound(_, _)) => Ok(None),
            Err(cacache::Error::IntegrityError(e)) => Err(StoreError::Corruption {
                key: key.to_string(),
                details: e.to_string(),
            }),
            Err(e) => Err(StoreError::ReadError {
                key: key.to_string(),
                details: e.to_string(),
            }),
        }
    }

    async fn write(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        cacache::write(&self.directory, key, value)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::WriteError {
                key: key.to_string(),
                details: e.to_string(),
            })
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        cacache::remove(&self.directory, key)
            .await
            .map_err(|e| StoreError::WriteError {
                key: key.to_string(),
                details: e.to_string(),
            })
    }
}

/// Two-tier store: memory first, then disk
pub struct TieredStore {
    memory: MemoryStore,
    disk: DiskStore,
}

impl TieredStore {
    pub fn new(memory: MemoryStore, disk: DiskStore) -> Self {
        Self { memory, disk }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            MemoryStore::new(
                config.max_memory_entries,
                Duration::from_secs(config.memory_ttl_seconds),
            ),
            DiskStore::new(&config.directory),
        )
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }
}

#[async_trait]
impl CacheStore for TieredStore {
    async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        if let Some(value) = self.memory.read(key).await? {
            return Ok(Some(value));
        }

        match self.disk.read(key).await? {
            Some(value) => {
                debug!(key, "disk store hit, promoting to memory");
                self.memory.write(key, &value).await?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.memory.write(key, value).await?;
        self.disk.write(key, value).await
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.memory.remove(key).await?;
        self.disk.remove(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryStore::new(10, Duration::from_secs(60));
        let key = "http://test.net/posts:response";

        assert!(store.read(key).await.unwrap().is_none());
        assert!(!store.contains(key).await);

        store.write(key, b"<posts/>").await.unwrap();
        assert!(store.contains(key).await);
        assert_eq!(store.read(key).await.unwrap().unwrap(), b"<posts/>");

        // overwrite replaces
        store.write(key, b"<posts></posts>").await.unwrap();
        assert_eq!(store.read(key).await.unwrap().unwrap(), b"<posts></posts>");

        store.remove(key).await.unwrap();
        assert!(store.read(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disk_store_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let key = "http://test.net/posts:timestamp";

        let store = DiskStore::new(temp_dir.path());
        assert!(store.read(key).await.unwrap().is_none());
        store
            .write(key, b"Mon, 02 Apr 2012 15:20:41 GMT")
            .await
            .unwrap();

        let reopened = DiskStore::new(temp_dir.path());
        assert_eq!(
            reopened.read(key).await.unwrap().unwrap(),
            b"Mon, 02 Apr 2012 15:20:41 GMT"
        );
        assert_eq!(reopened.entry_count(), 1);

        reopened.remove(key).await.unwrap();
        assert!(reopened.read(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tiered_store_promotes_disk_hits() {
        let temp_dir = TempDir::new().unwrap();
        let store = TieredStore::new(
            MemoryStore::new(10, Duration::from_secs(60)),
            DiskStore::new(temp_dir.path()),
        );
        let key = "http://test.net/users/1:response";

        store.write(key, b"payload").await.unwrap();
        assert!(store.memory().contains(key).await);

        store.memory().clear().await;
        assert!(!store.memory().contains(key).await);

        assert_eq!(store.read(key).await.unwrap().unwrap(), b"payload");
        assert!(store.memory().contains(key).await);
    }

    #[tokio::test]
    async fn test_shared_store_through_arc() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::default());
        let shared = Arc::clone(&store);

        shared.write("k", b"v").await.unwrap();
        assert_eq!(store.read("k").await.unwrap().unwrap(), b"v");
    }

    #[tokio::test]
    async fn test_concurrent_store_access() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(TieredStore::new(
            MemoryStore::new(100, Duration::from_secs(60)),
            DiskStore::new(temp_dir.path()),
        ));

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let key = format!("http://test.net/posts/{}:response", i);
                    store.write(&key, format!("post {}", i).as_bytes()).await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        for i in 0..10 {
            let key = format!("http://test.net/posts/{}:response", i);
            let value = store.read(&key).await.unwrap().unwrap();
            assert_eq!(value, format!("post {}", i).into_bytes());
        }
    }
}
