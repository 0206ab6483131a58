//! Storage test utilities.

use async_trait::async_trait;
use bytes::Bytes;
use quay_storage::{ByteStream, MemoryBackend, ObjectMeta, ObjectStore, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Blob store whose writes fail for keys matching a predicate.
///
/// Reads go to an in-memory backend holding whatever writes succeeded,
/// until `fail_reads` is switched on.
#[allow(dead_code)]
pub struct FailingStore {
    inner: MemoryBackend,
    fail_when: Box<dyn Fn(&str) -> bool + Send + Sync>,
    pub fail_reads: AtomicBool,
    pub ensure_calls: AtomicUsize,
}

#[allow(dead_code)]
impl FailingStore {
    /// Every write fails.
    pub fn always() -> Self {
        Self::when(|_| true)
    }

    /// Writes fail for keys containing `needle`.
    pub fn for_keys_containing(needle: &'static str) -> Self {
        Self::when(move |key| key.contains(needle))
    }

    pub fn when(predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner: MemoryBackend::new(),
            fail_when: Box::new(predicate),
            fail_reads: AtomicBool::new(false),
            ensure_calls: AtomicUsize::new(0),
        }
    }

    fn check_read(&self) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("backend unreachable")));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.check_read()?;
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.check_read()?;
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.check_read()?;
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.check_read()?;
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        if (self.fail_when)(key) {
            return Err(StorageError::Io(std::io::Error::other("disk on fire")));
        }
        self.inner.put(key, data, content_type).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.check_read()?;
        self.inner.list(prefix).await
    }

    async fn ensure_container(&self) -> StorageResult<()> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// In-memory blob store that records how many writes overlap.
#[allow(dead_code)]
pub struct SlowWriteStore {
    inner: MemoryBackend,
    delay: Duration,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

#[allow(dead_code)]
impl SlowWriteStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryBackend::new(),
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ObjectStore for SlowWriteStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let result = self.inner.put(key, data, content_type).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "slow-write"
    }
}
