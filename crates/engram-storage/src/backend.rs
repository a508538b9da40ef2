//! Durable storage backends for snapshot blobs

use async_trait::async_trait;
use engram_core::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Byte-level read/write of snapshot blobs at a storage path
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Read a blob; `None` when nothing was stored at `path`
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the blob at `path`
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;
}

/// Stores blobs as files under a root directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never sees a half-written snapshot.
#[derive(Debug, Clone)]
pub struct FileSnapshotStorage {
    root: PathBuf,
}

impl FileSnapshotStorage {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::Storage(format!(
                "snapshot path '{}' escapes the storage root",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl SnapshotStorage for FileSnapshotStorage {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => {
                debug!("Read {} bytes from {}", bytes.len(), full.display());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut temp = full.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &full).await?;
        debug!("Wrote {} bytes to {}", bytes.len(), full.display());
        Ok(())
    }
}

/// Keeps blobs in memory. Can be told to fail upcoming operations, for
/// exercising retry and degraded-durability paths.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStorage {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    failing_writes: Arc<AtomicUsize>,
    failing_reads: Arc<AtomicUsize>,
}

impl InMemorySnapshotStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes with a storage error
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` reads with a storage error
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.read().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SnapshotStorage for InMemorySnapshotStorage {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        if Self::take_failure(&self.failing_reads) {
            return Err(Error::Storage(format!("injected read failure for {}", path)));
        }
        let blobs = self
            .blobs
            .read()
            .map_err(|_| Error::Internal("Failed to acquire blob lock".to_string()))?;
        Ok(blobs.get(path).cloned())
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        if Self::take_failure(&self.failing_writes) {
            return Err(Error::Storage(format!(
                "injected write failure for {}",
                path
            )));
        }
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| Error::Internal("Failed to acquire blob lock".to_string()))?;
        blobs.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }
}
