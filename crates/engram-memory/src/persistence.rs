//! Snapshot persistence
//!
//! Saves and loads the canonical node and edge records through a
//! `SnapshotStorage` collaborator. Transient storage errors are retried with
//! exponential backoff. When retries run out the engine keeps running with
//! in-memory durability only, and the next successful save leaves that
//! degraded mode again.

use crate::engine::MemoryGraph;
use crate::types::EngineConfig;
use engram_core::{Clock, Result};
use engram_storage::{FileSnapshotStorage, Snapshot, SnapshotStorage, StorageOptions};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { bytes: usize, attempts: u32 },

    /// Storage kept failing; the snapshot exists in memory only
    Degraded { error: String },
}

pub struct Persistence {
    storage: Arc<dyn SnapshotStorage>,
    options: StorageOptions,
    degraded: AtomicBool,
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence")
            .field("options", &self.options)
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

impl Persistence {
    pub fn new(storage: Arc<dyn SnapshotStorage>, options: StorageOptions) -> Self {
        Self {
            storage,
            options,
            degraded: AtomicBool::new(false),
        }
    }

    /// Snapshots as files under `options.path`
    pub fn file(options: StorageOptions) -> Self {
        let storage = Arc::new(FileSnapshotStorage::new(options.path.clone()));
        Self::new(storage, options)
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// True while storage is failing and only memory holds the graph
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Encode and write a snapshot of `graph`
    pub async fn save(&self, graph: &MemoryGraph) -> Result<SaveOutcome> {
        let bytes = graph.to_snapshot().encode()?;
        let name = self.options.snapshot_name.as_str();
        let storage = &self.storage;
        let payload = bytes.as_slice();

        match self
            .with_retry("write", move || storage.write(name, payload))
            .await
        {
            Ok(((), attempts)) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    info!("Snapshot storage recovered, leaving degraded mode");
                }
                info!("Saved snapshot '{}': {} bytes", name, bytes.len());
                Ok(SaveOutcome::Saved {
                    bytes: bytes.len(),
                    attempts,
                })
            }
            Err(err) if err.is_recoverable() => {
                self.enter_degraded(&err.to_string());
                Ok(SaveOutcome::Degraded {
                    error: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Load the stored snapshot, if any, and rebuild an engine from it.
    ///
    /// A missing snapshot or unreachable storage yields `None`; a snapshot
    /// that fails to decode is `DataCorruption`.
    pub async fn load(
        &self,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Option<MemoryGraph>> {
        let name = self.options.snapshot_name.as_str();
        let storage = &self.storage;

        let bytes = match self.with_retry("read", move || storage.read(name)).await {
            Ok((Some(bytes), _)) => bytes,
            Ok((None, _)) => {
                info!("No snapshot '{}' found, starting empty", name);
                return Ok(None);
            }
            Err(err) if err.is_recoverable() => {
                self.enter_degraded(&err.to_string());
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let snapshot = Snapshot::decode(&bytes)?;
        let graph = MemoryGraph::from_snapshot(config, snapshot, clock)?;
        info!("Loaded snapshot '{}': {} bytes", name, bytes.len());
        Ok(Some(graph))
    }

    fn enter_degraded(&self, error: &str) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                "Snapshot storage unavailable, continuing with in-memory durability: {}",
                error
            );
        }
    }

    /// Run `op` until it succeeds, fails with a non-recoverable error, or
    /// exhausts `max_retries`. Returns the value and the attempts taken.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<(T, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok((value, attempt + 1)),
                Err(err) if err.is_recoverable() && attempt < self.options.max_retries => {
                    let delay = self.options.backoff_for(attempt);
                    debug!(
                        "Snapshot {} failed (attempt {}), retrying in {:?}: {}",
                        what,
                        attempt + 1,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
