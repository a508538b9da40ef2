//! Storage configuration options

use std::path::PathBuf;
use std::time::Duration;

/// Options for snapshot persistence
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Root directory for file-backed snapshots
    pub path: PathBuf,

    /// Blob name of the snapshot under the root
    pub snapshot_name: String,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Upper bound on the delay between retries
    pub max_backoff: Duration,
}

impl StorageOptions {
    /// Create options for snapshots under the given directory
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create options optimized for development/testing
    pub fn for_testing<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            snapshot_name: "graph.engr".to_string(),
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    /// Create options optimized for production
    pub fn for_production<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            snapshot_name: "graph.engr".to_string(),
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }

    /// Set the snapshot blob name
    pub fn snapshot_name(mut self, name: impl Into<String>) -> Self {
        self.snapshot_name = name.into();
        self
    }

    /// Set the retry count
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the initial and maximum backoff
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Delay before retry number `attempt` (0-based): doubles each time,
    /// capped at `max_backoff`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data"),
            snapshot_name: "graph.engr".to_string(),
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = StorageOptions::default();
        assert_eq!(opts.snapshot_name, "graph.engr");
        assert!(opts.max_retries > 0);
        assert!(opts.initial_backoff <= opts.max_backoff);
    }

    #[test]
    fn test_testing_options() {
        let opts = StorageOptions::for_testing("/tmp/test");
        assert!(opts.max_backoff <= Duration::from_millis(5));
    }

    #[test]
    fn test_production_options() {
        let opts = StorageOptions::for_production("/var/lib/engramdb");
        assert!(opts.max_retries >= 5);
        assert_eq!(opts.path, PathBuf::from("/var/lib/engramdb"));
    }

    #[test]
    fn test_builder_pattern() {
        let opts = StorageOptions::new("/data")
            .snapshot_name("agent.engr")
            .max_retries(7)
            .backoff(Duration::from_millis(10), Duration::from_millis(35));

        assert_eq!(opts.snapshot_name, "agent.engr");
        assert_eq!(opts.max_retries, 7);
        assert_eq!(opts.backoff_for(0), Duration::from_millis(10));
        assert_eq!(opts.backoff_for(1), Duration::from_millis(20));
        assert_eq!(opts.backoff_for(2), Duration::from_millis(35));
        assert_eq!(opts.backoff_for(40), Duration::from_millis(35));
    }
}
