//! Per-run state shared by every component.

use std::sync::Arc;

use crate::logging::RunLog;
use crate::storage::{ObjectStorage, Storage};

/// Storage handle, run timestamp and log sink for one invocation.
///
/// Passed explicitly to every step instead of living in process globals.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub storage: Arc<dyn Storage>,
    /// Seconds since the Unix epoch, used in archive and log names.
    pub timestamp: i64,
    pub log: RunLog,
}

impl RunContext {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            timestamp: chrono::Utc::now().timestamp(),
            log: RunLog::new(),
        }
    }

    /// Context over the default [`ObjectStorage`].
    pub fn from_env() -> Self {
        Self::new(Arc::new(ObjectStorage::new()))
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_log(mut self, log: RunLog) -> Self {
        self.log = log;
        self
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }
}
