//! Bounded per-operation error collector.
//!
//! Flush failures land here with enough context to identify the
//! operation. The collector is bounded; overflow drops further errors
//! and counts them, so a runaway flush cannot hold the whole failed
//! batch in memory.

use crate::core::error::Status;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default bound on retained errors.
pub const DEFAULT_MAX_ERRORS: usize = 1000;

/// One collected per-operation error.
#[derive(Debug, Clone)]
pub struct CollectedError {
    pub table_id: String,
    pub key: Bytes,
    pub status: Status,
}

/// Bounded error sink shared by a session and its flushes.
pub struct ErrorCollector {
    max_errors: usize,
    errors: Mutex<Vec<CollectedError>>,
    dropped: AtomicU64,
}

impl ErrorCollector {
    pub fn new(max_errors: usize) -> Self {
        Self {
            max_errors,
            errors: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn add(&self, error: CollectedError) {
        let mut errors = self.errors.lock();
        if errors.len() >= self.max_errors {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        errors.push(error);
    }

    /// Drain the collected errors.
    pub fn take(&self) -> Vec<CollectedError> {
        std::mem::take(&mut *self.errors.lock())
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    /// Errors discarded after the bound was hit.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for ErrorCollector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ERRORS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(n: usize) -> CollectedError {
        CollectedError {
            table_id: "t".to_string(),
            key: Bytes::from(format!("k{}", n)),
            status: Status::network_error("test"),
        }
    }

    #[test]
    fn test_collect_and_drain() {
        let collector = ErrorCollector::default();
        collector.add(error(1));
        collector.add(error(2));
        assert_eq!(collector.len(), 2);

        let drained = collector.take();
        assert_eq!(drained.len(), 2);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_bound_drops_overflow() {
        let collector = ErrorCollector::new(2);
        for n in 0..5 {
            collector.add(error(n));
        }
        assert_eq!(collector.len(), 2);
        assert_eq!(collector.dropped(), 3);
    }
}
