//! Scanner registry: TTL, keep-alive, lazy garbage collection.
//!
//! A scanner is owned by one scan and holds its server-side state
//! between batch RPCs. Scanners expire after a configurable TTL
//! without a keep-alive; expired scanners are collected lazily, on
//! access or when the sweep interval has elapsed. A batch request on
//! an expired scanner fails and the client must open a fresh one.

use crate::core::config::ScannerConfig;
use crate::core::error::{Result, Status};
use crate::plan::op::ResultRow;
use crate::plan::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

pub type ScannerId = u64;

struct ScannerState {
    expires_at: Instant,
    remaining: Vec<ResultRow>,
    batches_served: u64,
}

/// Registry of open scanners on one server.
pub struct ScannerRegistry {
    config: ScannerConfig,
    scanners: Mutex<HashMap<ScannerId, ScannerState>>,
    next_id: AtomicU64,
    last_sweep: Mutex<Instant>,
}

impl ScannerRegistry {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            scanners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Register a scanner holding the rows still to be served.
    pub fn open(&self, rows: Vec<ResultRow>) -> ScannerId {
        self.maybe_sweep();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = ScannerState {
            expires_at: Instant::now() + self.config.ttl(),
            remaining: rows,
            batches_served: 0,
        };
        self.scanners.lock().insert(id, state);
        tracing::debug!(scanner_id = id, "scanner opened");
        id
    }

    /// Extend a scanner's life by at least one TTL interval.
    pub fn keep_alive(&self, id: ScannerId) -> Result<()> {
        self.maybe_sweep();
        let mut scanners = self.scanners.lock();
        let state = scanners
            .get_mut(&id)
            .ok_or_else(|| Status::not_found(format!("scanner {} not found", id)))?;
        if state.expires_at <= Instant::now() {
            scanners.remove(&id);
            return Err(Status::ScannerExpired(format!("scanner {} expired", id)));
        }
        let extended = Instant::now() + self.config.ttl();
        if extended > state.expires_at {
            state.expires_at = extended;
        }
        Ok(())
    }

    /// Serve the next batch, bounded by the per-RPC byte cap. An empty
    /// batch means the scan is exhausted.
    pub fn next_batch(&self, id: ScannerId) -> Result<Vec<ResultRow>> {
        self.maybe_sweep();
        let mut scanners = self.scanners.lock();
        let state = scanners
            .get_mut(&id)
            .ok_or_else(|| Status::ScannerExpired(format!("scanner {} expired", id)))?;
        if state.expires_at <= Instant::now() {
            scanners.remove(&id);
            tracing::info!(scanner_id = id, "scanner expired, collected on access");
            return Err(Status::ScannerExpired(format!("scanner {} expired", id)));
        }

        let mut batch = Vec::new();
        let mut batch_bytes = 0usize;
        while let Some(row) = state.remaining.first() {
            let size = row_size(row);
            if !batch.is_empty()
                && batch_bytes + size > self.config.scanner_max_batch_size_bytes
            {
                break;
            }
            batch_bytes += size;
            batch.push(state.remaining.remove(0));
        }
        state.batches_served += 1;
        // Serving a batch implicitly keeps the scanner alive.
        let extended = Instant::now() + self.config.ttl();
        if extended > state.expires_at {
            state.expires_at = extended;
        }
        Ok(batch)
    }

    /// Close a scanner explicitly.
    pub fn close(&self, id: ScannerId) -> Result<()> {
        self.scanners
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Status::not_found(format!("scanner {} not found", id)))
    }

    pub fn open_count(&self) -> usize {
        self.scanners.lock().len()
    }

    /// Sweep expired scanners when the check interval has elapsed.
    fn maybe_sweep(&self) {
        let now = Instant::now();
        {
            let mut last = self.last_sweep.lock();
            if now.duration_since(*last) < self.config.gc_check_interval() {
                return;
            }
            *last = now;
        }
        let mut scanners = self.scanners.lock();
        let before = scanners.len();
        scanners.retain(|_, state| state.expires_at > now);
        let collected = before - scanners.len();
        if collected > 0 {
            tracing::info!(collected, "swept expired scanners");
        }
    }
}

fn row_size(row: &ResultRow) -> usize {
    row.iter()
        .map(|value| match value {
            Value::Null => 1,
            Value::Bool(_) => 1,
            Value::Int32(_) => 4,
            Value::Int64(_) | Value::Double(_) | Value::Timestamp(_) => 8,
            Value::String(s) => s.len(),
            Value::Binary(b) => b.len(),
        })
        .sum::<usize>()
        + 8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ttl_ms: u64) -> ScannerConfig {
        ScannerConfig {
            scanner_ttl_ms: ttl_ms,
            scanner_gc_check_interval_us: 1000,
            scanner_max_batch_size_bytes: 64,
        }
    }

    fn rows(n: usize) -> Vec<ResultRow> {
        (0..n)
            .map(|i| vec![Value::Int64(i as i64), Value::String(format!("row-{}", i))])
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_without_keep_alive() {
        let registry = ScannerRegistry::new(config(100));
        let id = registry.open(rows(3));

        tokio::time::advance(std::time::Duration::from_millis(200)).await;
        let err = registry.next_batch(id).unwrap_err();
        assert!(matches!(err, Status::ScannerExpired(_)));

        // A fresh scanner works.
        let fresh = registry.open(rows(3));
        assert!(registry.next_batch(fresh).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_extends_life() {
        let registry = ScannerRegistry::new(config(100));
        let id = registry.open(rows(2));

        // Repeated keep-alives inside TTL/2 keep it alive indefinitely.
        for _ in 0..10 {
            tokio::time::advance(std::time::Duration::from_millis(40)).await;
            registry.keep_alive(id).unwrap();
        }
        assert!(registry.next_batch(id).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_respects_byte_cap() {
        let registry = ScannerRegistry::new(config(1000));
        let id = registry.open(rows(10));

        let first = registry.next_batch(id).unwrap();
        assert!(!first.is_empty());
        assert!(first.len() < 10);

        let mut total = first.len();
        loop {
            let batch = registry.next_batch(id).unwrap();
            if batch.is_empty() {
                break;
            }
            total += batch.len();
        }
        assert_eq!(total, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_sweep_collects_expired() {
        let registry = ScannerRegistry::new(config(50));
        registry.open(rows(1));
        registry.open(rows(1));
        assert_eq!(registry.open_count(), 2);

        tokio::time::advance(std::time::Duration::from_millis(100)).await;
        // Any access triggers the sweep once the check interval passed.
        let _ = registry.open(rows(1));
        assert_eq!(registry.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_removes_scanner() {
        let registry = ScannerRegistry::new(config(1000));
        let id = registry.open(rows(1));
        registry.close(id).unwrap();
        assert!(registry.close(id).is_err());
    }
}
