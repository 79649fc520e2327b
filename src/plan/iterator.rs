//! Row iterator bridge: the read-side contract the planner consumes
//! from the storage engine.
//!
//! Rows are delivered in ascending `(hash_code, hash_components,
//! range_components)` order of their encoded doc keys. The iterator
//! reports a restart-read hint when it observed writes whose visibility
//! requires a retry at a newer read time; the planner propagates the
//! hint upward.

use crate::core::error::Result;
use crate::core::time::HybridTime;
use crate::plan::op::PagingState;
use crate::plan::schema::Projection;
use crate::plan::value::Row;
use bytes::Bytes;

/// What a scan should cover.
#[derive(Debug, Clone, Default)]
pub struct ScanSpec {
    /// Point lookup: exactly this encoded doc key.
    pub doc_key: Option<Bytes>,
    /// Restrict to keys sharing this encoded prefix (a hash bucket).
    pub prefix: Option<Bytes>,
    /// Inclusive lower bound for range scans.
    pub lower_bound: Option<Bytes>,
    /// Exclusive upper bound for range scans.
    pub upper_bound: Option<Bytes>,
}

impl ScanSpec {
    pub fn point(doc_key: Bytes) -> Self {
        Self {
            doc_key: Some(doc_key),
            ..Default::default()
        }
    }

    pub fn prefix(prefix: Bytes) -> Self {
        Self {
            prefix: Some(prefix),
            ..Default::default()
        }
    }

    pub fn full() -> Self {
        Self::default()
    }

    pub fn from_lower_bound(lower: Bytes) -> Self {
        Self {
            lower_bound: Some(lower),
            ..Default::default()
        }
    }
}

/// Storage-engine iterator contract.
pub trait RowIterator {
    /// Position the iterator according to the spec.
    fn init(&mut self, spec: &ScanSpec) -> Result<()>;

    /// Whether a row is available at the current position.
    fn has_next(&self) -> bool;

    /// Produce the current row restricted to key columns plus the
    /// projection, and advance.
    fn next_row(&mut self, projection: &Projection) -> Result<Row>;

    /// Seek to the row with the given encoded doc key; positions at the
    /// first key at or after it.
    fn seek(&mut self, doc_key: &[u8]) -> Result<()>;

    /// Encoded doc key at the current position.
    fn row_key(&self) -> Result<Bytes>;

    /// Hybrid time at which the caller should retry the read, if the
    /// iterator observed in-flight writes. `HybridTime::MIN` when no
    /// retry is needed.
    fn restart_read_ht(&self) -> HybridTime;

    /// Continuation token for the position after the last returned row,
    /// when the scan stopped early.
    fn paging_state(&self, total_rows_read: u64) -> Option<PagingState>;
}

/// Factory contract the planner uses to obtain iterators.
pub trait RowStorage {
    /// Build an iterator over the given spec at the given read time.
    fn iterator(&self, spec: &ScanSpec, read_time: HybridTime) -> Result<Box<dyn RowIterator + '_>>;
}
