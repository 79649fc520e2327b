//! Ordered sub-document write batch.
//!
//! The planner emits mutations into a batch; record order within a
//! batch is emission order and cross-batch order is flush order. A
//! batch also carries the read intents published for the conflict
//! resolver before the read step runs.

use crate::plan::doc_key::DocPath;
use crate::plan::value::Value;

/// A single emitted mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchRecord {
    /// Insert or overwrite one sub-document.
    Put {
        path: DocPath,
        value: Value,
        /// TTL in milliseconds; `None` inherits the table default.
        ttl_ms: Option<i64>,
        /// Explicit user timestamp; `None` uses the server's clock.
        user_timestamp: Option<i64>,
    },
    /// Remove a sub-document and everything beneath it.
    Delete { path: DocPath },
}

/// An intent pair published for conflict resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPair {
    pub key: bytes::Bytes,
    pub value: Value,
}

/// Ordered mutations plus read intents, owned by one operation.
#[derive(Debug, Default)]
pub struct WriteBatch {
    records: Vec<BatchRecord>,
    read_pairs: Vec<ReadPair>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a primitive value at a sub-path.
    pub fn set_primitive(
        &mut self,
        path: DocPath,
        value: Value,
        ttl_ms: Option<i64>,
        user_timestamp: Option<i64>,
    ) {
        self.records.push(BatchRecord::Put {
            path,
            value,
            ttl_ms,
            user_timestamp,
        });
    }

    /// Insert a sub-document at a sub-path.
    pub fn insert_sub_document(
        &mut self,
        path: DocPath,
        value: Value,
        ttl_ms: Option<i64>,
        user_timestamp: Option<i64>,
    ) {
        self.records.push(BatchRecord::Put {
            path,
            value,
            ttl_ms,
            user_timestamp,
        });
    }

    /// Delete the sub-document rooted at a path.
    pub fn delete_sub_doc(&mut self, path: DocPath) {
        self.records.push(BatchRecord::Delete { path });
    }

    pub fn add_read_pair(&mut self, key: bytes::Bytes, value: Value) {
        self.read_pairs.push(ReadPair { key, value });
    }

    pub fn records(&self) -> &[BatchRecord] {
        &self.records
    }

    pub fn read_pairs(&self) -> &[ReadPair] {
        &self.read_pairs
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
