//! In-memory versioned row storage.
//!
//! A reference implementation of the storage contract: rows keyed by
//! encoded doc key, each carrying its version history so snapshot reads
//! observe exactly the state as of their read time. Backs the behavior
//! tests and the in-process tablet service.

use crate::core::error::{Result, Status};
use crate::core::time::HybridTime;
use crate::plan::doc_key::{DocKey, SubPath};
use crate::plan::iterator::{RowIterator, RowStorage, ScanSpec};
use crate::plan::op::PagingState;
use crate::plan::schema::{ColumnId, Projection, TableSchema};
use crate::plan::value::Row;
use crate::plan::write_batch::{BatchRecord, WriteBatch};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct RowVersion {
    ht: HybridTime,
    /// `None` is a whole-row tombstone.
    row: Option<Row>,
}

/// Versioned in-memory rows of one tablet.
pub struct MemStorage {
    schema: TableSchema,
    rows: RwLock<BTreeMap<Bytes, Vec<RowVersion>>>,
    /// Synthetic restart hint surfaced by iterators; tests use this to
    /// exercise read-retry plumbing.
    restart_hint: RwLock<HybridTime>,
}

impl MemStorage {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: RwLock::new(BTreeMap::new()),
            restart_hint: RwLock::new(HybridTime::MIN),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn set_restart_hint(&self, ht: HybridTime) {
        *self.restart_hint.write() = ht;
    }

    /// Materialize a write batch at a commit time.
    ///
    /// Column puts clone the latest visible row and overlay the column;
    /// a fresh row gets its key columns decoded out of the doc key.
    pub fn apply_write_batch(&self, batch: &WriteBatch, commit_ht: HybridTime) -> Result<()> {
        let mut rows = self.rows.write();
        for record in batch.records() {
            match record {
                BatchRecord::Put { path, value, .. } => {
                    let mut row = latest_visible(&rows, &path.root, HybridTime::MAX)
                        .cloned()
                        .unwrap_or_default();
                    if row.is_empty() {
                        self.fill_key_columns(&path.root, &mut row)?;
                    }
                    match path.sub {
                        SubPath::Liveness => {}
                        SubPath::Column(id) => row.set(id, value.clone()),
                        SubPath::Row => {
                            return Err(Status::invalid_argument(
                                "row-level put is not a primitive write",
                            ))
                        }
                    }
                    rows.entry(path.root.clone()).or_default().push(RowVersion {
                        ht: commit_ht,
                        row: Some(row),
                    });
                }
                BatchRecord::Delete { path } => match path.sub {
                    SubPath::Row => {
                        rows.entry(path.root.clone()).or_default().push(RowVersion {
                            ht: commit_ht,
                            row: None,
                        });
                    }
                    SubPath::Column(id) => {
                        let mut row = latest_visible(&rows, &path.root, HybridTime::MAX)
                            .cloned()
                            .unwrap_or_default();
                        row.unset(id);
                        rows.entry(path.root.clone()).or_default().push(RowVersion {
                            ht: commit_ht,
                            row: Some(row),
                        });
                    }
                    SubPath::Liveness => {
                        return Err(Status::invalid_argument(
                            "liveness column cannot be deleted directly",
                        ))
                    }
                },
            }
        }
        Ok(())
    }

    /// Number of rows visible at a read time.
    pub fn row_count(&self, read_time: HybridTime) -> usize {
        let rows = self.rows.read();
        rows.iter()
            .filter(|(key, _)| latest_visible(&rows, key, read_time).is_some())
            .count()
    }

    fn fill_key_columns(&self, encoded_key: &Bytes, row: &mut Row) -> Result<()> {
        let doc_key = DocKey::decode(encoded_key)?;
        let hash_ids: Vec<ColumnId> = self.schema.hash_columns().map(|c| c.id).collect();
        let range_ids: Vec<ColumnId> = self.schema.range_columns().map(|c| c.id).collect();
        for (id, entry) in hash_ids.iter().zip(doc_key.hashed_components.iter()) {
            row.set(*id, entry.to_value());
        }
        for (id, entry) in range_ids.iter().zip(doc_key.range_components.iter()) {
            row.set(*id, entry.to_value());
        }
        Ok(())
    }

    fn snapshot(&self, spec: &ScanSpec, read_time: HybridTime) -> Vec<(Bytes, Row)> {
        let rows = self.rows.read();
        rows.iter()
            .filter(|(key, _)| match (&spec.doc_key, &spec.prefix) {
                (Some(point), _) => key.as_ref() == point.as_ref(),
                (None, Some(prefix)) => key.starts_with(prefix),
                (None, None) => true,
            })
            .filter(|(key, _)| {
                spec.lower_bound
                    .as_ref()
                    .map(|lower| key.as_ref() >= lower.as_ref())
                    .unwrap_or(true)
                    && spec
                        .upper_bound
                        .as_ref()
                        .map(|upper| key.as_ref() < upper.as_ref())
                        .unwrap_or(true)
            })
            .filter_map(|(key, _)| {
                latest_visible(&rows, key, read_time).map(|row| (key.clone(), row.clone()))
            })
            .collect()
    }
}

fn latest_visible<'a>(
    rows: &'a BTreeMap<Bytes, Vec<RowVersion>>,
    key: &Bytes,
    read_time: HybridTime,
) -> Option<&'a Row> {
    rows.get(key).and_then(|versions| {
        versions
            .iter()
            .rev()
            .find(|v| v.ht <= read_time)
            .and_then(|v| v.row.as_ref())
    })
}

impl RowStorage for MemStorage {
    fn iterator(&self, spec: &ScanSpec, read_time: HybridTime) -> Result<Box<dyn RowIterator + '_>> {
        let entries = self.snapshot(spec, read_time);
        Ok(Box::new(MemRowIterator {
            entries,
            position: 0,
            key_column_ids: self
                .schema
                .columns()
                .iter()
                .filter(|c| c.is_key())
                .map(|c| c.id)
                .collect(),
            restart_hint: *self.restart_hint.read(),
        }))
    }
}

/// Snapshot iterator over the visible rows, in encoded-key order.
pub struct MemRowIterator {
    entries: Vec<(Bytes, Row)>,
    position: usize,
    key_column_ids: Vec<ColumnId>,
    restart_hint: HybridTime,
}

impl RowIterator for MemRowIterator {
    fn init(&mut self, spec: &ScanSpec) -> Result<()> {
        self.position = 0;
        if let Some(lower) = &spec.lower_bound {
            self.seek(lower)?;
        }
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.position < self.entries.len()
    }

    fn next_row(&mut self, projection: &Projection) -> Result<Row> {
        if !self.has_next() {
            return Err(Status::illegal_state("iterator exhausted"));
        }
        let (_, full_row) = &self.entries[self.position];
        self.position += 1;
        // Key columns are implicitly included; value columns are
        // restricted to the projection.
        let mut out = Row::new();
        for (id, value) in full_row.columns() {
            if self.key_column_ids.contains(id) || projection.contains(*id) {
                out.set(*id, value.clone());
            }
        }
        Ok(out)
    }

    fn seek(&mut self, doc_key: &[u8]) -> Result<()> {
        self.position = self
            .entries
            .partition_point(|(key, _)| key.as_ref() < doc_key);
        Ok(())
    }

    fn row_key(&self) -> Result<Bytes> {
        self.entries
            .get(self.position)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| Status::illegal_state("iterator exhausted"))
    }

    fn restart_read_ht(&self) -> HybridTime {
        self.restart_hint
    }

    fn paging_state(&self, total_rows_read: u64) -> Option<PagingState> {
        self.entries.get(self.position).map(|(key, _)| PagingState {
            next_row_key: key.clone(),
            total_rows_read,
        })
    }
}
