//! Read planner: projection-driven scans with snapshot semantics.
//!
//! The planner drives either a primary-table iterator or a secondary
//! index iterator whose rows carry the base row's tuple id. Index
//! entries can run stale relative to the base table; a missed seek is
//! logged and skipped rather than failed. Aggregate statements fold
//! rows into accumulators and emit at most one result row.

use crate::core::error::{Result, Status};
use crate::core::time::HybridTime;
use crate::plan::doc_key::{hash_code_for, DocKey};
use crate::plan::iterator::{RowStorage, ScanSpec};
use crate::plan::op::{ReadOpRequest, RowOpResponse, RowResponseStatus, Target};
use crate::plan::schema::TableSchema;
use crate::plan::value::{Row, Value};
use crate::plan::write_batch::WriteBatch;
use bytes::Bytes;

/// Name of the index column holding the base table's tuple id.
pub const BASE_TUPLE_ID_COLUMN: &str = "base_tuple_id";

/// Planner for one read request.
pub struct ReadPlanner<'a> {
    schema: &'a TableSchema,
    index_schema: Option<&'a TableSchema>,
    request: ReadOpRequest,
    response: RowOpResponse,
    aggregates: Vec<Accumulator>,
}

impl<'a> ReadPlanner<'a> {
    pub fn new(
        schema: &'a TableSchema,
        index_schema: Option<&'a TableSchema>,
        request: ReadOpRequest,
    ) -> Self {
        Self {
            schema,
            index_schema,
            request,
            response: RowOpResponse::ok(),
            aggregates: Vec::new(),
        }
    }

    /// Run the scan against the given storage.
    ///
    /// `index_storage` must be present exactly when the request carries
    /// an index request. The restart-read hint of the driving iterator
    /// propagates into `restart_read_ht` so the caller can retry at a
    /// newer read time.
    pub fn execute(
        &mut self,
        storage: &dyn RowStorage,
        index_storage: Option<&dyn RowStorage>,
        read_time: HybridTime,
        restart_read_ht: &mut HybridTime,
    ) -> Result<()> {
        if self.request.schema_version != self.schema.version() {
            self.response.status = RowResponseStatus::SchemaVersionMismatch;
            return Ok(());
        }

        let row_count_limit = match self.request.limit {
            Some(0) => return Ok(()),
            Some(limit) => limit,
            None => usize::MAX,
        };

        let projection = self.schema.projection(&self.request.column_refs);
        let table_spec = self.scan_spec(&self.request, self.schema)?;
        let mut table_iter = storage.iterator(&table_spec, read_time)?;
        table_iter.init(&table_spec)?;

        // When an index is referenced the index iterator drives the
        // scan and the primary iterator follows by tuple id.
        let mut index_state = match &self.request.index_request {
            Some(index_request) => {
                let index_schema = self.index_schema.ok_or_else(|| {
                    Status::invalid_argument("index request without index schema")
                })?;
                let index_storage = index_storage.ok_or_else(|| {
                    Status::invalid_argument("index request without index storage")
                })?;
                let base_column = index_schema
                    .find_column(BASE_TUPLE_ID_COLUMN)
                    .ok_or_else(|| {
                        Status::corruption(format!(
                            "column {} not found in index",
                            BASE_TUPLE_ID_COLUMN
                        ))
                    })?;
                let index_projection = index_schema.projection(&index_request.column_refs);
                let index_spec = self.scan_spec(index_request, index_schema)?;
                let mut index_iter = index_storage.iterator(&index_spec, read_time)?;
                index_iter.init(&index_spec)?;
                Some((index_iter, index_projection, base_column.id))
            }
            None => None,
        };

        let is_aggregate = self.request.is_aggregate();
        let mut match_count = 0u64;
        let mut total_rows_read = self
            .request
            .paging_state
            .as_ref()
            .map(|p| p.total_rows_read)
            .unwrap_or(0);

        loop {
            if self.response.rows.len() >= row_count_limit {
                break;
            }
            let has_next = match &index_state {
                Some((index_iter, _, _)) => index_iter.has_next(),
                None => table_iter.has_next(),
            };
            if !has_next {
                break;
            }
            let (row, row_key) = match &mut index_state {
                Some((index_iter, index_projection, base_column_id)) => {
                    let index_row = index_iter.next_row(index_projection)?;
                    let tuple_id = match index_row.value_or_null(*base_column_id) {
                        Value::Binary(b) => b,
                        other => {
                            return Err(Status::corruption(format!(
                                "index row carries non-binary tuple id: {:?}",
                                other
                            )))
                        }
                    };
                    table_iter.seek(&tuple_id)?;
                    if !table_iter.has_next()
                        || table_iter.row_key()?.as_ref() != tuple_id.as_ref()
                    {
                        // The index may run ahead of the base table;
                        // skip the entry rather than failing the scan.
                        let doc_key = DocKey::decode(&tuple_id)?;
                        tracing::warn!(row_key = %doc_key, "row key missing in indexed table");
                        continue;
                    }
                    let row = table_iter.next_row(&projection)?;
                    (row, tuple_id)
                }
                None => {
                    let row_key = table_iter.row_key()?;
                    (table_iter.next_row(&projection)?, row_key)
                }
            };
            total_rows_read += 1;

            let is_match = match &self.request.where_expr {
                Some(expr) => expr.eval(&row)?.as_bool()?,
                None => true,
            };
            if !is_match {
                continue;
            }
            match_count += 1;
            if is_aggregate {
                self.accumulate(&row)?;
            } else {
                self.populate_result_row(&row, &row_key);
            }
        }

        if is_aggregate && match_count > 0 {
            self.emit_aggregate_row();
        }

        let driving_restart = match &index_state {
            Some((index_iter, _, _)) => index_iter.restart_read_ht(),
            None => table_iter.restart_read_ht(),
        };
        restart_read_ht.make_at_least(driving_restart);

        if self.response.rows.len() >= row_count_limit && !is_aggregate {
            self.response.paging_state = match &index_state {
                Some((index_iter, _, _)) => index_iter.paging_state(total_rows_read),
                None => table_iter.paging_state(total_rows_read),
            };
        }

        Ok(())
    }

    /// Publish read intents for the conflict resolver.
    ///
    /// A keyed request publishes one pair on its encoded doc key. A
    /// scan has no primary key; it publishes the lone empty-group key
    /// so only the tablet-routing portion participates.
    pub fn get_intents(&self, batch: &mut WriteBatch) -> Result<()> {
        if self.request.partition_column_values.is_empty() {
            batch.add_read_pair(DocKey::empty().encode(), Value::Null);
            return Ok(());
        }
        let hashed: Vec<_> = self
            .request
            .partition_column_values
            .iter()
            .map(crate::plan::doc_key::KeyEntry::from_value)
            .collect::<Result<_>>()?;
        let hash_code = self
            .request
            .hash_code
            .unwrap_or_else(|| hash_code_for(&hashed));
        let doc_key = DocKey::new_hash(hash_code, hashed);
        batch.add_read_pair(doc_key.encode(), Value::Null);
        Ok(())
    }

    fn scan_spec(&self, request: &ReadOpRequest, schema: &TableSchema) -> Result<ScanSpec> {
        if let Some(paging) = &request.paging_state {
            return Ok(ScanSpec::from_lower_bound(paging.next_row_key.clone()));
        }
        if request.partition_column_values.is_empty() {
            return Ok(ScanSpec::full());
        }
        let hashed: Vec<_> = request
            .partition_column_values
            .iter()
            .map(crate::plan::doc_key::KeyEntry::from_value)
            .collect::<Result<_>>()?;
        let hash_code = request.hash_code.unwrap_or_else(|| hash_code_for(&hashed));
        if request.range_column_values.len() == schema.num_range_columns()
            && !request.range_column_values.is_empty()
        {
            let range: Vec<_> = request
                .range_column_values
                .iter()
                .map(crate::plan::doc_key::KeyEntry::from_value)
                .collect::<Result<_>>()?;
            return Ok(ScanSpec::point(
                DocKey::new(hash_code, hashed, range).encode(),
            ));
        }
        // Hash bucket scan: every key sharing the hash group prefix.
        let full = DocKey::new_hash(hash_code, hashed).encode();
        // Drop the trailing range group terminator to form the prefix.
        let prefix = full.slice(..full.len() - 1);
        Ok(ScanSpec::prefix(prefix))
    }

    fn populate_result_row(&mut self, row: &Row, row_key: &Bytes) {
        let mut result_row = Vec::with_capacity(self.request.targets.len());
        for target in &self.request.targets {
            let value = match target {
                Target::Column(id) => row.value_or_null(*id),
                Target::TupleId => Value::Binary(row_key.clone()),
                // Aggregates never mix with plain targets.
                _ => Value::Null,
            };
            result_row.push(value);
        }
        self.response.rows.push(result_row);
    }

    fn accumulate(&mut self, row: &Row) -> Result<()> {
        if self.aggregates.is_empty() {
            self.aggregates = self
                .request
                .targets
                .iter()
                .map(Accumulator::for_target)
                .collect();
        }
        for accumulator in &mut self.aggregates {
            accumulator.fold(row)?;
        }
        Ok(())
    }

    fn emit_aggregate_row(&mut self) {
        let result_row = self
            .aggregates
            .iter()
            .map(Accumulator::finish)
            .collect::<Vec<_>>();
        self.response.rows.push(result_row);
    }

    pub fn into_response(self) -> RowOpResponse {
        self.response
    }

    pub fn response(&self) -> &RowOpResponse {
        &self.response
    }
}

/// Running state of one aggregate target.
#[derive(Debug, Clone)]
enum Accumulator {
    Count(u64),
    Sum {
        column: crate::plan::schema::ColumnId,
        total_int: i64,
        total_double: f64,
        saw_double: bool,
    },
    Min {
        column: crate::plan::schema::ColumnId,
        best: Option<Value>,
    },
    Max {
        column: crate::plan::schema::ColumnId,
        best: Option<Value>,
    },
    /// Non-aggregate target inside an aggregate statement.
    Passthrough,
}

impl Accumulator {
    fn for_target(target: &Target) -> Self {
        match target {
            Target::Count => Accumulator::Count(0),
            Target::Sum(column) => Accumulator::Sum {
                column: *column,
                total_int: 0,
                total_double: 0.0,
                saw_double: false,
            },
            Target::Min(column) => Accumulator::Min {
                column: *column,
                best: None,
            },
            Target::Max(column) => Accumulator::Max {
                column: *column,
                best: None,
            },
            _ => Accumulator::Passthrough,
        }
    }

    fn fold(&mut self, row: &Row) -> Result<()> {
        match self {
            Accumulator::Count(count) => *count += 1,
            Accumulator::Sum {
                column,
                total_int,
                total_double,
                saw_double,
            } => match row.value_or_null(*column) {
                Value::Null => {}
                Value::Int32(v) => *total_int += i64::from(v),
                Value::Int64(v) => *total_int += v,
                Value::Double(v) => {
                    *total_double += v;
                    *saw_double = true;
                }
                other => {
                    return Err(Status::invalid_argument(format!(
                        "cannot sum value {:?}",
                        other
                    )))
                }
            },
            Accumulator::Min { column, best } => {
                let value = row.value_or_null(*column);
                if !value.is_null() {
                    let replace = match best {
                        Some(current) => {
                            value.compare(current)? == std::cmp::Ordering::Less
                        }
                        None => true,
                    };
                    if replace {
                        *best = Some(value);
                    }
                }
            }
            Accumulator::Max { column, best } => {
                let value = row.value_or_null(*column);
                if !value.is_null() {
                    let replace = match best {
                        Some(current) => {
                            value.compare(current)? == std::cmp::Ordering::Greater
                        }
                        None => true,
                    };
                    if replace {
                        *best = Some(value);
                    }
                }
            }
            Accumulator::Passthrough => {}
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        match self {
            Accumulator::Count(count) => Value::Int64(*count as i64),
            Accumulator::Sum {
                total_int,
                total_double,
                saw_double,
                ..
            } => {
                if *saw_double {
                    Value::Double(*total_double + *total_int as f64)
                } else {
                    Value::Int64(*total_int)
                }
            }
            Accumulator::Min { best, .. } | Accumulator::Max { best, .. } => {
                best.clone().unwrap_or(Value::Null)
            }
            Accumulator::Passthrough => Value::Null,
        }
    }
}
