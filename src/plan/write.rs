//! Write planner: one logical write against one tablet.
//!
//! Planning happens in two steps. Construction derives the row keys
//! (from a tuple id or from partition/range column values) and `apply`
//! turns the statement into ordered sub-document mutations plus a
//! result-set projection. `doc_paths` exposes the lock paths and the
//! isolation level the lock manager needs before apply runs.

use crate::core::error::{Result, Status};
use crate::core::time::HybridTime;
use crate::plan::doc_key::{hash_code_for, DocKey, DocPath, KeyEntry};
use crate::plan::iterator::{RowStorage, ScanSpec};
use crate::plan::op::{
    IsolationLevel, RowOpResponse, RowResponseStatus, Target, WriteOpRequest, WriteStmtType,
};
use crate::plan::schema::TableSchema;
use crate::plan::value::{Row, Value};
use crate::plan::write_batch::WriteBatch;
use bytes::Bytes;

/// Context handed to `apply`: the storage to read preimages from, the
/// batch to emit into, and the read time of the enclosing operation.
pub struct ApplyContext<'a> {
    pub storage: &'a dyn RowStorage,
    pub batch: &'a mut WriteBatch,
    pub read_time: HybridTime,
    pub restart_read_ht: &'a mut HybridTime,
}

/// Planner for one write request.
pub struct WritePlanner<'a> {
    schema: &'a TableSchema,
    request: WriteOpRequest,
    response: RowOpResponse,
    encoded_hashed_doc_key: Option<Bytes>,
    encoded_range_doc_key: Bytes,
}

impl<'a> WritePlanner<'a> {
    /// Derive the row keys for the request.
    ///
    /// A supplied tuple id decodes directly into the range doc key and
    /// the hash doc key stays absent. Otherwise hash components come
    /// from the partition column values and, when range columns exist,
    /// range components follow; the hash doc key is only materialized
    /// when no range portion was specified.
    pub fn new(schema: &'a TableSchema, request: WriteOpRequest) -> Result<Self> {
        if request.schema_version != schema.version() {
            let mut response = RowOpResponse::ok();
            response.status = RowResponseStatus::SchemaVersionMismatch;
            return Ok(Self {
                schema,
                request,
                response,
                encoded_hashed_doc_key: None,
                encoded_range_doc_key: Bytes::new(),
            });
        }

        let mut encoded_hashed_doc_key = None;
        let encoded_range_doc_key;
        if let Some(tuple_id) = &request.tuple_id {
            // The tuple id is the key of exactly one row.
            let range_doc_key = DocKey::decode(tuple_id)?;
            encoded_range_doc_key = range_doc_key.encode();
        } else {
            let hashed_components = key_entries(&request.partition_column_values)?;
            let range_components = key_entries(&request.range_column_values)?;
            let hash_code = match request.hash_code {
                Some(code) => code,
                None => hash_code_for(&hashed_components),
            };

            if range_components.is_empty() && !hashed_components.is_empty() {
                encoded_hashed_doc_key =
                    Some(DocKey::new_hash(hash_code, hashed_components.clone()).encode());
            }

            let range_doc_key = if hashed_components.is_empty() {
                DocKey::new_range(range_components)
            } else {
                DocKey::new(hash_code, hashed_components, range_components)
            };
            encoded_range_doc_key = range_doc_key.encode();
        }

        Ok(Self {
            schema,
            request,
            response: RowOpResponse::ok(),
            encoded_hashed_doc_key,
            encoded_range_doc_key,
        })
    }

    /// The encoded range doc key; doubles as the row's tuple id.
    pub fn range_doc_key(&self) -> &Bytes {
        &self.encoded_range_doc_key
    }

    /// Lock paths and required isolation level.
    ///
    /// A write that reads first needs its paths locked at snapshot
    /// isolation; a pure write serializes with itself and never
    /// conflicts with concurrent writes.
    pub fn doc_paths(&self) -> (Vec<Bytes>, IsolationLevel) {
        let mut paths = Vec::with_capacity(2);
        if let Some(hashed) = &self.encoded_hashed_doc_key {
            paths.push(hashed.clone());
        }
        if !self.encoded_range_doc_key.is_empty() {
            paths.push(self.encoded_range_doc_key.clone());
        }
        let level = if self.requires_read() {
            IsolationLevel::Snapshot
        } else {
            IsolationLevel::Serializable
        };
        (paths, level)
    }

    fn requires_read(&self) -> bool {
        matches!(
            self.request.stmt_type,
            WriteStmtType::Insert | WriteStmtType::Update
        )
    }

    /// Run the statement, emitting mutations into the batch.
    pub fn apply(&mut self, ctx: &mut ApplyContext<'_>) -> Result<()> {
        if self.response.status == RowResponseStatus::SchemaVersionMismatch {
            return Ok(());
        }
        tracing::debug!(
            stmt_id = self.request.stmt_id,
            read_time = %ctx.read_time,
            "applying write"
        );
        match self.request.stmt_type {
            WriteStmtType::Insert => self.apply_insert(ctx),
            WriteStmtType::Update => self.apply_update(ctx),
            WriteStmtType::Delete => self.apply_delete(ctx),
        }
    }

    fn apply_insert(&mut self, ctx: &mut ApplyContext<'_>) -> Result<()> {
        let table_row = self.read_columns(ctx)?;
        if !table_row.is_empty() {
            // Primary key or unique index value found.
            self.response.status = RowResponseStatus::QlError;
            self.response.error_message =
                Some("Duplicate key found in primary key or unique index".to_string());
            return Err(Status::ql_error(
                "Duplicate key found in primary key or unique index",
            ));
        }

        // The liveness column materializes the row even when every user
        // column is null; default TTL, no user timestamp.
        ctx.batch.set_primitive(
            DocPath::liveness(self.encoded_range_doc_key.clone()),
            Value::Null,
            None,
            None,
        );

        for column_value in &self.request.column_values {
            let column = self.schema.column_by_id(column_value.column_id)?;
            if !column_value.expr.is_scalar() {
                return Err(Status::invalid_argument(format!(
                    "illegal write instruction for column {}",
                    column.name
                )));
            }
            let result = column_value.expr.eval(&table_row)?;
            ctx.batch.insert_sub_document(
                DocPath::column(self.encoded_range_doc_key.clone(), column_value.column_id),
                result,
                None,
                None,
            );
        }

        self.populate_result_set(&table_row);
        self.response.status = RowResponseStatus::Ok;
        Ok(())
    }

    fn apply_update(&mut self, ctx: &mut ApplyContext<'_>) -> Result<()> {
        let table_row = self.read_columns(ctx)?;
        // Cleared when the operation produces data to write.
        let mut skipped = true;

        if self.request.tuple_id.is_some() {
            // Only changed columns are written back.
            for column_value in &self.request.column_new_values {
                self.schema.column_by_id(column_value.column_id)?;
                if !column_value.expr.is_scalar() {
                    return Err(Status::invalid_argument(format!(
                        "illegal write instruction for column {}",
                        column_value.column_id
                    )));
                }
                let result = column_value.expr.eval(&table_row)?;
                let old_value = table_row.value_or_null(column_value.column_id);
                if result != old_value {
                    ctx.batch.insert_sub_document(
                        DocPath::column(
                            self.encoded_range_doc_key.clone(),
                            column_value.column_id,
                        ),
                        result,
                        None,
                        None,
                    );
                    skipped = false;
                }
            }
        } else {
            let is_match = match &self.request.where_expr {
                Some(expr) => expr.eval(&table_row)?.as_bool()?,
                None => true,
            };
            if is_match {
                for column_value in &self.request.column_new_values {
                    self.schema.column_by_id(column_value.column_id)?;
                    if !column_value.expr.is_scalar() {
                        return Err(Status::invalid_argument(format!(
                            "illegal write instruction for column {}",
                            column_value.column_id
                        )));
                    }
                    let result = column_value.expr.eval(&table_row)?;
                    ctx.batch.insert_sub_document(
                        DocPath::column(
                            self.encoded_range_doc_key.clone(),
                            column_value.column_id,
                        ),
                        result,
                        None,
                        None,
                    );
                    skipped = false;
                }
            }
        }

        // The result set carries the values before the update.
        self.populate_result_set(&table_row);
        if skipped {
            self.response.skipped = true;
        }
        self.response.status = RowResponseStatus::Ok;
        Ok(())
    }

    fn apply_delete(&mut self, ctx: &mut ApplyContext<'_>) -> Result<()> {
        let table_row = self.read_columns(ctx)?;

        if !self.request.column_values.is_empty() {
            return Err(Status::invalid_argument(
                "conditional delete is not supported",
            ));
        }

        // Delete the referenced row: all columns.
        ctx.batch
            .delete_sub_doc(DocPath::row(self.encoded_range_doc_key.clone()));

        self.populate_result_set(&table_row);
        self.response.status = RowResponseStatus::Ok;
        Ok(())
    }

    /// Read the current row by its key, restricted to the referenced
    /// non-key columns. An absent row yields an empty row value.
    fn read_columns(&self, ctx: &mut ApplyContext<'_>) -> Result<Row> {
        let projection = self.schema.projection(&self.request.column_refs);
        let spec = ScanSpec::point(self.encoded_range_doc_key.clone());
        let mut iterator = ctx.storage.iterator(&spec, ctx.read_time)?;
        iterator.init(&spec)?;
        let row = if iterator.has_next() {
            iterator.next_row(&projection)?
        } else {
            Row::new()
        };
        ctx.restart_read_ht.make_at_least(iterator.restart_read_ht());
        Ok(row)
    }

    fn populate_result_set(&mut self, table_row: &Row) {
        let mut result_row = Vec::with_capacity(self.request.targets.len());
        for target in &self.request.targets {
            let value = match target {
                Target::TupleId => Value::Binary(self.encoded_range_doc_key.clone()),
                Target::Column(id) => table_row.value_or_null(*id),
                // Aggregates have no meaning in a write's result set.
                _ => Value::Null,
            };
            result_row.push(value);
        }
        if !result_row.is_empty() {
            self.response.rows.push(result_row);
        }
    }

    /// Consume the planner, yielding the response.
    pub fn into_response(self) -> RowOpResponse {
        self.response
    }

    pub fn response(&self) -> &RowOpResponse {
        &self.response
    }
}

fn key_entries(values: &[Value]) -> Result<Vec<KeyEntry>> {
    values.iter().map(KeyEntry::from_value).collect()
}
