//! Logical row-operation requests and responses.
//!
//! A request is the typed record a tablet receives for one statement:
//! key material (partition/range values or a tuple id), the write or
//! read payload, the projection targets, and the column references the
//! scan must materialize. The response carries a coarse status, the
//! skipped flag, the result rows, and an optional paging state.

use crate::plan::schema::ColumnId;
use crate::plan::value::{Expr, Value};
use bytes::Bytes;

/// Statement type of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStmtType {
    Insert,
    Update,
    Delete,
}

/// One column assignment in a write.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValue {
    pub column_id: ColumnId,
    pub expr: Expr,
}

impl ColumnValue {
    pub fn new(column_id: i32, value: Value) -> Self {
        Self {
            column_id: ColumnId(column_id),
            expr: Expr::Value(value),
        }
    }
}

/// One projection target of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A declared column's value.
    Column(ColumnId),
    /// The tuple-id pseudo-column: the encoded range doc key.
    TupleId,
    /// Aggregates; at most one result row is produced.
    Count,
    Sum(ColumnId),
    Min(ColumnId),
    Max(ColumnId),
}

impl Target {
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Target::Count | Target::Sum(_) | Target::Min(_) | Target::Max(_)
        )
    }
}

/// A write against one row of one tablet.
#[derive(Debug, Clone)]
pub struct WriteOpRequest {
    pub table_id: String,
    pub schema_version: u32,
    pub stmt_type: WriteStmtType,
    pub hash_code: Option<u16>,
    pub partition_column_values: Vec<Value>,
    pub range_column_values: Vec<Value>,
    /// Precomputed row identifier; when present it defines the row and
    /// the partition/range values are unused.
    pub tuple_id: Option<Bytes>,
    /// Insert payload.
    pub column_values: Vec<ColumnValue>,
    /// Update payload.
    pub column_new_values: Vec<ColumnValue>,
    pub where_expr: Option<Expr>,
    pub targets: Vec<Target>,
    pub stmt_id: u64,
    pub column_refs: Vec<ColumnId>,
}

impl WriteOpRequest {
    pub fn new(table_id: impl Into<String>, schema_version: u32, stmt_type: WriteStmtType) -> Self {
        Self {
            table_id: table_id.into(),
            schema_version,
            stmt_type,
            hash_code: None,
            partition_column_values: Vec::new(),
            range_column_values: Vec::new(),
            tuple_id: None,
            column_values: Vec::new(),
            column_new_values: Vec::new(),
            where_expr: None,
            targets: Vec::new(),
            stmt_id: 0,
            column_refs: Vec::new(),
        }
    }
}

/// A read against one tablet, optionally through a secondary index.
#[derive(Debug, Clone)]
pub struct ReadOpRequest {
    pub table_id: String,
    pub schema_version: u32,
    pub hash_code: Option<u16>,
    pub partition_column_values: Vec<Value>,
    pub range_column_values: Vec<Value>,
    pub where_expr: Option<Expr>,
    pub targets: Vec<Target>,
    pub stmt_id: u64,
    pub column_refs: Vec<ColumnId>,
    /// Row-count limit; `None` is effectively unbounded.
    pub limit: Option<usize>,
    /// When set, the scan drives this index request first and seeks the
    /// primary table by the index row's base tuple id.
    pub index_request: Option<Box<ReadOpRequest>>,
    /// Resume point from a previous page.
    pub paging_state: Option<PagingState>,
}

impl ReadOpRequest {
    pub fn new(table_id: impl Into<String>, schema_version: u32) -> Self {
        Self {
            table_id: table_id.into(),
            schema_version,
            hash_code: None,
            partition_column_values: Vec::new(),
            range_column_values: Vec::new(),
            where_expr: None,
            targets: Vec::new(),
            stmt_id: 0,
            column_refs: Vec::new(),
            limit: None,
            index_request: None,
            paging_state: None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.targets.iter().any(Target::is_aggregate)
    }
}

/// Coarse status of a row-operation response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RowResponseStatus {
    #[default]
    Ok,
    RuntimeError,
    SchemaVersionMismatch,
    QlError,
}

/// Continuation token for resuming a scan across RPC boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingState {
    /// Encoded doc key to resume at (exclusive of rows already sent).
    pub next_row_key: Bytes,
    pub total_rows_read: u64,
}

/// One result row: values aligned with the request's targets.
pub type ResultRow = Vec<Value>;

/// Response of one row operation.
#[derive(Debug, Clone, Default)]
pub struct RowOpResponse {
    pub status: RowResponseStatus,
    pub error_message: Option<String>,
    /// Update matched no row or changed no column.
    pub skipped: bool,
    pub paging_state: Option<PagingState>,
    pub rows: Vec<ResultRow>,
}

impl RowOpResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.status == RowResponseStatus::Ok
    }
}

/// Isolation level a write requires from the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// The write reads first and needs a consistent snapshot.
    Snapshot,
    /// Pure write: serializes with itself, never conflicts with
    /// concurrent writes.
    Serializable,
}
