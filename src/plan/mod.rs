//! Row operation planner: per-tablet write and read planning.
//!
//! A logical statement arrives as a typed request. The write planner
//! derives the row keys, reads the preimage where the statement needs
//! one, and emits ordered sub-document mutations plus lock paths and
//! an isolation level. The read planner builds a projection, drives a
//! primary or index iterator with snapshot semantics, and produces a
//! result set with an optional paging state.

pub mod doc_key;
pub mod iterator;
pub mod mem;
pub mod op;
pub mod read;
pub mod schema;
pub mod value;
pub mod write;
pub mod write_batch;

pub use doc_key::{DocKey, DocPath, KeyEntry, SubPath};
pub use iterator::{RowIterator, RowStorage, ScanSpec};
pub use op::{
    ColumnValue, IsolationLevel, PagingState, ReadOpRequest, RowOpResponse, RowResponseStatus,
    Target, WriteOpRequest, WriteStmtType,
};
pub use read::ReadPlanner;
pub use schema::{Column, ColumnId, KeyRole, LogicalType, Projection, SortOrder, TableSchema};
pub use value::{CompareOp, Expr, Row, Value};
pub use write::{ApplyContext, WritePlanner};
pub use write_batch::{BatchRecord, WriteBatch};
