//! A pending operation buffered on a session.
//!
//! Lifecycle: buffered, then in flight during a flush, then completed
//! or errored. The error slot is filled at most once; completion
//! carries the row-operation response from the server. An operation
//! carries either a translated key-space command or a typed row
//! operation; both route by a two-byte partition key.

use crate::core::error::{Result, Status};
use crate::plan::doc_key::{hash_code_for, KeyEntry};
use crate::plan::op::{ReadOpRequest, RowOpResponse, WriteOpRequest};
use crate::routing::partition_key_for;
use crate::translate::TranslatedRequest;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Operation lifecycle state.
#[derive(Debug, Clone)]
pub enum OpState {
    Buffered,
    InFlight,
    Completed(RowOpResponse),
    Errored(Status),
}

/// The request an operation carries.
#[derive(Debug, Clone)]
pub enum OpPayload {
    /// A translated key-space command.
    Command(TranslatedRequest),
    /// A row write against a table.
    Write(WriteOpRequest),
    /// A row read against a table.
    Read(ReadOpRequest),
}

impl OpPayload {
    pub fn is_write(&self) -> bool {
        match self {
            OpPayload::Command(request) => request.is_write(),
            OpPayload::Write(_) => true,
            OpPayload::Read(_) => false,
        }
    }

    /// The two-byte partition key this payload routes by.
    pub fn routing_key(&self) -> Result<Bytes> {
        match self {
            OpPayload::Command(request) => Ok(partition_key_for(request.partition_key())),
            OpPayload::Write(request) => hash_partition_key(
                request.hash_code,
                &request.partition_column_values,
            ),
            OpPayload::Read(request) => hash_partition_key(
                request.hash_code,
                &request.partition_column_values,
            ),
        }
    }

    fn buffered_size(&self) -> usize {
        match self {
            OpPayload::Command(request) => {
                let kv = match request {
                    TranslatedRequest::Write(w) => &w.kv,
                    TranslatedRequest::Read(r) => &r.kv,
                };
                64 + kv.key.len()
                    + kv.values.iter().map(|v| v.len()).sum::<usize>()
                    + kv.subkeys.len() * 16
            }
            OpPayload::Write(request) => {
                64 + values_size(&request.partition_column_values)
                    + values_size(&request.range_column_values)
                    + request
                        .column_values
                        .iter()
                        .chain(&request.column_new_values)
                        .map(|cv| expr_size(&cv.expr))
                        .sum::<usize>()
            }
            OpPayload::Read(request) => {
                64 + values_size(&request.partition_column_values)
                    + request.column_refs.len() * 4
            }
        }
    }
}

fn values_size(values: &[crate::plan::value::Value]) -> usize {
    values.iter().map(value_size).sum()
}

fn value_size(value: &crate::plan::value::Value) -> usize {
    use crate::plan::value::Value;
    match value {
        Value::String(s) => s.len(),
        Value::Binary(b) => b.len(),
        _ => 8,
    }
}

fn expr_size(expr: &crate::plan::value::Expr) -> usize {
    match expr {
        crate::plan::value::Expr::Value(value) => value_size(value),
        _ => 16,
    }
}

fn hash_partition_key(
    hash_code: Option<u16>,
    partition_values: &[crate::plan::value::Value],
) -> Result<Bytes> {
    let code = match hash_code {
        Some(code) => code,
        None if partition_values.is_empty() => 0,
        None => {
            let entries: Vec<KeyEntry> = partition_values
                .iter()
                .map(KeyEntry::from_value)
                .collect::<Result<_>>()?;
            hash_code_for(&entries)
        }
    };
    Ok(Bytes::copy_from_slice(&code.to_be_bytes()))
}

/// One write or read pending on a session.
pub struct SessionOp {
    pub table_id: String,
    pub payload: OpPayload,
    pub created_at: Instant,
    /// Per-operation deadline; the session deadline applies when
    /// absent.
    pub deadline: Option<Instant>,
    /// Collect a duplicate-key response as an error instead of a
    /// completed response.
    pub duplicates_are_errors: bool,
    state: Mutex<OpState>,
}

impl SessionOp {
    pub fn command(table_id: impl Into<String>, request: TranslatedRequest) -> Self {
        Self::new(table_id, OpPayload::Command(request))
    }

    pub fn write(table_id: impl Into<String>, request: WriteOpRequest) -> Self {
        Self::new(table_id, OpPayload::Write(request))
    }

    pub fn read(table_id: impl Into<String>, request: ReadOpRequest) -> Self {
        Self::new(table_id, OpPayload::Read(request))
    }

    fn new(table_id: impl Into<String>, payload: OpPayload) -> Self {
        Self {
            table_id: table_id.into(),
            payload,
            created_at: Instant::now(),
            deadline: None,
            duplicates_are_errors: false,
            state: Mutex::new(OpState::Buffered),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn duplicates_as_errors(mut self) -> Self {
        self.duplicates_are_errors = true;
        self
    }

    pub fn state(&self) -> OpState {
        self.state.lock().clone()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            *self.state.lock(),
            OpState::Completed(_) | OpState::Errored(_)
        )
    }

    /// Response of a completed operation.
    pub fn response(&self) -> Option<RowOpResponse> {
        match &*self.state.lock() {
            OpState::Completed(response) => Some(response.clone()),
            _ => None,
        }
    }

    pub(crate) fn mark_in_flight(&self) {
        *self.state.lock() = OpState::InFlight;
    }

    pub(crate) fn complete(&self, response: RowOpResponse) {
        *self.state.lock() = OpState::Completed(response);
    }

    pub(crate) fn fail(&self, status: Status) {
        *self.state.lock() = OpState::Errored(status);
    }

    /// Rough buffered footprint, charged against the session budget.
    pub fn buffered_size(&self) -> usize {
        self.payload.buffered_size()
    }
}

impl std::fmt::Debug for SessionOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOp")
            .field("table_id", &self.table_id)
            .field("state", &self.state())
            .finish()
    }
}
