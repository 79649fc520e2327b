//! Common test utilities.
//!
//! A miniature cluster: a static master (tablet locator), an
//! in-process tablet service executing the planners against in-memory
//! storage, and helpers for the shared key/value table schema.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tessera::core::error::{Result, Status};
use tessera::core::time::HybridTime;
use tessera::plan::mem::MemStorage;
use tessera::plan::op::{
    ColumnValue, ReadOpRequest, RowOpResponse, RowResponseStatus, Target, WriteOpRequest,
    WriteStmtType,
};
use tessera::plan::value::Value;
use tessera::plan::write_batch::WriteBatch;
use tessera::plan::{
    ApplyContext, Column, KeyRole, LogicalType, ReadPlanner, TableSchema, WritePlanner,
};
use tessera::routing::{
    MetaCache, PartitionRange, Replica, ReplicaRole, TabletLocations, TabletLocator,
};
use tessera::session::{OpOutcome, OpPayload, Session, SessionOp, TabletServer};
use tessera::translate::{ReadVerb, TranslatedRequest, WriteVerb};

pub const KV_TABLE: &str = "kv_table";
pub const KEY_COLUMN: i32 = 1;
pub const VALUE_COLUMN: i32 = 2;

/// Schema of the shared key/value table: a string hash key and one
/// string value column.
pub fn kv_schema() -> TableSchema {
    TableSchema::new(
        vec![
            Column::new(KEY_COLUMN, "k", LogicalType::String, KeyRole::Hash),
            Column::new(VALUE_COLUMN, "v", LogicalType::String, KeyRole::Regular),
        ],
        1,
    )
    .expect("kv schema is valid")
}

/// Insert request for one key/value pair.
pub fn insert_request(key: &str, value: &str) -> WriteOpRequest {
    let mut request = WriteOpRequest::new(KV_TABLE, 1, WriteStmtType::Insert);
    request.partition_column_values = vec![Value::String(key.to_string())];
    request.column_values = vec![ColumnValue::new(VALUE_COLUMN, Value::String(value.to_string()))];
    request.column_refs = vec![tessera::plan::ColumnId(VALUE_COLUMN)];
    request
}

/// Point-read request for one key.
pub fn read_request(key: &str) -> ReadOpRequest {
    let mut request = ReadOpRequest::new(KV_TABLE, 1);
    request.partition_column_values = vec![Value::String(key.to_string())];
    request.targets = vec![Target::Column(tessera::plan::ColumnId(VALUE_COLUMN))];
    request.column_refs = vec![tessera::plan::ColumnId(VALUE_COLUMN)];
    request
}

/// Full-scan request over the kv table.
pub fn scan_request() -> ReadOpRequest {
    let mut request = ReadOpRequest::new(KV_TABLE, 1);
    request.targets = vec![
        Target::Column(tessera::plan::ColumnId(KEY_COLUMN)),
        Target::Column(tessera::plan::ColumnId(VALUE_COLUMN)),
    ];
    request.column_refs = vec![tessera::plan::ColumnId(VALUE_COLUMN)];
    request
}

/// Session op inserting one key/value pair into the kv table.
pub fn kv_insert_op(key: &str, value: &str) -> SessionOp {
    SessionOp::write(KV_TABLE, insert_request(key, value))
}

/// Session op reading one key from the kv table.
pub fn kv_read_op(key: &str) -> SessionOp {
    SessionOp::read(KV_TABLE, read_request(key))
}

/// Session op scanning the whole kv table.
pub fn kv_scan_op() -> SessionOp {
    SessionOp::read(KV_TABLE, scan_request())
}

/// Static master: serves tablet locations from a mutable table.
pub struct StaticLocator {
    tablets: RwLock<Vec<TabletLocations>>,
    /// Lookups still to answer with the stale flag set.
    stale_responses: AtomicUsize,
    /// Lookups still to fail with a network error.
    failed_responses: AtomicUsize,
    pub lookup_count: AtomicUsize,
}

impl StaticLocator {
    pub fn new(tablets: Vec<TabletLocations>) -> Self {
        Self {
            tablets: RwLock::new(tablets),
            stale_responses: AtomicUsize::new(0),
            failed_responses: AtomicUsize::new(0),
            lookup_count: AtomicUsize::new(0),
        }
    }

    /// One tablet covering the whole partition keyspace, rf=1.
    pub fn single_tablet() -> Self {
        Self::new(vec![TabletLocations {
            tablet_id: "tablet-1".to_string(),
            partition: PartitionRange::unbounded(),
            replicas: vec![Replica::new("ts-1", "127.0.0.1:9100", ReplicaRole::Leader)],
            stale: false,
        }])
    }

    /// One tablet with three replicas, leader first.
    pub fn replicated_tablet() -> Self {
        Self::new(vec![TabletLocations {
            tablet_id: "tablet-1".to_string(),
            partition: PartitionRange::unbounded(),
            replicas: vec![
                Replica::new("ts-a", "127.0.0.1:9100", ReplicaRole::Leader),
                Replica::new("ts-b", "127.0.0.2:9100", ReplicaRole::Follower),
                Replica::new("ts-c", "127.0.0.3:9100", ReplicaRole::Follower),
            ],
            stale: false,
        }])
    }

    /// Answer the next `count` lookups with the stale flag.
    pub fn serve_stale(&self, count: usize) {
        self.stale_responses.store(count, Ordering::Release);
    }

    /// Fail the next `count` lookups with a network error.
    pub fn fail_lookups(&self, count: usize) {
        self.failed_responses.store(count, Ordering::Release);
    }

    /// Move leadership to another server for subsequent lookups.
    pub fn set_leader(&self, tablet_id: &str, server_id: &str) {
        let mut tablets = self.tablets.write();
        for locations in tablets.iter_mut() {
            if locations.tablet_id == tablet_id {
                for replica in locations.replicas.iter_mut() {
                    replica.role = if replica.server_id == server_id {
                        ReplicaRole::Leader
                    } else {
                        ReplicaRole::Follower
                    };
                }
            }
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookup_count.load(Ordering::Acquire)
    }
}

impl TabletLocator for StaticLocator {
    fn locate_tablet<'a>(
        &'a self,
        table_id: &'a str,
        partition_key: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<TabletLocations>> + Send + 'a>> {
        Box::pin(async move {
            self.lookup_count.fetch_add(1, Ordering::AcqRel);
            if self.failed_responses.load(Ordering::Acquire) > 0 {
                self.failed_responses.fetch_sub(1, Ordering::AcqRel);
                return Err(Status::network_error("master unreachable"));
            }
            let tablets = self.tablets.read();
            let mut locations = tablets
                .iter()
                .find(|t| t.partition.contains(partition_key))
                .cloned()
                .ok_or_else(|| {
                    Status::not_found(format!("no tablet covers key in table {}", table_id))
                })?;
            if self.stale_responses.load(Ordering::Acquire) > 0 {
                self.stale_responses.fetch_sub(1, Ordering::AcqRel);
                locations.stale = true;
            }
            Ok(locations)
        })
    }
}

/// In-process tablet service: executes planners against per-tablet
/// in-memory storage, with failure injection for routing tests.
pub struct LocalTabletService {
    schema: TableSchema,
    storages: RwLock<HashMap<String, Arc<MemStorage>>>,
    clock_micros: AtomicU64,
    /// Servers that reject every batch as not-the-leader.
    not_leader: RwLock<HashSet<String>>,
    /// Servers that are unreachable.
    dead: RwLock<HashSet<String>>,
    /// Batches still to reject with server-too-busy.
    busy_budget: AtomicUsize,
    pub batches_executed: AtomicUsize,
}

impl LocalTabletService {
    pub fn new() -> Self {
        Self {
            schema: kv_schema(),
            storages: RwLock::new(HashMap::new()),
            clock_micros: AtomicU64::new(1),
            not_leader: RwLock::new(HashSet::new()),
            dead: RwLock::new(HashSet::new()),
            busy_budget: AtomicUsize::new(0),
            batches_executed: AtomicUsize::new(0),
        }
    }

    pub fn storage(&self, tablet_id: &str) -> Arc<MemStorage> {
        let mut storages = self.storages.write();
        storages
            .entry(tablet_id.to_string())
            .or_insert_with(|| Arc::new(MemStorage::new(kv_schema())))
            .clone()
    }

    pub fn now(&self) -> HybridTime {
        HybridTime::from_micros(self.clock_micros.load(Ordering::Acquire))
    }

    fn next_commit_ht(&self) -> HybridTime {
        HybridTime::from_micros(self.clock_micros.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn mark_not_leader(&self, server_id: &str) {
        self.not_leader.write().insert(server_id.to_string());
    }

    pub fn clear_not_leader(&self, server_id: &str) {
        self.not_leader.write().remove(server_id);
    }

    pub fn kill_server(&self, server_id: &str) {
        self.dead.write().insert(server_id.to_string());
    }

    pub fn reject_busy(&self, batches: usize) {
        self.busy_budget.store(batches, Ordering::Release);
    }

    fn execute_write(&self, storage: &MemStorage, request: WriteOpRequest) -> OpOutcome {
        let read_time = HybridTime::MAX;
        let mut restart = HybridTime::MIN;

        let mut planner = WritePlanner::new(&self.schema, request.clone())?;
        let mut batch = WriteBatch::new();
        let mut ctx = ApplyContext {
            storage,
            batch: &mut batch,
            read_time,
            restart_read_ht: &mut restart,
        };
        match planner.apply(&mut ctx) {
            Ok(()) => {
                storage.apply_write_batch(&batch, self.next_commit_ht())?;
                Ok(planner.into_response())
            }
            Err(Status::QlError(message)) if request.stmt_type == WriteStmtType::Insert => {
                // Duplicate insert: the row materializes under the
                // last-writer rule while the response records the
                // duplicate.
                let tuple_id = planner.range_doc_key().clone();
                let mut update = request;
                update.stmt_type = WriteStmtType::Update;
                update.tuple_id = Some(tuple_id);
                update.column_new_values = std::mem::take(&mut update.column_values);

                let mut update_planner = WritePlanner::new(&self.schema, update)?;
                let mut update_batch = WriteBatch::new();
                let mut update_ctx = ApplyContext {
                    storage,
                    batch: &mut update_batch,
                    read_time,
                    restart_read_ht: &mut restart,
                };
                update_planner.apply(&mut update_ctx)?;
                storage.apply_write_batch(&update_batch, self.next_commit_ht())?;

                let mut response = RowOpResponse::ok();
                response.status = RowResponseStatus::QlError;
                response.error_message = Some(message);
                Ok(response)
            }
            Err(err) => Err(err),
        }
    }

    fn execute_read(&self, storage: &MemStorage, request: ReadOpRequest) -> OpOutcome {
        let mut restart = HybridTime::MIN;
        let mut planner = ReadPlanner::new(&self.schema, None, request);
        planner.execute(storage, None, self.now(), &mut restart)?;
        Ok(planner.into_response())
    }

    fn execute_command(&self, storage: &MemStorage, request: &TranslatedRequest) -> OpOutcome {
        match request {
            TranslatedRequest::Write(write) => match &write.verb {
                WriteVerb::Set(_) => {
                    let key = String::from_utf8_lossy(&write.kv.key).into_owned();
                    let value = write
                        .kv
                        .values
                        .first()
                        .map(|v| String::from_utf8_lossy(v).into_owned())
                        .unwrap_or_default();
                    self.execute_write(storage, insert_request(&key, &value))
                }
                other => Err(Status::invalid_command(format!(
                    "unsupported command verb {:?}",
                    other
                ))),
            },
            TranslatedRequest::Read(read) => match &read.verb {
                ReadVerb::Get(_) => {
                    let key = String::from_utf8_lossy(&read.kv.key).into_owned();
                    self.execute_read(storage, read_request(&key))
                }
                other => Err(Status::invalid_command(format!(
                    "unsupported command verb {:?}",
                    other
                ))),
            },
        }
    }
}

impl Default for LocalTabletService {
    fn default() -> Self {
        Self::new()
    }
}

impl TabletServer for LocalTabletService {
    fn execute_batch<'a>(
        &'a self,
        tablet_id: &'a str,
        server_id: &'a str,
        ops: &'a [Arc<SessionOp>],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OpOutcome>>> + Send + 'a>> {
        Box::pin(async move {
            if self.dead.read().contains(server_id) {
                return Err(Status::network_error("Connection refused"));
            }
            if self.not_leader.read().contains(server_id) {
                return Err(Status::illegal_state(format!(
                    "{} is not the leader for tablet {}",
                    server_id, tablet_id
                )));
            }
            if self.busy_budget.load(Ordering::Acquire) > 0 {
                self.busy_budget.fetch_sub(1, Ordering::AcqRel);
                return Err(Status::ServerTooBusy("service queue is full".to_string()));
            }

            self.batches_executed.fetch_add(1, Ordering::AcqRel);
            let storage = self.storage(tablet_id);
            let mut outcomes = Vec::with_capacity(ops.len());
            for op in ops {
                let outcome = match &op.payload {
                    OpPayload::Write(request) => self.execute_write(&storage, request.clone()),
                    OpPayload::Read(request) => self.execute_read(&storage, request.clone()),
                    OpPayload::Command(request) => self.execute_command(&storage, request),
                };
                outcomes.push(outcome);
            }
            Ok(outcomes)
        })
    }
}

/// A session wired to a fresh single-tablet cluster.
pub struct TestCluster {
    pub locator: Arc<StaticLocator>,
    pub service: Arc<LocalTabletService>,
    pub meta_cache: Arc<MetaCache>,
}

impl TestCluster {
    pub fn single_tablet() -> Self {
        Self::with_locator(StaticLocator::single_tablet())
    }

    pub fn replicated() -> Self {
        Self::with_locator(StaticLocator::replicated_tablet())
    }

    fn with_locator(locator: StaticLocator) -> Self {
        let locator = Arc::new(locator);
        let service = Arc::new(LocalTabletService::new());
        let meta_cache = Arc::new(MetaCache::new(locator.clone()));
        Self {
            locator,
            service,
            meta_cache,
        }
    }

    pub fn session(&self) -> Session {
        Session::new(self.meta_cache.clone(), self.service.clone())
    }
}

/// Extract the single string value of a completed point read.
pub fn single_string_value(response: &RowOpResponse) -> Option<String> {
    response.rows.first().and_then(|row| {
        row.first().and_then(|value| match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
    })
}
