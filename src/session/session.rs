//! Session: buffering, grouped flush, and retry under failure.
//!
//! A session buffers operations until a flush. Flushing resolves each
//! operation's tablet through the meta cache, groups operations per
//! tablet, and dispatches the groups concurrently; within one tablet
//! the batch keeps insertion order. Leadership changes and server
//! failures are absorbed by a retry loop bounded by the flush
//! deadline, with the last underlying error embedded in the final
//! timeout.

use super::errors::{CollectedError, ErrorCollector};
use super::op::{OpState, SessionOp};
use crate::core::error::{Result, Status};
use crate::plan::op::{RowOpResponse, RowResponseStatus};
use crate::routing::{
    is_replica_rejection, select_tablet_server, ConsistencyLevel, MetaCache, RemoteTablet,
    ReplicaSelection,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default session flush budget.
pub const DEFAULT_BUFFER_BYTES: usize = 7 * 1024 * 1024;

/// Per-operation outcome of one dispatched batch.
pub type OpOutcome = std::result::Result<RowOpResponse, Status>;

/// The tablet server RPC contract the session dispatches through.
///
/// A whole-batch error (connection refused, not-the-leader rejection,
/// queue overflow) comes back as `Err`; otherwise the outcome vector
/// aligns with the submitted operations.
pub trait TabletServer: Send + Sync {
    fn execute_batch<'a>(
        &'a self,
        tablet_id: &'a str,
        server_id: &'a str,
        ops: &'a [Arc<SessionOp>],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OpOutcome>>> + Send + 'a>>;
}

/// Flush behavior of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Operations buffer until an explicit flush.
    #[default]
    ManualFlush,
    /// Every apply flushes synchronously.
    AutoFlush,
}

/// A client session: owns its buffered operations and error collector.
pub struct Session {
    meta_cache: Arc<MetaCache>,
    server: Arc<dyn TabletServer>,
    timeout: Mutex<Duration>,
    flush_mode: Mutex<FlushMode>,
    read_consistency: Mutex<ConsistencyLevel>,
    buffered: Mutex<Vec<Arc<SessionOp>>>,
    buffered_bytes: AtomicUsize,
    buffer_budget: usize,
    in_flight: Arc<AtomicUsize>,
    errors: Arc<ErrorCollector>,
    closed: AtomicBool,
}

impl Session {
    pub fn new(meta_cache: Arc<MetaCache>, server: Arc<dyn TabletServer>) -> Self {
        Self {
            meta_cache,
            server,
            timeout: Mutex::new(Duration::from_secs(10)),
            flush_mode: Mutex::new(FlushMode::ManualFlush),
            read_consistency: Mutex::new(ConsistencyLevel::Strong),
            buffered: Mutex::new(Vec::new()),
            buffered_bytes: AtomicUsize::new(0),
            buffer_budget: DEFAULT_BUFFER_BYTES,
            in_flight: Arc::new(AtomicUsize::new(0)),
            errors: Arc::new(ErrorCollector::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_buffer_budget(mut self, bytes: usize) -> Self {
        self.buffer_budget = bytes;
        self
    }

    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
    }

    pub fn set_flush_mode(&self, mode: FlushMode) -> Result<()> {
        if self.has_pending_operations() {
            return Err(Status::illegal_state(
                "cannot change flush mode with pending operations",
            ));
        }
        *self.flush_mode.lock() = mode;
        Ok(())
    }

    pub fn set_read_consistency(&self, level: ConsistencyLevel) {
        *self.read_consistency.lock() = level;
    }

    /// Buffer one operation. Fails `Incomplete` when the buffered size
    /// would exceed the budget, and `IllegalState` on a closed session.
    /// In auto-flush mode the buffer is flushed before returning.
    pub async fn apply(&self, op: SessionOp) -> Result<Arc<SessionOp>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Status::illegal_state("session is closed"));
        }
        let size = op.buffered_size();
        if self.buffered_bytes.load(Ordering::Acquire) + size > self.buffer_budget {
            return Err(Status::Incomplete(format!(
                "buffered data size exceeds the budget of {} bytes",
                self.buffer_budget
            )));
        }
        let op = Arc::new(op);
        {
            let mut buffered = self.buffered.lock();
            buffered.push(op.clone());
        }
        self.buffered_bytes.fetch_add(size, Ordering::AcqRel);

        if *self.flush_mode.lock() == FlushMode::AutoFlush {
            self.flush().await?;
        }
        Ok(op)
    }

    /// Release all buffered operations and wait for completion.
    ///
    /// Returns the aggregate `IoError` when any operation failed;
    /// per-operation details are available from
    /// [`Session::get_pending_errors`].
    pub async fn flush(&self) -> Result<()> {
        let job = self.begin_flush();
        Self::run_flush(job).await
    }

    /// Flush in the background; the callback runs exactly once, even
    /// if the session is dropped immediately after this call.
    pub fn flush_async<F>(&self, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let job = self.begin_flush();
        tokio::spawn(async move {
            callback(Self::run_flush(job).await);
        });
    }

    /// Drain the errors collected by past flushes.
    pub fn get_pending_errors(&self) -> Vec<CollectedError> {
        self.errors.take()
    }

    pub fn has_pending_operations(&self) -> bool {
        !self.buffered.lock().is_empty() || self.in_flight.load(Ordering::Acquire) > 0
    }

    pub fn count_buffered_operations(&self) -> usize {
        self.buffered.lock().len()
    }

    /// Close the session. Refuses while any operation is buffered or
    /// in flight.
    pub fn close(&self) -> Result<()> {
        if self.has_pending_operations() {
            return Err(Status::illegal_state(
                "cannot close a session with pending operations",
            ));
        }
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn begin_flush(&self) -> FlushJob {
        let ops = std::mem::take(&mut *self.buffered.lock());
        self.buffered_bytes.store(0, Ordering::Release);
        self.in_flight.fetch_add(ops.len(), Ordering::AcqRel);
        for op in &ops {
            op.mark_in_flight();
        }
        FlushJob {
            ops,
            meta_cache: self.meta_cache.clone(),
            server: self.server.clone(),
            deadline: Instant::now() + *self.timeout.lock(),
            read_consistency: *self.read_consistency.lock(),
            errors: self.errors.clone(),
            in_flight: self.in_flight.clone(),
        }
    }

    /// The flush body. Owns everything it needs so the session itself
    /// may be dropped while an async flush is still running.
    async fn run_flush(job: FlushJob) -> Result<()> {
        let FlushJob {
            ops,
            meta_cache,
            server,
            deadline,
            read_consistency,
            errors,
            in_flight,
        } = job;

        if ops.is_empty() {
            return Ok(());
        }
        let total = ops.len();

        // Resolve each operation's tablet, grouping per tablet in
        // insertion order.
        let mut groups: Vec<(Arc<RemoteTablet>, Vec<Arc<SessionOp>>)> = Vec::new();
        let mut group_index: HashMap<String, usize> = HashMap::new();
        for op in &ops {
            let partition_key = match op.payload.routing_key() {
                Ok(key) => key,
                Err(status) => {
                    fail_op(&errors, op, status);
                    continue;
                }
            };
            match meta_cache
                .lookup_tablet(&op.table_id, &partition_key, deadline)
                .await
            {
                Ok(tablet) => {
                    let index = *group_index
                        .entry(tablet.tablet_id().to_string())
                        .or_insert_with(|| {
                            groups.push((tablet.clone(), Vec::new()));
                            groups.len() - 1
                        });
                    groups[index].1.push(op.clone());
                }
                Err(status) => {
                    fail_op(&errors, op, status);
                }
            }
        }

        // Dispatch groups concurrently; order within a group holds.
        let mut tasks = tokio::task::JoinSet::new();
        for (tablet, group_ops) in groups {
            let meta_cache = meta_cache.clone();
            let server = server.clone();
            let errors = errors.clone();
            tasks.spawn(async move {
                dispatch_tablet_batch(
                    meta_cache,
                    server,
                    errors,
                    tablet,
                    group_ops,
                    deadline,
                    read_consistency,
                )
                .await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(join_error) = joined {
                tracing::error!(error = %join_error, "flush dispatch task panicked");
            }
        }

        in_flight.fetch_sub(total, Ordering::AcqRel);

        let failed = ops
            .iter()
            .filter(|op| matches!(op.state(), OpState::Errored(_)))
            .count();
        if failed > 0 {
            return Err(Status::IoError { failed, total });
        }
        Ok(())
    }
}

struct FlushJob {
    ops: Vec<Arc<SessionOp>>,
    meta_cache: Arc<MetaCache>,
    server: Arc<dyn TabletServer>,
    deadline: Instant,
    read_consistency: ConsistencyLevel,
    errors: Arc<ErrorCollector>,
    in_flight: Arc<AtomicUsize>,
}

fn fail_op(errors: &ErrorCollector, op: &Arc<SessionOp>, status: Status) {
    errors.add(CollectedError {
        table_id: op.table_id.clone(),
        key: op.payload.routing_key().unwrap_or_default(),
        status: status.clone(),
    });
    op.fail(status);
}

/// One tablet's batch: select a server, dispatch, and absorb
/// leadership changes and transient failures until the deadline.
async fn dispatch_tablet_batch(
    meta_cache: Arc<MetaCache>,
    server: Arc<dyn TabletServer>,
    errors: Arc<ErrorCollector>,
    tablet: Arc<RemoteTablet>,
    ops: Vec<Arc<SessionOp>>,
    deadline: Instant,
    read_consistency: ConsistencyLevel,
) {
    // Operations whose own deadline already passed fail up front.
    let now = Instant::now();
    let (ops, expired): (Vec<_>, Vec<_>) = ops
        .into_iter()
        .partition(|op| op.deadline.map(|d| d > now).unwrap_or(true));
    for op in expired {
        fail_op(&errors, &op, Status::timed_out("operation deadline elapsed"));
    }
    if ops.is_empty() {
        return;
    }

    let selection = if ops.iter().any(|op| op.payload.is_write()) {
        ReplicaSelection::LeaderOnly
    } else {
        read_consistency.selection()
    };
    let blacklist: HashSet<String> = HashSet::new();

    let mut tablet = tablet;
    let mut attempt: u32 = 0;
    let mut last_error: Option<Status> = None;

    loop {
        if Instant::now() >= deadline {
            let status = match last_error {
                Some(cause) => {
                    Status::timed_out_with_cause("flush deadline elapsed", cause)
                }
                None => Status::timed_out("flush deadline elapsed"),
            };
            for op in &ops {
                fail_op(&errors, op, status.clone());
            }
            return;
        }

        // A stale tablet must be refreshed before selection.
        if tablet.is_stale() {
            let partition_key = match ops[0].payload.routing_key() {
                Ok(key) => key,
                Err(status) => {
                    for op in &ops {
                        fail_op(&errors, op, status.clone());
                    }
                    return;
                }
            };
            match meta_cache
                .lookup_tablet(&ops[0].table_id, &partition_key, deadline)
                .await
            {
                Ok(fresh) => tablet = fresh,
                Err(status) => {
                    for op in &ops {
                        fail_op(&errors, op, status.clone());
                    }
                    return;
                }
            }
        }

        let chosen = match select_tablet_server(&tablet, selection, &blacklist, None) {
            Ok((_candidates, chosen)) => chosen,
            Err(status) => {
                // Possibly mid-election; refresh and retry. A server
                // error already on record is the more useful cause to
                // surface, so keep it.
                tracing::debug!(
                    tablet_id = tablet.tablet_id(),
                    error = %status,
                    "replica selection failed, refreshing"
                );
                tablet.mark_stale();
                last_error.get_or_insert(status);
                attempt += 1;
                tokio::time::sleep(backoff_delay(attempt)).await;
                continue;
            }
        };

        let result = tokio::time::timeout_at(
            deadline,
            server.execute_batch(tablet.tablet_id(), &chosen.server_id, &ops),
        )
        .await;

        match result {
            Err(_elapsed) => {
                let status = match last_error.take() {
                    Some(cause) => {
                        Status::timed_out_with_cause("batch dispatch timed out", cause)
                    }
                    None => Status::timed_out("batch dispatch timed out"),
                };
                for op in &ops {
                    fail_op(&errors, op, status.clone());
                }
                return;
            }
            Ok(Ok(outcomes)) => {
                apply_outcomes(&errors, &ops, outcomes);
                return;
            }
            Ok(Err(status)) if matches!(status, Status::ServerTooBusy(_)) => {
                // Queue overflow: back off and retry the same replica.
                last_error = Some(status);
                attempt += 1;
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            Ok(Err(status)) if is_replica_rejection(&status) => {
                // Not the leader, tablet not running, or unreachable:
                // exclude the replica for a bounded period and retry
                // with the same policy.
                meta_cache.mark_ts_failed(&tablet, &chosen.server_id, &status);
                tablet.demote_leader(&chosen.server_id);
                tablet.mark_stale();
                last_error = Some(status);
                attempt += 1;
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            Ok(Err(status)) => {
                for op in &ops {
                    fail_op(&errors, op, status.clone());
                }
                return;
            }
        }
    }
}

fn apply_outcomes(errors: &ErrorCollector, ops: &[Arc<SessionOp>], outcomes: Vec<OpOutcome>) {
    if outcomes.len() != ops.len() {
        let status = Status::illegal_state(format!(
            "server returned {} outcomes for {} operations",
            outcomes.len(),
            ops.len()
        ));
        for op in ops {
            fail_op(errors, op, status.clone());
        }
        return;
    }
    for (op, outcome) in ops.iter().zip(outcomes) {
        match outcome {
            Ok(response) => {
                let duplicate = response.status == RowResponseStatus::QlError;
                if duplicate && op.duplicates_are_errors {
                    let message = response
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "query error".to_string());
                    fail_op(errors, op, Status::ql_error(message));
                } else {
                    op.complete(response);
                }
            }
            Err(status) => fail_op(errors, op, status),
        }
    }
}

/// Exponential backoff with deterministic jitter.
fn backoff_delay(attempt: u32) -> Duration {
    use std::hash::Hasher;
    let base_ms = 10u64.saturating_mul(1 << attempt.min(6).saturating_sub(1));
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let mut hasher = twox_hash::XxHash64::with_seed(u64::from(attempt));
    hasher.write(&nanos.to_be_bytes());
    let jitter = hasher.finish() % (base_ms / 2 + 1);
    Duration::from_millis(base_ms / 2 + jitter)
}
