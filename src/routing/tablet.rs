//! Remote tablet state: replicas, leadership, staleness, failures.
//!
//! A remote tablet is the client's view of one tablet: its partition
//! range, the ordered replica list, the current leader if known, a
//! stale flag forcing a refresh before the next use, and per-replica
//! failure marks that age out after a bounded period.

use crate::core::error::{Result, Status};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub type TabletId = String;
pub type TabletServerId = String;

/// How long a replica failure mark excludes the replica from
/// selection.
pub const FAILURE_RETENTION: Duration = Duration::from_secs(60);

/// Role of a replica within its tablet's consensus group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaRole {
    Leader,
    Follower,
    Learner,
}

/// One replica of a tablet.
#[derive(Debug, Clone)]
pub struct Replica {
    pub server_id: TabletServerId,
    pub addr: String,
    pub role: ReplicaRole,
    /// Placement location used by closest-replica selection.
    pub location: String,
}

impl Replica {
    pub fn new(server_id: impl Into<String>, addr: impl Into<String>, role: ReplicaRole) -> Self {
        Self {
            server_id: server_id.into(),
            addr: addr.into(),
            role,
            location: String::new(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }
}

/// Partition key range `[start, end)`; an empty end is unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionRange {
    pub start: Bytes,
    pub end: Bytes,
}

impl PartitionRange {
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Whole keyspace.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, partition_key: &[u8]) -> bool {
        partition_key >= self.start.as_ref()
            && (self.end.is_empty() || partition_key < self.end.as_ref())
    }
}

#[derive(Debug, Default)]
struct FailureMark {
    count: u64,
    failed_until: Option<Instant>,
}

/// Client-side view of one tablet.
pub struct RemoteTablet {
    tablet_id: TabletId,
    partition: PartitionRange,
    replicas: RwLock<Vec<Replica>>,
    stale: AtomicBool,
    failures: RwLock<HashMap<TabletServerId, FailureMark>>,
}

impl RemoteTablet {
    /// Build from a location record, enforcing the single-leader
    /// invariant.
    pub fn new(
        tablet_id: impl Into<String>,
        partition: PartitionRange,
        replicas: Vec<Replica>,
    ) -> Result<Self> {
        let leaders = replicas
            .iter()
            .filter(|r| r.role == ReplicaRole::Leader)
            .count();
        if leaders > 1 {
            return Err(Status::illegal_state(format!(
                "tablet has {} leaders",
                leaders
            )));
        }
        Ok(Self {
            tablet_id: tablet_id.into(),
            partition,
            replicas: RwLock::new(replicas),
            stale: AtomicBool::new(false),
            failures: RwLock::new(HashMap::new()),
        })
    }

    pub fn tablet_id(&self) -> &str {
        &self.tablet_id
    }

    pub fn partition(&self) -> &PartitionRange {
        &self.partition
    }

    pub fn replicas(&self) -> Vec<Replica> {
        self.replicas.read().clone()
    }

    /// Current leader replica, if any is known and not failed.
    pub fn leader(&self) -> Option<Replica> {
        self.replicas
            .read()
            .iter()
            .find(|r| r.role == ReplicaRole::Leader)
            .cloned()
    }

    /// Replace the replica view after a refresh; clears staleness.
    ///
    /// Failure marks survive the refresh: a server that failed stays
    /// excluded until its mark ages out, even if the master still
    /// lists it.
    pub fn refresh_replicas(&self, replicas: Vec<Replica>) -> Result<()> {
        let leaders = replicas
            .iter()
            .filter(|r| r.role == ReplicaRole::Leader)
            .count();
        if leaders > 1 {
            return Err(Status::illegal_state(format!(
                "tablet has {} leaders",
                leaders
            )));
        }
        *self.replicas.write() = replicas;
        self.stale.store(false, Ordering::Release);
        Ok(())
    }

    /// Mark the whole entry stale; it must be refreshed from the
    /// master before the next selection.
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
        tracing::debug!(tablet_id = %self.tablet_id, "tablet marked stale");
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Record a replica-level failure for a bounded period.
    pub fn mark_replica_failed(&self, server_id: &str, cause: &Status) {
        let mut failures = self.failures.write();
        let mark = failures.entry(server_id.to_string()).or_default();
        mark.count += 1;
        mark.failed_until = Some(Instant::now() + FAILURE_RETENTION);
        tracing::info!(
            tablet_id = %self.tablet_id,
            server_id,
            failures = mark.count,
            %cause,
            "replica marked failed"
        );
    }

    /// Whether the replica is inside its failure window.
    pub fn is_replica_failed(&self, server_id: &str) -> bool {
        self.failures
            .read()
            .get(server_id)
            .and_then(|mark| mark.failed_until)
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    pub fn failure_count(&self, server_id: &str) -> u64 {
        self.failures
            .read()
            .get(server_id)
            .map(|mark| mark.count)
            .unwrap_or(0)
    }

    /// Demote the current leader in the local view; used after a
    /// not-the-leader rejection until the next refresh.
    pub fn demote_leader(&self, server_id: &str) {
        let mut replicas = self.replicas.write();
        for replica in replicas.iter_mut() {
            if replica.server_id == server_id && replica.role == ReplicaRole::Leader {
                replica.role = ReplicaRole::Follower;
            }
        }
    }
}

impl std::fmt::Debug for RemoteTablet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTablet")
            .field("tablet_id", &self.tablet_id)
            .field("partition", &self.partition)
            .field("stale", &self.is_stale())
            .finish()
    }
}
