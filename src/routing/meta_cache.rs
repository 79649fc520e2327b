//! Meta cache: (table, partition key) to remote tablet.
//!
//! Lookups hit the cached entry when it is fresh; misses and stale
//! entries go to the master through the `TabletLocator` contract with
//! the enclosing operation's deadline. A master that itself reports
//! stale locations (inferred after a master restart) is polled until
//! it serves usable ones or the deadline fires. The cache is shared
//! across sessions; reads take a shared lock, refreshes take the
//! exclusive lock and bump the version counter.

use super::tablet::{PartitionRange, RemoteTablet, Replica, TabletId};
use crate::core::error::{Result, Status};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Poll interval while the master keeps reporting stale locations.
const STALE_LOCATION_POLL: Duration = Duration::from_millis(50);

/// One tablet's location record as served by the master.
#[derive(Debug, Clone)]
pub struct TabletLocations {
    pub tablet_id: TabletId,
    pub partition: PartitionRange,
    pub replicas: Vec<Replica>,
    /// The master marked the record stale; the entry is not yet usable
    /// and the cache must poll.
    pub stale: bool,
}

/// Master lookup contract.
pub trait TabletLocator: Send + Sync {
    /// Locate the tablet covering `partition_key` in `table_id`.
    fn locate_tablet<'a>(
        &'a self,
        table_id: &'a str,
        partition_key: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<TabletLocations>> + Send + 'a>>;
}

/// Shared lookup table from (table id, partition key) to remote
/// tablet.
pub struct MetaCache {
    locator: Arc<dyn TabletLocator>,
    /// Per table: partition start key to tablet, ordered for range
    /// lookup.
    tablets: RwLock<HashMap<String, BTreeMap<Bytes, Arc<RemoteTablet>>>>,
    /// Bumped on every refresh; observable by tests and stats.
    version: AtomicU64,
    lookups: AtomicU64,
    master_lookups: AtomicU64,
}

impl MetaCache {
    pub fn new(locator: Arc<dyn TabletLocator>) -> Self {
        Self {
            locator,
            tablets: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
            master_lookups: AtomicU64::new(0),
        }
    }

    /// Resolve the tablet for a partition key, refreshing from the
    /// master when the cached entry is absent or stale.
    pub async fn lookup_tablet(
        &self,
        table_id: &str,
        partition_key: &[u8],
        deadline: Instant,
    ) -> Result<Arc<RemoteTablet>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        if let Some(tablet) = self.cached_tablet(table_id, partition_key) {
            if !tablet.is_stale() {
                return Ok(tablet);
            }
        }

        let mut last_error: Option<Status> = None;
        loop {
            if Instant::now() >= deadline {
                let message = format!(
                    "tablet lookup for table {} did not finish before the deadline",
                    table_id
                );
                return Err(match last_error {
                    Some(cause) => Status::timed_out_with_cause(message, cause),
                    None => Status::timed_out(message),
                });
            }

            self.master_lookups.fetch_add(1, Ordering::Relaxed);
            match self.locator.locate_tablet(table_id, partition_key).await {
                Ok(locations) if locations.stale => {
                    // Master restart: locations not yet usable, poll.
                    tracing::debug!(table_id, "master served stale locations, polling");
                    tokio::time::sleep(STALE_LOCATION_POLL).await;
                }
                Ok(locations) => {
                    let tablet = self.install(table_id, locations)?;
                    return Ok(tablet);
                }
                Err(err) if err.is_retriable() => {
                    tracing::warn!(table_id, error = %err, "tablet lookup failed, retrying");
                    last_error = Some(err);
                    tokio::time::sleep(STALE_LOCATION_POLL).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fast-path cache read.
    pub fn cached_tablet(&self, table_id: &str, partition_key: &[u8]) -> Option<Arc<RemoteTablet>> {
        let tablets = self.tablets.read();
        let by_start = tablets.get(table_id)?;
        by_start
            .range(..=Bytes::copy_from_slice(partition_key))
            .next_back()
            .map(|(_, tablet)| tablet.clone())
            .filter(|tablet| tablet.partition().contains(partition_key))
    }

    fn install(&self, table_id: &str, locations: TabletLocations) -> Result<Arc<RemoteTablet>> {
        let mut tablets = self.tablets.write();
        let by_start = tablets.entry(table_id.to_string()).or_default();
        let start = locations.partition.start.clone();

        // Reuse the existing entry when the tablet is unchanged so
        // failure counters and external references stay coherent.
        if let Some(existing) = by_start.get(&start) {
            if existing.tablet_id() == locations.tablet_id {
                existing.refresh_replicas(locations.replicas)?;
                self.version.fetch_add(1, Ordering::Release);
                return Ok(existing.clone());
            }
        }

        let tablet = Arc::new(RemoteTablet::new(
            locations.tablet_id,
            locations.partition,
            locations.replicas,
        )?);
        by_start.insert(start, tablet.clone());
        self.version.fetch_add(1, Ordering::Release);
        Ok(tablet)
    }

    /// Report a server-level failure against a tablet's replica.
    pub fn mark_ts_failed(&self, tablet: &RemoteTablet, server_id: &str, cause: &Status) {
        tablet.mark_replica_failed(server_id, cause);
    }

    /// Invalidate a tablet entry explicitly.
    pub fn mark_stale(&self, tablet: &RemoteTablet) {
        tablet.mark_stale();
        self.version.fetch_add(1, Ordering::Release);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> MetaCacheStats {
        MetaCacheStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            master_lookups: self.master_lookups.load(Ordering::Relaxed),
            version: self.version(),
        }
    }
}

/// Counters for observability and tests.
#[derive(Debug, Clone, Copy)]
pub struct MetaCacheStats {
    pub lookups: u64,
    pub master_lookups: u64,
    pub version: u64,
}
