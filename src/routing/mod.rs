//! Client routing: partition hashing, meta cache, replica selection.
//!
//! A request's primary key hashes to a 16-bit partition key; the meta
//! cache maps (table, partition key) to a remote tablet; the selector
//! picks one replica under the caller's policy, blacklist, and the
//! tablet's failure marks.

pub mod meta_cache;
pub mod selector;
pub mod tablet;

pub use meta_cache::{MetaCache, MetaCacheStats, TabletLocations, TabletLocator};
pub use selector::{is_replica_rejection, select_tablet_server, ConsistencyLevel, ReplicaSelection};
pub use tablet::{
    PartitionRange, RemoteTablet, Replica, ReplicaRole, TabletId, TabletServerId,
    FAILURE_RETENTION,
};

use bytes::Bytes;
use std::hash::Hasher;

/// Partition key of a primary key: the big-endian 16-bit hash code.
///
/// Tablet partition ranges cover this two-byte keyspace.
pub fn partition_key_for(key: &[u8]) -> Bytes {
    let mut hasher = twox_hash::XxHash64::with_seed(0);
    hasher.write(key);
    let code = (hasher.finish() & 0xFFFF) as u16;
    Bytes::copy_from_slice(&code.to_be_bytes())
}
