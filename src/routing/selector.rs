//! Tablet server selection under blacklist and failure marks.
//!
//! Given a remote tablet and a selection policy the selector returns
//! one replica. A per-call blacklist excludes replicas; replicas inside
//! their failure window are excluded the same way. Exhausting every
//! replica yields `ServiceUnavailable` under every policy.

use super::tablet::{RemoteTablet, Replica, TabletServerId};
use crate::core::error::{Result, Status};
use std::collections::HashSet;

/// Replica selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaSelection {
    /// Only the current leader is acceptable.
    LeaderOnly,
    /// Any live replica, preferring locality.
    ClosestReplica,
    /// The first live replica in the tablet's ordered list.
    FirstReplica,
}

/// Consistency level of a read, mapped onto a selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsistencyLevel {
    /// Read from the leader.
    #[default]
    Strong,
    /// Read from any replica; monotonic per tablet.
    ConsistentPrefix,
}

impl ConsistencyLevel {
    pub fn selection(&self) -> ReplicaSelection {
        match self {
            ConsistencyLevel::Strong => ReplicaSelection::LeaderOnly,
            ConsistencyLevel::ConsistentPrefix => ReplicaSelection::ClosestReplica,
        }
    }
}

/// Pick one tablet server for the tablet.
///
/// Returns the candidate list (every replica the policy would accept,
/// in tablet order) and the chosen replica. A stale tablet yields no
/// selector output until it is refreshed.
pub fn select_tablet_server(
    tablet: &RemoteTablet,
    selection: ReplicaSelection,
    blacklist: &HashSet<TabletServerId>,
    local_location: Option<&str>,
) -> Result<(Vec<Replica>, Replica)> {
    if tablet.is_stale() {
        return Err(Status::illegal_state(format!(
            "tablet {} is stale and must be refreshed",
            tablet.tablet_id()
        )));
    }

    let usable = |replica: &Replica| {
        !blacklist.contains(&replica.server_id) && !tablet.is_replica_failed(&replica.server_id)
    };

    match selection {
        ReplicaSelection::LeaderOnly => {
            let leader = tablet.leader().filter(usable);
            match leader {
                Some(leader) => Ok((vec![leader.clone()], leader)),
                None => Err(Status::service_unavailable(format!(
                    "no usable leader for tablet {}",
                    tablet.tablet_id()
                ))),
            }
        }
        ReplicaSelection::ClosestReplica => {
            let candidates: Vec<Replica> =
                tablet.replicas().into_iter().filter(|r| usable(r)).collect();
            let chosen = candidates
                .iter()
                .find(|r| {
                    local_location
                        .map(|location| r.location == location)
                        .unwrap_or(false)
                })
                .or_else(|| candidates.first())
                .cloned();
            match chosen {
                Some(chosen) => Ok((candidates, chosen)),
                None => Err(Status::service_unavailable(format!(
                    "no usable replica for tablet {}",
                    tablet.tablet_id()
                ))),
            }
        }
        ReplicaSelection::FirstReplica => {
            let candidates: Vec<Replica> =
                tablet.replicas().into_iter().filter(|r| usable(r)).collect();
            match candidates.first().cloned() {
                Some(chosen) => Ok((candidates, chosen)),
                None => Err(Status::service_unavailable(format!(
                    "no usable replica for tablet {}",
                    tablet.tablet_id()
                ))),
            }
        }
    }
}

/// Whether a server-side rejection should exclude the replica and be
/// retried on another one within the deadline.
pub fn is_replica_rejection(status: &Status) -> bool {
    matches!(
        status,
        Status::IllegalState(_)
            | Status::NetworkError(_)
            | Status::ServiceUnavailable(_)
            | Status::ServerTooBusy(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::tablet::{PartitionRange, ReplicaRole};

    fn tablet() -> RemoteTablet {
        RemoteTablet::new(
            "t",
            PartitionRange::unbounded(),
            vec![
                Replica::new("a", "h1:1", ReplicaRole::Leader).with_location("zone-1"),
                Replica::new("b", "h2:1", ReplicaRole::Follower).with_location("zone-2"),
                Replica::new("c", "h3:1", ReplicaRole::Follower).with_location("zone-3"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_leader_only_selects_leader() {
        let tablet = tablet();
        let (candidates, chosen) =
            select_tablet_server(&tablet, ReplicaSelection::LeaderOnly, &HashSet::new(), None)
                .unwrap();
        assert_eq!(chosen.server_id, "a");
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_leader_only_blacklisted_fails() {
        let tablet = tablet();
        let blacklist = HashSet::from(["a".to_string()]);
        let err =
            select_tablet_server(&tablet, ReplicaSelection::LeaderOnly, &blacklist, None)
                .unwrap_err();
        assert!(matches!(err, Status::ServiceUnavailable(_)));
    }

    #[test]
    fn test_closest_prefers_local_location() {
        let tablet = tablet();
        let (_, chosen) = select_tablet_server(
            &tablet,
            ReplicaSelection::ClosestReplica,
            &HashSet::new(),
            Some("zone-3"),
        )
        .unwrap();
        assert_eq!(chosen.server_id, "c");
    }

    #[test]
    fn test_first_replica_order() {
        let tablet = tablet();
        let blacklist = HashSet::from(["a".to_string()]);
        let (_, chosen) =
            select_tablet_server(&tablet, ReplicaSelection::FirstReplica, &blacklist, None)
                .unwrap();
        assert_eq!(chosen.server_id, "b");
    }

    #[test]
    fn test_all_blacklisted_fails_every_policy() {
        let tablet = tablet();
        let blacklist = HashSet::from(["a".to_string(), "b".to_string(), "c".to_string()]);
        for selection in [
            ReplicaSelection::LeaderOnly,
            ReplicaSelection::ClosestReplica,
            ReplicaSelection::FirstReplica,
        ] {
            let err = select_tablet_server(&tablet, selection, &blacklist, None).unwrap_err();
            assert!(matches!(err, Status::ServiceUnavailable(_)));
        }
    }

    #[test]
    fn test_all_failed_matches_all_blacklisted() {
        let tablet = tablet();
        for server in ["a", "b", "c"] {
            tablet.mark_replica_failed(server, &Status::network_error("test"));
        }
        for selection in [
            ReplicaSelection::LeaderOnly,
            ReplicaSelection::ClosestReplica,
            ReplicaSelection::FirstReplica,
        ] {
            let err =
                select_tablet_server(&tablet, selection, &HashSet::new(), None).unwrap_err();
            assert!(matches!(err, Status::ServiceUnavailable(_)));
        }
    }

    #[test]
    fn test_stale_tablet_yields_nothing() {
        let tablet = tablet();
        tablet.mark_stale();
        let err =
            select_tablet_server(&tablet, ReplicaSelection::LeaderOnly, &HashSet::new(), None)
                .unwrap_err();
        assert!(matches!(err, Status::IllegalState(_)));
    }
}
