//! Dynamic join and full-snapshot state transfer.
//!
//! A replica started with `join = true` doesn't know who the leader is
//! yet -- it only has a manifest of candidate addresses. It probes all of
//! them concurrently for `GetLeaderInfo`, merges every reply's fallback
//! roster (so even if the probed replica is itself a stale follower, its
//! view of the rest of the cluster still helps), and once a leader
//! address is known, asks that leader to admit it. The leader answers
//! with a full snapshot rather than a log segment -- there is no
//! replicated log to replay, just the current table contents.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::membership::{ClusterMembership, PeerInfo};
use crate::rpc::{Request, Response};
use crate::store::Store;
use crate::transport;
use crate::{pf_info, pf_warn, ChatError};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const OVERALL_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

struct ProbeOutcome {
    leader_address: Option<String>,
    fallback_addresses: Vec<String>,
}

async fn probe_one(address: String) -> Option<ProbeOutcome> {
    match transport::call(&address, &Request::GetLeaderInfo, PROBE_TIMEOUT).await {
        Ok(Response::LeaderInfo { leader_address, replica_addresses }) => Some(ProbeOutcome {
            leader_address,
            fallback_addresses: replica_addresses,
        }),
        _ => None,
    }
}

/// Scatter-gathers `GetLeaderInfo` across `candidates` within an overall
/// deadline, returning the first leader address seen plus the union of
/// every fallback roster any candidate reported -- useful for a joiner
/// whose static manifest is already stale.
pub async fn discover_leader(candidates: Vec<String>) -> Option<(String, Vec<String>)> {
    let probes = candidates.into_iter().map(probe_one);
    let outcomes = tokio::time::timeout(OVERALL_JOIN_TIMEOUT, join_all(probes))
        .await
        .unwrap_or_default();

    let mut leader = None;
    let mut fallback: HashSet<String> = HashSet::new();
    for outcome in outcomes.into_iter().flatten() {
        if leader.is_none() {
            leader = outcome.leader_address.clone();
        }
        fallback.extend(outcome.fallback_addresses);
    }
    leader.map(|l| (l, fallback.into_iter().collect()))
}

/// Runs the full join sequence for a fresh replica: discover the leader,
/// ask to be admitted, install the returned snapshot, and populate our
/// own membership view.
pub async fn join_cluster(
    membership: &Arc<ClusterMembership>,
    store: &Store,
    candidates: Vec<String>,
) -> Result<(u64, u64), ChatError> {
    let (leader_address, _fallback) = discover_leader(candidates)
        .await
        .ok_or_else(|| ChatError::Timeout("no reachable replica to join through".into()))?;

    pf_info!("discovered leader {}, requesting to join", leader_address);
    let request = Request::JoinCluster {
        server_id: membership.my_server_id,
        address: membership.my_address.clone(),
    };
    let response = transport::call(&leader_address, &request, OVERALL_JOIN_TIMEOUT).await?;
    match response {
        Response::JoinAccepted {
            accounts,
            messages,
            next_id,
            replica_addresses,
            heartbeat_interval,
            lease_timeout,
        } => {
            store.install_snapshot(accounts, messages, next_id).await?;
            membership.merge_known_addresses(&replica_addresses).await;
            membership
                .become_follower(Some(leader_address))
                .await;
            Ok((heartbeat_interval, lease_timeout))
        }
        Response::NotLeader { leader_address: Some(actual) } => {
            pf_warn!("probed {} reported stale leader, retrying against {}", leader_address, actual);
            Box::pin(join_cluster(membership, store, vec![actual])).await
        }
        other => Err(ChatError::Invalid(format!(
            "unexpected join response: {:?}",
            other
        ))),
    }
}

/// Leader-side handler: admits `server_id`/`address` into the cluster and
/// answers with everything the new replica needs to catch up in one shot.
pub async fn handle_join_cluster(
    membership: &Arc<ClusterMembership>,
    store: &Store,
    server_id: u8,
    address: String,
    heartbeat_interval: u64,
    lease_timeout: u64,
) -> Response {
    if !membership.is_leader() {
        return Response::NotLeader {
            leader_address: membership.current_leader_address().await,
        };
    }
    membership.add_peer(PeerInfo { server_id, address }).await;
    let (accounts, messages, next_id) = store.snapshot().await;
    Response::JoinAccepted {
        accounts,
        messages,
        next_id,
        replica_addresses: membership.all_addresses_including_self().await,
        heartbeat_interval,
        lease_timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discover_leader_with_no_reachable_candidates_returns_none() {
        let result = discover_leader(vec!["127.0.0.1:1".into()]).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn handle_join_cluster_rejects_when_not_leader() {
        let membership = Arc::new(ClusterMembership::new(1, "127.0.0.1:40020".into(), false));
        let path = std::env::temp_dir().join(format!(
            "quorumchat-join-test-{}.db",
            std::process::id()
        ));
        let store = Store::open(&path).await.unwrap();
        let resp = handle_join_cluster(&membership, &store, 2, "127.0.0.1:40021".into(), 3, 10).await;
        matches!(resp, Response::NotLeader { .. });
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn handle_join_cluster_admits_peer_when_leader() {
        let membership = Arc::new(ClusterMembership::new(1, "127.0.0.1:40022".into(), true));
        let path = std::env::temp_dir().join(format!(
            "quorumchat-join-test2-{}.db",
            std::process::id()
        ));
        let store = Store::open(&path).await.unwrap();
        let resp = handle_join_cluster(&membership, &store, 2, "127.0.0.1:40023".into(), 3, 10).await;
        match resp {
            Response::JoinAccepted { replica_addresses, .. } => {
                assert!(replica_addresses.contains(&"127.0.0.1:40022".to_string()));
                assert!(replica_addresses.contains(&"127.0.0.1:40023".to_string()));
            }
            other => panic!("unexpected response: {:?}", other),
        }
        let _ = tokio::fs::remove_file(&path).await;
    }
}
