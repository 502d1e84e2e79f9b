//! Bully-style leader election and the lease-based heartbeat loops that
//! drive it. There is no log or term number to agree on -- a replica is
//! leader for as long as it keeps sending heartbeats and nobody with a
//! higher `server_id` contests it, and steps down the moment its own
//! lease expires without having heard from the current leader.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::fanout;
use crate::membership::ClusterMembership;
use crate::rpc::{Request, Response};
use crate::transport;
use crate::{pf_info, pf_warn};

pub const HEARTBEAT_RPC_TIMEOUT: Duration = Duration::from_secs(1);
pub const ELECTION_RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs on the leader: broadcasts a heartbeat every `interval` until
/// `cancel` fires (role change, shutdown).
pub async fn leader_heartbeat_loop(
    membership: Arc<ClusterMembership>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if !membership.is_leader() {
                    return;
                }
                let _ = fanout::broadcast_heartbeat(&membership, HEARTBEAT_RPC_TIMEOUT).await;
            }
        }
    }
}

/// Runs on a follower: wakes up every `poll_interval` and, if
/// `lease_timeout` has elapsed since the last heartbeat was seen, starts
/// an election. Exits once this replica becomes leader or `cancel` fires.
pub async fn follower_watch_loop(
    membership: Arc<ClusterMembership>,
    lease_timeout: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if membership.is_leader() {
                    return;
                }
                // a small random jitter keeps every follower from firing an
                // election in the same tick right as a lease expires
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                if membership.time_since_last_heartbeat().await >= lease_timeout + jitter {
                    pf_warn!(
                        "lease expired ({:?} since last heartbeat), starting election",
                        lease_timeout
                    );
                    run_election(&membership).await;
                }
            }
        }
    }
}

/// Contests leadership against every peer with a higher `server_id`. If
/// any such peer is reachable and confirms it outranks us, we back off
/// and remain a follower awaiting its heartbeat; if all of them are
/// unreachable (or there are none), we declare ourselves leader and start
/// heartbeating immediately.
pub async fn run_election(membership: &Arc<ClusterMembership>) {
    let higher_peers: Vec<_> = membership
        .peers()
        .await
        .into_iter()
        .filter(|p| p.server_id > membership.my_server_id)
        .collect();

    let mut contested = false;
    for peer in &higher_peers {
        let request = Request::Election {
            candidate_server_id: membership.my_server_id,
            candidate_address: membership.my_address.clone(),
        };
        match transport::call(&peer.address, &request, ELECTION_RPC_TIMEOUT).await {
            Ok(Response::ElectionAck { accepted: true }) => {
                contested = true;
            }
            Ok(other) => {
                pf_warn!("unexpected election reply from {}: {:?}", peer.address, other);
            }
            Err(_) => {
                // peer unreachable: does not get to contest this round
            }
        }
    }

    if contested {
        pf_info!("stood down: a higher-id replica is reachable and contesting");
        membership.become_follower(None).await;
        return;
    }

    pf_info!("won election, becoming leader");
    membership.become_leader().await;
    fanout::broadcast_heartbeat(membership, HEARTBEAT_RPC_TIMEOUT).await.ok();
}

/// Answers an incoming `Election` RPC: since we are only ever queried by
/// a lower-id candidate (callers only contact higher-id peers), we always
/// accept and also kick off our own election so the highest reachable id
/// wins even if we are not currently leader ourselves.
pub async fn handle_election(
    membership: &Arc<ClusterMembership>,
    candidate_server_id: u8,
) -> Response {
    if candidate_server_id >= membership.my_server_id {
        // Shouldn't normally happen (bully only queries strictly higher
        // ids), but answer honestly rather than falsely claiming priority.
        return Response::ElectionAck { accepted: false };
    }
    let membership = Arc::clone(membership);
    tokio::spawn(async move {
        run_election(&membership).await;
    });
    Response::ElectionAck { accepted: true }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn election_with_no_higher_peers_wins_immediately() {
        let membership = Arc::new(ClusterMembership::new(5, "127.0.0.1:40010".into(), false));
        run_election(&membership).await;
        assert!(membership.is_leader());
    }

    #[tokio::test]
    async fn handle_election_rejects_lower_or_equal_candidate() {
        let membership = Arc::new(ClusterMembership::new(5, "127.0.0.1:40011".into(), false));
        let resp = handle_election(&membership, 5).await;
        matches!(resp, Response::ElectionAck { accepted: false });
        let resp = handle_election(&membership, 3).await;
        matches!(resp, Response::ElectionAck { accepted: false });
    }
}
