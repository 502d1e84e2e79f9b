//! Leader-side best-effort replication fan-out: a record accepted locally
//! is pushed to every known peer concurrently, each with its own timeout.
//! A peer that doesn't answer in time or refuses the write is logged and
//! otherwise ignored -- there is no quorum or retry queue, matching the
//! "single-leader, best-effort fan-out" replication model this service
//! implements. A peer that misses writes while down catches up entirely
//! through the join/state-transfer path the next time it (re)joins.

use std::time::Duration;

use futures::future::join_all;

use crate::membership::ClusterMembership;
use crate::replication::ReplicationRecord;
use crate::rpc::{Request, Response};
use crate::transport;
use crate::{pf_warn, ChatError};

pub const FANOUT_TIMEOUT: Duration = Duration::from_secs(2);

/// Replicates `record` to every peer in `membership`, awaiting all
/// attempts but never failing the caller because of a peer's outcome.
pub async fn replicate_to_followers(membership: &ClusterMembership, record: ReplicationRecord) {
    let peers = membership.peers().await;
    let requests = peers.into_iter().map(|peer| {
        let record = record.clone();
        async move {
            let result = transport::call(
                &peer.address,
                &Request::ReplicateOperation { record },
                FANOUT_TIMEOUT,
            )
            .await;
            match result {
                Ok(Response::Ok) => {}
                Ok(other) => {
                    pf_warn!(
                        "replica {} rejected replicated op: {:?}",
                        peer.address,
                        other
                    );
                }
                Err(e) => {
                    pf_warn!("replica {} unreachable during fan-out: {}", peer.address, e);
                }
            }
        }
    });
    join_all(requests).await;
}

/// Fans a heartbeat out to every peer, used by the leader's heartbeat
/// loop. Unlike `replicate_to_followers` this doesn't need the results --
/// followers pull their own conclusions from whether the call arrives.
pub async fn broadcast_heartbeat(
    membership: &ClusterMembership,
    timeout: Duration,
) -> Result<(), ChatError> {
    let peers = membership.peers().await;
    let my_address = membership.my_address.clone();
    let roster = membership.all_addresses_including_self().await;
    let requests = peers.into_iter().map(|peer| {
        let my_address = my_address.clone();
        let roster = roster.clone();
        async move {
            let _ = transport::call(
                &peer.address,
                &Request::Heartbeat {
                    leader_address: my_address,
                    term_hint: 0,
                    replica_addresses: roster,
                },
                timeout,
            )
            .await;
        }
    });
    join_all(requests).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::PeerInfo;

    #[tokio::test]
    async fn fanout_to_unreachable_peers_does_not_panic_or_block() {
        let membership = ClusterMembership::new(1, "127.0.0.1:40001".into(), true);
        membership
            .add_peer(PeerInfo {
                server_id: 2,
                address: "127.0.0.1:1".into(),
            })
            .await;
        let record = ReplicationRecord::DeleteAccount {
            username: "nobody".into(),
        };
        replicate_to_followers(&membership, record).await;
    }
}
