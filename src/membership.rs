//! Cluster membership and role state shared by the election, fan-out, and
//! join logic. One `ClusterMembership` lives per replica process and is
//! wrapped in an `Arc` so every background task and RPC handler sees the
//! same view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::RwLock;

/// This replica's role in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Leader,
    Follower,
}

/// A known peer and what this replica currently believes about it.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub server_id: u8,
    pub address: String,
}

pub struct ClusterMembership {
    pub my_server_id: u8,
    pub my_address: String,
    is_leader: AtomicBool,
    leader_address: RwLock<Option<String>>,
    peers: RwLock<Vec<PeerInfo>>,
    last_heartbeat_seen: RwLock<Instant>,
}

impl ClusterMembership {
    pub fn new(my_server_id: u8, my_address: String, is_leader: bool) -> Self {
        ClusterMembership {
            my_server_id,
            leader_address: RwLock::new(if is_leader {
                Some(my_address.clone())
            } else {
                None
            }),
            my_address,
            is_leader: AtomicBool::new(is_leader),
            peers: RwLock::new(Vec::new()),
            last_heartbeat_seen: RwLock::new(Instant::now()),
        }
    }

    pub fn role(&self) -> NodeRole {
        if self.is_leader.load(Ordering::SeqCst) {
            NodeRole::Leader
        } else {
            NodeRole::Follower
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Promotes this replica to leader, recording itself as the current
    /// leader address.
    pub async fn become_leader(&self) {
        self.is_leader.store(true, Ordering::SeqCst);
        *self.leader_address.write().await = Some(self.my_address.clone());
        *self.last_heartbeat_seen.write().await = Instant::now();
    }

    /// Steps down to follower, optionally recording a newly observed
    /// leader address (`None` while the leader is unknown, e.g. right
    /// after an election starts).
    pub async fn become_follower(&self, leader_address: Option<String>) {
        self.is_leader.store(false, Ordering::SeqCst);
        *self.leader_address.write().await = leader_address;
        *self.last_heartbeat_seen.write().await = Instant::now();
    }

    pub async fn current_leader_address(&self) -> Option<String> {
        self.leader_address.read().await.clone()
    }

    pub async fn note_heartbeat(&self, leader_address: String) {
        *self.leader_address.write().await = Some(leader_address);
        *self.last_heartbeat_seen.write().await = Instant::now();
    }

    pub async fn time_since_last_heartbeat(&self) -> std::time::Duration {
        self.last_heartbeat_seen.read().await.elapsed()
    }

    pub async fn set_peers(&self, peers: Vec<PeerInfo>) {
        *self.peers.write().await = peers;
    }

    pub async fn add_peer(&self, peer: PeerInfo) {
        let mut guard = self.peers.write().await;
        if !guard.iter().any(|p| p.address == peer.address) {
            guard.push(peer);
        }
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().await.clone()
    }

    /// Every peer address plus this replica's own, used when a joiner
    /// needs the full cluster roster.
    pub async fn all_addresses_including_self(&self) -> Vec<String> {
        let mut addrs: Vec<String> =
            self.peers.read().await.iter().map(|p| p.address.clone()).collect();
        addrs.push(self.my_address.clone());
        addrs
    }

    /// Folds a roster learned from a heartbeat or join reply into our
    /// peer set, skipping our own address and anything already known.
    /// Addresses arrive without a `server_id`; since election only
    /// compares ids against peers we contact directly (never ones we
    /// only know by address), an address-only entry is harmless -- it
    /// simply never outranks us until we learn its real id some other
    /// way (e.g. it contacts us directly during its own election).
    pub async fn merge_known_addresses(&self, addresses: &[String]) {
        let mut guard = self.peers.write().await;
        for addr in addresses {
            if addr == &self.my_address {
                continue;
            }
            if !guard.iter().any(|p| p.address == *addr) {
                guard.push(PeerInfo {
                    server_id: 0,
                    address: addr.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn becomes_leader_sets_self_as_leader_address() {
        let membership = ClusterMembership::new(1, "127.0.0.1:1".into(), false);
        assert_eq!(membership.role(), NodeRole::Follower);
        membership.become_leader().await;
        assert_eq!(membership.role(), NodeRole::Leader);
        assert_eq!(
            membership.current_leader_address().await,
            Some("127.0.0.1:1".into())
        );
    }

    #[tokio::test]
    async fn become_follower_records_observed_leader() {
        let membership = ClusterMembership::new(2, "127.0.0.1:2".into(), true);
        membership
            .become_follower(Some("127.0.0.1:1".into()))
            .await;
        assert_eq!(membership.role(), NodeRole::Follower);
        assert_eq!(
            membership.current_leader_address().await,
            Some("127.0.0.1:1".into())
        );
    }

    #[tokio::test]
    async fn add_peer_deduplicates_by_address() {
        let membership = ClusterMembership::new(1, "127.0.0.1:1".into(), true);
        membership
            .add_peer(PeerInfo {
                server_id: 2,
                address: "127.0.0.1:2".into(),
            })
            .await;
        membership
            .add_peer(PeerInfo {
                server_id: 2,
                address: "127.0.0.1:2".into(),
            })
            .await;
        assert_eq!(membership.peers().await.len(), 1);
    }

    #[tokio::test]
    async fn heartbeat_note_resets_elapsed_timer() {
        let membership = ClusterMembership::new(2, "127.0.0.1:2".into(), false);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        membership.note_heartbeat("127.0.0.1:1".into()).await;
        assert!(membership.time_since_last_heartbeat().await.as_millis() < 10);
    }
}
