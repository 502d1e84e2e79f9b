//! Ties the store, membership state, and RPC dispatch together into one
//! replica node, and owns the background election/heartbeat tasks' loop
//! lifetimes via a `CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ReplicaConfig;
use crate::election;
use crate::fanout;
use crate::join;
use crate::membership::ClusterMembership;
use crate::replication::{self, ReplicationRecord};
use crate::rpc::{Request, ReplicaService, Response};
use crate::store::Store;
use crate::transport;
use crate::{chatops, pf_error, pf_info, ChatError};

pub struct ReplicaNode {
    pub store: Store,
    pub membership: Arc<ClusterMembership>,
    pub heartbeat_interval: Duration,
    pub lease_timeout: Duration,
    cancel: CancellationToken,
}

impl ReplicaNode {
    pub async fn new(config: &ReplicaConfig) -> Result<Self, ChatError> {
        let store = Store::open(config.resolved_db_file()).await?;
        let membership = Arc::new(ClusterMembership::new(
            config.server_id,
            config.my_address(),
            config.initial_leader && !config.join,
        ));
        Ok(ReplicaNode {
            store,
            membership,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval),
            lease_timeout: Duration::from_secs(config.lease_timeout),
            cancel: CancellationToken::new(),
        })
    }

    /// Seeds the static peer list from config for a replica that starts
    /// as an already-known member (not joining dynamically).
    pub async fn seed_static_peers(&self, addresses: &[String]) {
        for (i, addr) in addresses.iter().enumerate() {
            if *addr == self.membership.my_address {
                continue;
            }
            self.membership
                .add_peer(crate::membership::PeerInfo {
                    // static peers' real ids are learned the first time
                    // they contact us; 0 is a harmless placeholder, same
                    // as addresses learned via heartbeat gossip.
                    server_id: 0,
                    address: addr.clone(),
                })
                .await;
            let _ = i;
        }
    }

    /// Runs the dynamic join sequence against `candidates`, installing
    /// the returned snapshot and adopting the leader's reported timing.
    pub async fn join(&mut self, candidates: Vec<String>) -> Result<(), ChatError> {
        let (heartbeat_interval, lease_timeout) =
            join::join_cluster(&self.membership, &self.store, candidates).await?;
        self.heartbeat_interval = Duration::from_secs(heartbeat_interval);
        self.lease_timeout = Duration::from_secs(lease_timeout);
        Ok(())
    }

    /// Spawns the heartbeat/election background loops appropriate to our
    /// current role, and binds + serves the RPC listener. Runs until the
    /// listener is dropped or an I/O error occurs.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), ChatError> {
        self.spawn_role_loop();
        loop {
            let (mut stream, peer_addr) = listener.accept().await?;
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    let request = match transport::read_frame::<Request>(&mut stream).await {
                        Ok(r) => r,
                        Err(_) => return,
                    };
                    let response = this.dispatch(request).await;
                    if let Err(e) = transport::write_frame(&mut stream, &response).await {
                        pf_error!("failed writing response to {}: {}", peer_addr, e);
                        return;
                    }
                }
            });
        }
    }

    fn spawn_role_loop(self: &Arc<Self>) {
        let membership = Arc::clone(&self.membership);
        let heartbeat_interval = self.heartbeat_interval;
        let lease_timeout = self.lease_timeout;
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                if membership.is_leader() {
                    election::leader_heartbeat_loop(
                        Arc::clone(&membership),
                        heartbeat_interval,
                        cancel.clone(),
                    )
                    .await;
                } else {
                    election::follower_watch_loop(
                        Arc::clone(&membership),
                        lease_timeout,
                        heartbeat_interval,
                        cancel.clone(),
                    )
                    .await;
                }
            }
        });
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn require_leader(&self) -> Option<Response> {
        if self.membership.is_leader() {
            None
        } else {
            Some(Response::NotLeader {
                leader_address: self.membership.current_leader_address().await,
            })
        }
    }

    async fn commit_and_fanout(&self, record: ReplicationRecord) {
        fanout::replicate_to_followers(&self.membership, record).await;
    }
}

#[async_trait]
impl ReplicaService for ReplicaNode {
    async fn create_account(&self, username: String, password: String) -> Response {
        if let Some(not_leader) = self.require_leader().await {
            return not_leader;
        }
        match chatops::create_account(&self.store, username, password).await {
            Ok(record) => {
                self.commit_and_fanout(record).await;
                Response::Ok
            }
            Err(e) => Response::Error(e.to_string()),
        }
    }

    async fn login(&self, username: String, password: String) -> Response {
        // reads are served by any replica, leader or follower
        match chatops::login(&self.store, &username, &password).await {
            Ok(unread_count) => Response::LoginOk {
                message: format!("welcome back, {}", username),
                unread_count,
            },
            Err(e) => Response::Error(e.to_string()),
        }
    }

    async fn list_accounts(&self, pattern: String) -> Response {
        Response::Accounts(chatops::list_accounts(&self.store, &pattern, "").await)
    }

    async fn send_message(&self, sender: String, recipient: String, body: String) -> Response {
        if let Some(not_leader) = self.require_leader().await {
            return not_leader;
        }
        match chatops::send_message(&self.store, sender, recipient, body).await {
            Ok((_msg, record)) => {
                self.commit_and_fanout(record).await;
                Response::Ok
            }
            Err(e) => Response::Error(e.to_string()),
        }
    }

    async fn read_new_messages(&self, username: String) -> Response {
        if let Some(not_leader) = self.require_leader().await {
            return not_leader;
        }
        match chatops::read_new_messages(&self.store, &username).await {
            Ok(messages) => Response::Messages(messages),
            Err(e) => Response::Error(e.to_string()),
        }
    }

    async fn list_messages(&self, username: String) -> Response {
        Response::Messages(chatops::list_messages(&self.store, &username).await)
    }

    async fn delete_messages(&self, username: String, id: i64) -> Response {
        if let Some(not_leader) = self.require_leader().await {
            return not_leader;
        }
        match chatops::delete_messages(&self.store, username, id).await {
            Ok(record) => {
                self.commit_and_fanout(record).await;
                Response::Ok
            }
            Err(e) => Response::Error(e.to_string()),
        }
    }

    async fn delete_account(&self, username: String) -> Response {
        if let Some(not_leader) = self.require_leader().await {
            return not_leader;
        }
        match chatops::delete_account(&self.store, username).await {
            Ok(record) => {
                self.commit_and_fanout(record).await;
                Response::Ok
            }
            Err(e) => Response::Error(e.to_string()),
        }
    }

    async fn get_leader_info(&self) -> Response {
        Response::LeaderInfo {
            leader_address: self.membership.current_leader_address().await,
            replica_addresses: self.membership.all_addresses_including_self().await,
        }
    }

    async fn heartbeat(
        &self,
        leader_address: String,
        _term_hint: u8,
        replica_addresses: Vec<String>,
    ) -> Response {
        if self.membership.is_leader() && leader_address != self.membership.my_address {
            pf_info!("observed a competing leader {}, stepping down", leader_address);
        }
        self.membership.become_follower(Some(leader_address)).await;
        self.membership.merge_known_addresses(&replica_addresses).await;
        Response::Ok
    }

    async fn election(&self, candidate_server_id: u8, _candidate_address: String) -> Response {
        election::handle_election(&self.membership, candidate_server_id).await
    }

    async fn replicate_operation(&self, record: ReplicationRecord) -> Response {
        match replication::apply(&self.store, &record).await {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error(e.to_string()),
        }
    }

    async fn join_cluster(&self, server_id: u8, address: String) -> Response {
        join::handle_join_cluster(
            &self.membership,
            &self.store,
            server_id,
            address,
            self.heartbeat_interval.as_secs(),
            self.lease_timeout.as_secs(),
        )
        .await
    }
}
