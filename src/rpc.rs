//! The wire protocol: one closed `Request`/`Response` enum pair carried
//! over the length-prefixed `bincode` framing in [`crate::transport`], and
//! the `ReplicaService` trait a replica node implements to answer them.
//!
//! There is deliberately no separate schema/IDL compiler here (no `.proto`
//! file, no build-script codegen): the enum *is* the schema, matching the
//! rest of this crate's dependency footprint, which carries `serde` +
//! `bincode` but no RPC framework.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::Message;
use crate::replication::ReplicationRecord;
use crate::ChatError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    // --- client-facing ---
    CreateAccount { username: String, password: String },
    Login { username: String, password: String },
    ListAccounts { pattern: String },
    SendMessage { sender: String, recipient: String, body: String },
    ReadNewMessages { username: String },
    ListMessages { username: String },
    DeleteMessages { username: String, id: i64 },
    DeleteAccount { username: String },
    GetLeaderInfo,

    // --- replica-to-replica ---
    Heartbeat { leader_address: String, term_hint: u8, replica_addresses: Vec<String> },
    Election { candidate_server_id: u8, candidate_address: String },
    ReplicateOperation { record: ReplicationRecord },
    JoinCluster { server_id: u8, address: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(String),
    NotLeader { leader_address: Option<String> },
    LoginOk { message: String, unread_count: u64 },
    Accounts(Vec<String>),
    Messages(Vec<Message>),
    LeaderInfo { leader_address: Option<String>, replica_addresses: Vec<String> },
    ElectionAck { accepted: bool },
    JoinAccepted {
        accounts: Vec<crate::model::Account>,
        messages: Vec<Message>,
        next_id: u64,
        replica_addresses: Vec<String>,
        heartbeat_interval: u64,
        lease_timeout: u64,
    },
}

impl Response {
    pub fn from_result(result: Result<Response, ChatError>) -> Response {
        match result {
            Ok(resp) => resp,
            Err(e) => Response::Error(e.to_string()),
        }
    }
}

/// Implemented by a replica node to answer every RPC this crate defines.
/// Handlers that only make sense on the leader (writes) are expected to
/// return `Response::NotLeader` themselves when called on a follower,
/// rather than the trait enforcing it, since `GetLeaderInfo`/`Heartbeat`/
/// `Election`/`JoinCluster` are valid on any role.
#[async_trait]
pub trait ReplicaService: Send + Sync {
    async fn create_account(&self, username: String, password: String) -> Response;
    async fn login(&self, username: String, password: String) -> Response;
    async fn list_accounts(&self, pattern: String) -> Response;
    async fn send_message(&self, sender: String, recipient: String, body: String) -> Response;
    async fn read_new_messages(&self, username: String) -> Response;
    async fn list_messages(&self, username: String) -> Response;
    async fn delete_messages(&self, username: String, id: i64) -> Response;
    async fn delete_account(&self, username: String) -> Response;
    async fn get_leader_info(&self) -> Response;

    async fn heartbeat(
        &self,
        leader_address: String,
        term_hint: u8,
        replica_addresses: Vec<String>,
    ) -> Response;
    async fn election(&self, candidate_server_id: u8, candidate_address: String) -> Response;
    async fn replicate_operation(&self, record: ReplicationRecord) -> Response;
    async fn join_cluster(&self, server_id: u8, address: String) -> Response;

    /// Single dispatch point used by the transport loop.
    async fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::CreateAccount { username, password } => {
                self.create_account(username, password).await
            }
            Request::Login { username, password } => self.login(username, password).await,
            Request::ListAccounts { pattern } => self.list_accounts(pattern).await,
            Request::SendMessage { sender, recipient, body } => {
                self.send_message(sender, recipient, body).await
            }
            Request::ReadNewMessages { username } => self.read_new_messages(username).await,
            Request::ListMessages { username } => self.list_messages(username).await,
            Request::DeleteMessages { username, id } => {
                self.delete_messages(username, id).await
            }
            Request::DeleteAccount { username } => self.delete_account(username).await,
            Request::GetLeaderInfo => self.get_leader_info().await,
            Request::Heartbeat { leader_address, term_hint, replica_addresses } => {
                self.heartbeat(leader_address, term_hint, replica_addresses).await
            }
            Request::Election { candidate_server_id, candidate_address } => {
                self.election(candidate_server_id, candidate_address).await
            }
            Request::ReplicateOperation { record } => self.replicate_operation(record).await,
            Request::JoinCluster { server_id, address } => {
                self.join_cluster(server_id, address).await
            }
        }
    }
}
