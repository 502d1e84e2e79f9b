//! Public interface to the replicated chat service core library, linked
//! by both the replica server executable and the client executable.

pub mod chatops;
pub mod client;
pub mod config;
pub mod election;
pub mod errors;
pub mod fanout;
pub mod join;
pub mod logging;
pub mod membership;
pub mod model;
pub mod replication;
pub mod rpc;
pub mod server;
pub mod store;
pub mod transport;

pub use client::ChatClient;
pub use config::{ClientConfig, ClusterManifest, InstanceSpec, ReplicaConfig};
pub use errors::{ChatError, InitError};
pub use membership::{ClusterMembership, NodeRole};
pub use model::{Account, Message};
pub use replication::ReplicationRecord;
pub use rpc::{ReplicaService, Request, Response};
pub use server::ReplicaNode;
pub use store::Store;
