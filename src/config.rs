//! Configuration structs and the TOML-overlay parsing macro.
//!
//! Loading order for both binaries is: built-in `Default` → TOML file
//! contents → CLI flag overrides (applied by the binary after loading).
//! `parsed_config!` implements the middle step: given an optional TOML
//! string and an explicit list of overridable field names, it starts from
//! `Default::default()` and replaces only the named fields that are present
//! in the TOML table, so a config file may mention a subset of fields.

use serde::{Deserialize, Serialize};

use crate::ChatError;

/// Overlays a subset of fields of `$ty` (which must impl `Default`) from an
/// optional TOML string onto the type's defaults, returning a
/// `Result<$ty, ChatError>`.
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $ty:ty; $($field:ident),+ $(,)?) => {{
        (|| -> Result<$ty, $crate::ChatError> {
            let mut cfg = <$ty>::default();
            if let Some(s) = $config_str {
                let value: toml::Value = s
                    .parse::<toml::Value>()
                    .map_err(|e| $crate::ChatError::Config(e.to_string()))?;
                if let toml::Value::Table(map) = value {
                    $(
                        if let Some(v) = map.get(stringify!($field)) {
                            cfg.$field = v.clone().try_into().map_err(
                                |e: toml::de::Error| $crate::ChatError::Config(
                                    format!("field '{}': {}", stringify!($field), e),
                                ),
                            )?;
                        }
                    )+
                }
            }
            Ok(cfg)
        })()
    }};
}

/// Per-replica identity, cluster, timing, and storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub server_id: u8,
    pub server_host: String,
    pub server_port: u16,
    pub initial_leader: bool,
    pub join: bool,
    pub replica_addresses: Vec<String>,
    pub heartbeat_interval: u64,
    pub lease_timeout: u64,
    pub db_file: Option<String>,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        ReplicaConfig {
            server_id: 1,
            server_host: "localhost".into(),
            server_port: 50051,
            initial_leader: false,
            join: false,
            replica_addresses: Vec::new(),
            heartbeat_interval: 3,
            lease_timeout: 10,
            db_file: None,
        }
    }
}

impl ReplicaConfig {
    /// Overlays a TOML config file's contents onto the defaults.
    pub fn parse(config_str: Option<&str>) -> Result<Self, ChatError> {
        parsed_config!(config_str => ReplicaConfig;
            server_id, server_host, server_port, initial_leader, join,
            replica_addresses, heartbeat_interval, lease_timeout, db_file)
    }

    /// Resolves `db_file`, applying the `chat_<server_id>.db` default.
    pub fn resolved_db_file(&self) -> String {
        self.db_file
            .clone()
            .unwrap_or_else(|| format!("chat_{}.db", self.server_id))
    }

    /// This replica's own externally-reachable address.
    pub fn my_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Sanity-checks the lease/heartbeat ratio. Logged as a warning, not a
    /// hard failure, so tests remain free to explore the boundary.
    pub fn check_timing(&self) {
        if self.lease_timeout < self.heartbeat_interval * 3 {
            log::warn!(
                "lease_timeout ({}) is not at least 3x heartbeat_interval \
                 ({}); a single missed heartbeat may trigger spurious \
                 elections",
                self.lease_timeout,
                self.heartbeat_interval
            );
        }
    }
}

/// One instance entry in the cluster manifest consulted by joiners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub server_id: u8,
    pub server_host: String,
    pub server_port: u16,
    #[serde(default)]
    pub initial_leader: bool,
}

impl InstanceSpec {
    pub fn address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

/// The cluster manifest: every initially-configured instance, consulted by
/// a replica starting with `join = true`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterManifest {
    #[serde(default)]
    pub instances: Vec<InstanceSpec>,
    #[serde(default)]
    pub replica_addresses: Vec<String>,
    #[serde(default)]
    pub db_file: Option<String>,
    #[serde(default)]
    pub heartbeat_interval: Option<u64>,
    #[serde(default)]
    pub lease_timeout: Option<u64>,
}

impl ClusterManifest {
    pub fn from_toml_str(s: &str) -> Result<Self, ChatError> {
        toml::from_str(s).map_err(ChatError::from)
    }

    pub fn candidate_addresses(&self) -> Vec<String> {
        self.instances.iter().map(InstanceSpec::address).collect()
    }
}

/// Client-side timing and connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_connect_host: String,
    pub client_connect_port: u16,
    pub replica_addresses: Vec<String>,
    pub rpc_timeout: u64,
    pub fallback_timeout: u64,
    pub overall_leader_lookup_timeout: u64,
    pub retry_delay: u64,
    pub client_heartbeat_interval: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            client_connect_host: "127.0.0.1".into(),
            client_connect_port: 50051,
            replica_addresses: Vec::new(),
            rpc_timeout: 1,
            fallback_timeout: 1,
            overall_leader_lookup_timeout: 5,
            retry_delay: 1,
            client_heartbeat_interval: 5,
        }
    }
}

impl ClientConfig {
    pub fn parse(config_str: Option<&str>) -> Result<Self, ChatError> {
        let mut cfg = parsed_config!(config_str => ClientConfig;
            client_connect_host, client_connect_port, replica_addresses,
            rpc_timeout, fallback_timeout, overall_leader_lookup_timeout,
            retry_delay, client_heartbeat_interval)?;
        // force IPv4 the way the original client does, to dodge localhost
        // resolving to ::1 on some hosts while the server only binds v4
        if cfg.client_connect_host == "localhost" {
            cfg.client_connect_host = "127.0.0.1".into();
        }
        Ok(cfg)
    }

    pub fn initial_leader_address(&self) -> String {
        format!("{}:{}", self.client_connect_host, self.client_connect_port)
    }
}
