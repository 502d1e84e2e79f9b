//! Client-side runtime: tracks a believed-current leader address, and
//! transparently rediscovers it (scatter-gather probing every known
//! replica) whenever a call fails or comes back `NotLeader`.

use std::sync::Mutex;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::rpc::{Request, Response};
use crate::transport;
use crate::{pf_info, pf_warn, ChatError};

pub struct ChatClient {
    config: ClientConfig,
    leader_address: Mutex<String>,
    known_addresses: Mutex<Vec<String>>,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Self {
        let initial = config.initial_leader_address();
        let mut known = config.replica_addresses.clone();
        if !known.contains(&initial) {
            known.push(initial.clone());
        }
        ChatClient {
            config,
            leader_address: Mutex::new(initial),
            known_addresses: Mutex::new(known),
        }
    }

    fn current_leader(&self) -> String {
        self.leader_address.lock().unwrap().clone()
    }

    fn set_leader(&self, address: String) {
        let mut known = self.known_addresses.lock().unwrap();
        if !known.contains(&address) {
            known.push(address.clone());
        }
        *self.leader_address.lock().unwrap() = address;
    }

    fn known(&self) -> Vec<String> {
        self.known_addresses.lock().unwrap().clone()
    }

    fn merge_known(&self, addresses: Vec<String>) {
        let mut known = self.known_addresses.lock().unwrap();
        for addr in addresses {
            if !known.contains(&addr) {
                known.push(addr);
            }
        }
    }

    /// Probes every known address for `GetLeaderInfo` within the
    /// configured overall deadline, merges every reply's fallback roster,
    /// and adopts the first leader address any of them reports.
    async fn rediscover_leader(&self) -> Result<String, ChatError> {
        let candidates = self.known();
        let timeout = Duration::from_secs(self.config.overall_leader_lookup_timeout);
        let per_call = Duration::from_secs(self.config.fallback_timeout);

        let probes = candidates.into_iter().map(|addr| {
            let per_call = per_call;
            async move { (addr.clone(), transport::call(&addr, &Request::GetLeaderInfo, per_call).await) }
        });

        let outcomes = tokio::time::timeout(timeout, futures::future::join_all(probes))
            .await
            .map_err(ChatError::from)?;

        let mut found_leader = None;
        for (addr, result) in outcomes {
            match result {
                Ok(Response::LeaderInfo { leader_address, replica_addresses }) => {
                    self.merge_known(replica_addresses);
                    if found_leader.is_none() {
                        found_leader = leader_address;
                    }
                }
                Ok(other) => pf_warn!("unexpected reply from {} during rediscovery: {:?}", addr, other),
                Err(_) => {}
            }
        }

        let leader = found_leader
            .ok_or_else(|| ChatError::Timeout("no replica reachable to find the leader".into()))?;
        pf_info!("rediscovered leader at {}", leader);
        self.set_leader(leader.clone());
        Ok(leader)
    }

    /// Sends `request` to the believed-current leader, transparently
    /// rediscovering and retrying once if it turns out stale.
    pub async fn call(&self, request: Request) -> Result<Response, ChatError> {
        let timeout = Duration::from_secs(self.config.rpc_timeout);
        let leader = self.current_leader();

        match transport::call(&leader, &request, timeout).await {
            Ok(Response::NotLeader { leader_address: Some(actual) }) => {
                self.set_leader(actual);
                let leader = self.current_leader();
                transport::call(&leader, &request, timeout).await
            }
            Ok(Response::NotLeader { leader_address: None }) => {
                let leader = self.rediscover_leader().await?;
                transport::call(&leader, &request, timeout).await
            }
            Ok(other) => Ok(other),
            Err(_) => {
                let leader = self.rediscover_leader().await?;
                transport::call(&leader, &request, timeout).await
            }
        }
    }

    /// One-shot read-only query: reads are allowed against any replica,
    /// so this skips leader tracking entirely and is used for
    /// `list_accounts`/`list_messages`.
    pub async fn call_any_replica(&self, request: Request) -> Result<Response, ChatError> {
        let timeout = Duration::from_secs(self.config.rpc_timeout);
        let candidates = self.known();
        let mut last_err = None;
        for addr in candidates {
            match transport::call(&addr, &request, timeout).await {
                Ok(resp) => return Ok(resp),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| ChatError::Timeout("no known replicas".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_client_seeds_known_addresses_with_initial_leader() {
        let config = ClientConfig {
            client_connect_host: "127.0.0.1".into(),
            client_connect_port: 50051,
            ..ClientConfig::default()
        };
        let client = ChatClient::new(config);
        assert_eq!(client.current_leader(), "127.0.0.1:50051");
        assert!(client.known().contains(&"127.0.0.1:50051".to_string()));
    }

    #[tokio::test]
    async fn call_against_unreachable_leader_attempts_rediscovery_and_fails_cleanly() {
        let config = ClientConfig {
            client_connect_host: "127.0.0.1".into(),
            client_connect_port: 1,
            overall_leader_lookup_timeout: 1,
            fallback_timeout: 1,
            rpc_timeout: 1,
            ..ClientConfig::default()
        };
        let client = ChatClient::new(config);
        let result = client.call(Request::GetLeaderInfo).await;
        assert!(result.is_err());
    }
}
