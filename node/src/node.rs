//! Full node implementation

use crate::api::start_api_server;
use crate::runtime::NodeRuntime;
use ballotbox_core::{LocalResults, NodeConfig, StoreBackend};
use ballotbox_p2p::PeerServer;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Full BALLOTBOX node
pub struct BallotNode {
    runtime: Arc<NodeRuntime>,
}

impl BallotNode {
    /// Create a new node
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        let runtime = Arc::new(NodeRuntime::new(config)?);
        Ok(Self { runtime })
    }

    /// Start the node and serve until interrupted
    pub async fn start(&self) -> anyhow::Result<()> {
        info!("Starting BALLOTBOX node {}...", self.runtime.config().name);

        // Fail early on a broken ballot file
        let ballot = self.runtime.ballot()?;
        info!(
            "Ballot {:?}: {} options, {} servers",
            ballot.title(),
            ballot.options().len(),
            ballot.peers().len()
        );

        let mut handles = Vec::new();

        // Start peer listener
        let peer_config = &self.runtime.config().peer;
        if peer_config.enabled {
            let source: Arc<dyn LocalResults> = self.runtime.clone();
            let server = PeerServer::bind(&peer_config.listen_addr, source).await?;
            handles.push(tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    error!("Peer listener error: {}", e);
                }
            }));
        }

        // Start API server
        let api_config = &self.runtime.config().api;
        if api_config.enabled {
            let api_runtime = self.runtime.clone();
            let api_addr = api_config.listen_addr.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = start_api_server(api_runtime, &api_addr).await {
                    error!("API server error: {}", e);
                }
            }));
        }

        info!("Node started successfully");

        // Wait for shutdown signal
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping node...");
            }
            Err(e) => {
                error!("Error waiting for shutdown signal: {}", e);
            }
        }

        // Cleanup
        for handle in handles {
            handle.abort();
        }

        info!("Node stopped");

        Ok(())
    }

    /// Get runtime reference
    pub fn runtime(&self) -> &Arc<NodeRuntime> {
        &self.runtime
    }
}

/// Node builder for easier configuration
pub struct NodeBuilder {
    config: NodeConfig,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ballot_path(mut self, path: PathBuf) -> Self {
        self.config.ballot_path = path;
        self
    }

    pub fn self_addr(mut self, addr: Ipv4Addr) -> Self {
        self.config.self_addr = Some(addr);
        self
    }

    pub fn store_backend(mut self, backend: StoreBackend) -> Self {
        self.config.store.backend = backend;
        self
    }

    pub fn store_dir(mut self, dir: PathBuf) -> Self {
        self.config.store.dir = dir;
        self
    }

    pub fn api_addr(mut self, addr: &str) -> Self {
        self.config.api.listen_addr = addr.to_string();
        self
    }

    pub fn peer_addr(mut self, addr: &str) -> Self {
        self.config.peer.listen_addr = addr.to_string();
        self
    }

    pub fn into_config(self) -> NodeConfig {
        self.config
    }

    pub fn build(self) -> anyhow::Result<BallotNode> {
        BallotNode::new(self.config)
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_overrides() {
        let tmp = TempDir::new().unwrap();
        let config = NodeBuilder::new()
            .ballot_path(tmp.path().join("ballot.json"))
            .self_addr(Ipv4Addr::new(10, 0, 0, 4))
            .store_backend(StoreBackend::Memory)
            .store_dir(tmp.path().to_path_buf())
            .api_addr("127.0.0.1:0")
            .peer_addr("127.0.0.1:0")
            .into_config();

        assert_eq!(config.self_addr(), Some(Ipv4Addr::new(10, 0, 0, 4)));
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.peer.listen_addr, "127.0.0.1:0");

        let node = NodeBuilder::new().config(config).build().unwrap();
        assert!(node.runtime().ballot().is_err());
    }
}
