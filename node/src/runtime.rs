//! Node runtime combining all components

use ballotbox_core::{
    Ballot, BallotSource, LocalResults, NodeConfig, OptionId, PeerClient, TallyError,
    TallyResult, TallySnapshot, VoteOption,
};
use ballotbox_p2p::{PeerPolicy, TcpPeerClient};
use ballotbox_state::{open_store, SharedTallyStore};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::info;

use crate::tally::Tally;

/// Node runtime managing all components
pub struct NodeRuntime {
    config: NodeConfig,
    ballots: BallotSource,
    tally: Tally,
}

impl NodeRuntime {
    /// Create a runtime with the configured store and a TCP peer client
    pub fn new(config: NodeConfig) -> TallyResult<Self> {
        let store = open_store(&config.store)?;
        let policy = PeerPolicy {
            timeout: config.peer.timeout(),
            retries: config.peer.retries,
        };
        let client = Arc::new(TcpPeerClient::new(config.peer.port()?, policy));
        Ok(Self::with_parts(config, store, client))
    }

    /// Create a runtime around an existing store and peer client
    pub fn with_parts(config: NodeConfig, store: SharedTallyStore, peers: Arc<dyn PeerClient>) -> Self {
        let ballots = config.ballot_source();
        let self_addr = config.self_addr();
        if let Some(addr) = self_addr {
            info!("Excluding own address {} from aggregation", addr);
        }
        let tally = Tally::new(store, peers, self_addr)
            .with_local_detection(config.peer.exclude_local_addrs);

        Self {
            config,
            ballots,
            tally,
        }
    }

    /// Load the ballot as it currently stands on disk
    pub fn ballot(&self) -> TallyResult<Ballot> {
        self.ballots.load()
    }

    /// Vote by option id on the current ballot
    pub async fn vote(&self, option: OptionId) -> TallyResult<u64> {
        let ballot = self.ballot()?;
        self.tally.vote(&ballot, option).await
    }

    /// Vote by option name, or by id when no option has that name
    pub async fn vote_by_name(&self, selection: &str) -> TallyResult<u64> {
        let ballot = self.ballot()?;
        let id = match ballot.find_by_name(selection) {
            Some(option) => option.id(),
            None => selection.parse::<OptionId>().map_err(|_| {
                TallyError::Validation(format!("no option named {selection:?}"))
            })?,
        };
        self.tally.vote(&ballot, id).await
    }

    /// Current ballot with its results; `server_addr` is the address the
    /// request arrived on, when known
    pub async fn results(
        &self,
        combine_remote: bool,
        server_addr: Option<Ipv4Addr>,
    ) -> TallyResult<(Ballot, Vec<VoteOption>)> {
        let ballot = self.ballot()?;
        let results = self
            .tally
            .get_results(&ballot, combine_remote, server_addr)
            .await?;
        Ok((ballot, results))
    }

    /// Get config reference
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Get tally reference
    pub fn tally(&self) -> &Tally {
        &self.tally
    }
}

impl LocalResults for NodeRuntime {
    fn local_results(&self) -> TallyResult<TallySnapshot> {
        let ballot = self.ballot()?;
        self.tally.local_snapshot(&ballot)
    }
}
