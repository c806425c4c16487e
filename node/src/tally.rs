//! Ballot/tally orchestration
//!
//! Votes go to the host's local store; results combine the local snapshot
//! with every peer's. The ballot is passed in on each call and nothing but
//! the injected store and peer client outlives a call.

use ballotbox_core::{
    Ballot, OptionId, PeerClient, TallyError, TallyResult, TallySnapshot, VoteOption,
};
use ballotbox_p2p::{Aggregator, SelfAddrs};
use ballotbox_state::SharedTallyStore;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};

/// Counts votes for any ballot against one local store
pub struct Tally {
    store: SharedTallyStore,
    aggregator: Aggregator,
    self_addr: Option<Ipv4Addr>,
    detect_local: bool,
}

impl Tally {
    pub fn new(store: SharedTallyStore, peers: Arc<dyn PeerClient>, self_addr: Option<Ipv4Addr>) -> Self {
        Self {
            store,
            aggregator: Aggregator::new(peers),
            self_addr,
            detect_local: false,
        }
    }

    /// Also treat servers bound to a local interface as this host
    pub fn with_local_detection(mut self, detect_local: bool) -> Self {
        self.detect_local = detect_local;
        self
    }

    /// Record one vote for `option`, which must belong to `ballot`
    pub async fn vote(&self, ballot: &Ballot, option: OptionId) -> TallyResult<u64> {
        let selected = ballot.find_option(option).ok_or_else(|| {
            TallyError::Validation(format!("option {option} is not on ballot {:?}", ballot.title()))
        })?;
        let id = selected.id();

        let store = self.store.clone();
        let count = tokio::task::spawn_blocking(move || store.increment(id))
            .await
            .map_err(|e| TallyError::Internal(e.to_string()))??;

        info!("Vote recorded for {:?}, local count {}", selected.name(), count);
        Ok(count)
    }

    /// This host's counts for every ballot option
    pub fn local_snapshot(&self, ballot: &Ballot) -> TallyResult<TallySnapshot> {
        self.store.snapshot(&ballot.option_ids())
    }

    /// Results in ballot order, summed across peers when `combine_remote`.
    ///
    /// `server_addr` is the address the request reached this host on; it is
    /// skipped in the server list along with the configured address.
    pub async fn get_results(
        &self,
        ballot: &Ballot,
        combine_remote: bool,
        server_addr: Option<Ipv4Addr>,
    ) -> TallyResult<Vec<VoteOption>> {
        let store = self.store.clone();
        let ids = ballot.option_ids();
        let local = tokio::task::spawn_blocking(move || store.snapshot(&ids))
            .await
            .map_err(|e| TallyError::Internal(e.to_string()))??;

        let totals = if combine_remote {
            let known = self.self_addr.into_iter().chain(server_addr);
            let this_host = SelfAddrs::new(known, self.detect_local);
            self.aggregator
                .aggregate(&local, ballot.options(), ballot.peers(), &this_host)
                .await?
        } else {
            local
        };
        debug!("Results for {:?}: {:?}", ballot.title(), totals);

        ballot
            .options()
            .iter()
            .map(|o| VoteOption::with_count(o.name(), totals.get(&o.id()).copied().unwrap_or(0)))
            .collect()
    }
}
