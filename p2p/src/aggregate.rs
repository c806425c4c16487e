//! Cluster-wide aggregation of local tallies

use ballotbox_core::{
    OptionId, PeerClient, PeerNode, TallyError, TallyResult, TallySnapshot, VoteOption,
};
use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use tracing::debug;

/// How this host recognizes its own entries in a server list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfAddrs {
    known: Vec<Ipv4Addr>,
    detect_local: bool,
}

impl SelfAddrs {
    /// `known` addresses are this host; with `detect_local`, so is any
    /// address assigned to one of its interfaces
    pub fn new(known: impl IntoIterator<Item = Ipv4Addr>, detect_local: bool) -> Self {
        Self {
            known: known.into_iter().collect(),
            detect_local,
        }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.known.contains(&addr) || (self.detect_local && is_local_addr(addr))
    }
}

/// Whether `addr` is assigned to this host; only local addresses can be bound
pub fn is_local_addr(addr: Ipv4Addr) -> bool {
    addr.is_loopback() || UdpSocket::bind((addr, 0)).is_ok()
}

/// Merges this host's counts with every peer's
pub struct Aggregator {
    client: Arc<dyn PeerClient>,
}

impl Aggregator {
    pub fn new(client: Arc<dyn PeerClient>) -> Self {
        Self { client }
    }

    /// Sum `local` with the snapshot of every peer that is not this host.
    ///
    /// Peers are contacted concurrently. Counts are matched by option id and
    /// ids outside the ballot are ignored. The first failing peer fails the
    /// whole aggregation; no partial totals are returned.
    pub async fn aggregate(
        &self,
        local: &TallySnapshot,
        options: &[VoteOption],
        peers: &[PeerNode],
        this_host: &SelfAddrs,
    ) -> TallyResult<TallySnapshot> {
        let mut totals: TallySnapshot = options
            .iter()
            .map(|o| (o.id(), local.get(&o.id()).copied().unwrap_or(0)))
            .collect();

        let remote = remote_peers(peers, this_host);
        if remote.is_empty() {
            return Ok(totals);
        }
        debug!("Aggregating results from {} peers", remote.len());

        let replies = try_join_all(remote.into_iter().map(|peer| async move {
            let results = self.client.fetch_results(peer).await?;
            Ok::<_, TallyError>((peer, results))
        }))
        .await?;

        for (peer, results) in replies {
            merge_results(&mut totals, peer, &results)?;
        }

        Ok(totals)
    }
}

/// Peers to contact, without this host
pub fn remote_peers(peers: &[PeerNode], this_host: &SelfAddrs) -> Vec<PeerNode> {
    let (local, remote): (Vec<PeerNode>, Vec<PeerNode>) =
        peers.iter().copied().partition(|peer| this_host.contains(peer.addr()));
    if !local.is_empty() {
        debug!("Skipping own addresses {:?}", local);
    }
    remote
}

/// Add a peer's counts into `totals`, skipping ids `totals` does not track
pub fn merge_results(
    totals: &mut TallySnapshot,
    peer: PeerNode,
    results: &[(OptionId, u64)],
) -> TallyResult<()> {
    let mut seen = BTreeSet::new();
    for (id, count) in results {
        if !seen.insert(*id) {
            return Err(TallyError::aggregation(peer, format!("duplicate option id {id}")));
        }
        if let Some(total) = totals.get_mut(id) {
            *total = total
                .checked_add(*count)
                .ok_or(TallyError::Overflow { id: *id })?;
        }
    }
    Ok(())
}
