//! TCP client for the peer results exchange

use async_trait::async_trait;
use ballotbox_core::{PeerClient, PeerNode, TallyError, TallyResult};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::message::{decode_results, read_frame, write_frame, PeerResults, DEFAULT_PEER_PORT, GET_RESULTS};

/// Timeout and retry behavior for each peer contact.
///
/// The default waits indefinitely and makes a single attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerPolicy {
    /// Bound on one full round trip, connect included
    pub timeout: Option<Duration>,
    /// Extra attempts after a failed one
    pub retries: u32,
}

/// Contacts peers over TCP on a fixed port
pub struct TcpPeerClient {
    port: u16,
    policy: PeerPolicy,
}

impl TcpPeerClient {
    pub fn new(port: u16, policy: PeerPolicy) -> Self {
        Self { port, policy }
    }

    async fn exchange(&self, peer: PeerNode) -> TallyResult<PeerResults> {
        let addr = SocketAddr::from((peer.addr(), self.port));
        let fail = |reason: String| TallyError::aggregation(peer, reason);

        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| fail(format!("connect to {addr}: {e}")))?;
        write_frame(&mut stream, GET_RESULTS)
            .await
            .map_err(|e| fail(format!("send request: {e}")))?;
        let payload = read_frame(&mut stream)
            .await
            .map_err(|e| fail(format!("read response: {e}")))?;
        // The reply is complete; a failed close does not invalidate it
        let _ = stream.shutdown().await;

        decode_results(&payload).map_err(|e| fail(format!("malformed results: {e}")))
    }

    async fn attempt(&self, peer: PeerNode) -> TallyResult<PeerResults> {
        match self.policy.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exchange(peer))
                .await
                .map_err(|_| TallyError::aggregation(peer, format!("no response within {timeout:?}")))?,
            None => self.exchange(peer).await,
        }
    }
}

impl Default for TcpPeerClient {
    fn default() -> Self {
        Self::new(DEFAULT_PEER_PORT, PeerPolicy::default())
    }
}

#[async_trait]
impl PeerClient for TcpPeerClient {
    async fn fetch_results(&self, peer: PeerNode) -> TallyResult<PeerResults> {
        let mut attempt = 0;
        loop {
            match self.attempt(peer).await {
                Ok(results) => {
                    debug!("Peer {} returned {} results", peer, results.len());
                    return Ok(results);
                }
                Err(e) if attempt < self.policy.retries => {
                    attempt += 1;
                    warn!("Peer {} attempt {} failed: {}", peer, attempt, e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
