//! Peer listener answering `get-results`

use ballotbox_core::{LocalResults, TallyError, TallyResult};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::message::{encode_results, read_frame, snapshot_to_results, write_frame, GET_RESULTS};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serves this host's local snapshot to other hosts
pub struct PeerServer {
    listener: TcpListener,
    source: Arc<dyn LocalResults>,
}

impl PeerServer {
    pub async fn bind(listen_addr: &str, source: Arc<dyn LocalResults>) -> TallyResult<Self> {
        let listener = TcpListener::bind(listen_addr).await.map_err(|e| {
            TallyError::Config(format!("cannot listen for peers on {listen_addr}: {e}"))
        })?;
        Ok(Self { listener, source })
    }

    pub fn local_addr(&self) -> TallyResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| TallyError::Internal(e.to_string()))
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> TallyResult<()> {
        info!("Peer listener on {}", self.local_addr()?);

        loop {
            let (stream, remote) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept peer connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let source = self.source.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, source).await {
                    warn!("Peer {} request failed: {}", remote, e);
                }
            });
        }
    }
}

async fn handle_connection(mut stream: TcpStream, source: Arc<dyn LocalResults>) -> TallyResult<()> {
    let io_error = |e: std::io::Error| TallyError::Internal(e.to_string());

    let request = read_frame(&mut stream).await.map_err(io_error)?;
    if request != GET_RESULTS {
        return Err(TallyError::Validation(format!(
            "unknown peer command {:?}",
            String::from_utf8_lossy(&request)
        )));
    }

    let snapshot = tokio::task::spawn_blocking(move || source.local_results())
        .await
        .map_err(|e| TallyError::Internal(e.to_string()))??;
    let payload = encode_results(&snapshot_to_results(&snapshot))?;

    write_frame(&mut stream, &payload).await.map_err(io_error)?;
    stream.shutdown().await.map_err(io_error)?;
    debug!("Served {} results", snapshot.len());

    Ok(())
}
