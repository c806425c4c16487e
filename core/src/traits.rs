//! Core traits defining BALLOTBOX interfaces
//!
//! These traits are the seams between the orchestrator, the local counter
//! store and the peer layer.

use crate::types::*;
use async_trait::async_trait;

/// Result type for BALLOTBOX operations
pub type TallyResult<T> = Result<T, crate::error::TallyError>;

/// Host-local counter store keyed by option.
///
/// Implementations serialize every `increment` behind one store-wide lock and
/// serve `snapshot` without taking it.
pub trait TallyStore: Send + Sync {
    /// Add one vote and return the new count
    fn increment(&self, id: OptionId) -> TallyResult<u64>;

    /// Read the current count of each id, 0 when never voted
    fn snapshot(&self, ids: &[OptionId]) -> TallyResult<TallySnapshot>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Client side of the peer results exchange
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Fetch a peer's local snapshot as raw (id, count) pairs
    async fn fetch_results(&self, peer: PeerNode) -> TallyResult<Vec<(OptionId, u64)>>;
}

/// Source of this host's local results, served to peers
pub trait LocalResults: Send + Sync {
    fn local_results(&self) -> TallyResult<TallySnapshot>;
}
