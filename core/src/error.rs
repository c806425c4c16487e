//! Error types for BALLOTBOX

use crate::types::{OptionId, PeerNode};
use thiserror::Error;

/// Main error type for BALLOTBOX
#[derive(Error, Debug)]
pub enum TallyError {
    // ============ Ballot Errors ============
    #[error("Invalid selection: {0}")]
    Validation(String),

    // ============ Store Errors ============
    #[error("Tally store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Tally lock error: {0}")]
    Lock(String),

    #[error("Vote option {id} count has reached maximum")]
    Overflow { id: OptionId },

    // ============ Peer Errors ============
    #[error("Aggregation failed at peer {peer}: {reason}")]
    Aggregation { peer: PeerNode, reason: String },

    #[error("Message serialization failed: {0}")]
    Serialization(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    Config(String),

    // ============ General Errors ============
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TallyError {
    pub fn aggregation(peer: PeerNode, reason: impl ToString) -> Self {
        TallyError::Aggregation {
            peer,
            reason: reason.to_string(),
        }
    }

    /// Whether the caller's input was at fault rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(self, TallyError::Validation(_))
    }
}

impl From<bincode::Error> for TallyError {
    fn from(err: bincode::Error) -> Self {
        TallyError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for TallyError {
    fn from(err: serde_json::Error) -> Self {
        TallyError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = TallyError::Overflow {
            id: OptionId::from_name("Red Team"),
        };
        assert_eq!(err.to_string(), "Vote option 3164470501 count has reached maximum");

        let peer: PeerNode = "10.0.0.7".parse().unwrap();
        let err = TallyError::aggregation(peer, "connection refused");
        assert_eq!(err.to_string(), "Aggregation failed at peer 10.0.0.7: connection refused");
        assert!(!err.is_client_error());
        assert!(TallyError::Validation("x".into()).is_client_error());
    }
}
