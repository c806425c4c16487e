//! BALLOTBOX Peer Aggregation
//! 
//! Hosts exchange local tallies over plain TCP:
//! - `get-results` request/response wire protocol
//! - client with optional timeout and retry policy
//! - aggregator summing every peer's counts into the local ones
//! - listener serving this host's counts

pub mod message;
pub mod client;
pub mod aggregate;
pub mod server;

pub use message::*;
pub use client::*;
pub use aggregate::*;
pub use server::*;
