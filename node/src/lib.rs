//! BALLOTBOX Node Implementation
//! 
//! Node binary pieces on top of the tally core:
//! - Ballot/tally orchestration
//! - Peer results listener
//! - HTTP API

mod api;
mod node;
mod runtime;
mod tally;

pub use api::*;
pub use node::*;
pub use runtime::*;
pub use tally::*;
