//! BALLOTBOX Core Library
//! 
//! Core types, traits, and configuration for the BALLOTBOX vote tally.
//! Every other BALLOTBOX crate builds on the definitions here.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
