//! BALLOTBOX Local Tally Stores
//! 
//! Host-local vote counters keyed by option id. Increments are serialized by
//! one store-wide lock; snapshots read without it.

pub mod lock;
pub mod store;
pub mod memory;
pub mod persistent;
pub mod mapped;

pub use lock::*;
pub use store::*;
pub use memory::*;
pub use persistent::*;
pub use mapped::*;
