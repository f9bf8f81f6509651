//! Address space allocator for mesh-cni.
//!
//! Every configured pool is the root of a lazily materialized binary tree.
//! Blocks are split into buddy halves on demand and merged back once both
//! halves are free and idle, so the number of resident nodes follows the
//! fragmentation of the pool rather than its size.

pub mod clock;
mod error;
mod ipam;
mod node;
pub mod prefix;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Error;
pub use ipam::Ipam;
pub use node::ReleaseOutcome;
pub use prefix::Family;

pub type Result<T, E = Error> = std::result::Result<T, E>;
