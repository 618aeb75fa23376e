//! ragdb-hybrid
//!
//! One vector backend plus one lexical index, fused per query.

pub mod fusion;
pub mod store;

pub use fusion::{fuse, MISSING_SIGNAL_FLOOR};
pub use store::{HybridStore, HybridStoreConfig};
