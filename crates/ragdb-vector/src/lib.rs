//! ragdb-vector
//!
//! Vector backends behind the `VectorStore` contract:
//! - `brute_force`: in-process map, exact linear cosine scan, JSON persistence
//! - `approximate`: LanceDB table with an IVF-PQ index once large enough
//! - `remote`: Qdrant over gRPC
//!
//! `VectorBackend` is the tagged union the hybrid store and migration use.

pub mod approximate;
pub mod backend;
pub mod brute_force;
pub mod remote;
mod table;

pub use approximate::ApproximateStore;
pub use backend::VectorBackend;
pub use brute_force::BruteForceStore;
pub use remote::QdrantStore;
pub use table::{needs_retrain, MIN_ROWS_FOR_INDEX};
