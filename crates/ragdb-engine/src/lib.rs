//! ragdb-engine
//!
//! Collections on top of the hybrid store: on-disk repository, reranking,
//! query orchestration and backend migration.

pub mod collection;
pub mod migration;
pub mod query;
pub mod repository;
pub mod reranker;

pub use collection::Collection;
pub use migration::{MigrationOptions, MigrationReport, MigrationService};
pub use query::{build_context, build_prompt, QueryService};
pub use repository::CollectionRepository;
pub use reranker::{parse_relevance_score, RerankerOptions, RerankerService};
