//! ragdb-text
//!
//! Tantivy-backed lexical index used by the hybrid store.

pub mod index;
pub mod tantivy_utils;

pub use index::{LexicalHit, LexicalIndex};
