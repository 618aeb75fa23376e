//! Domain types shared by the storage backends and the retrieval services.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ChunkId = String;
pub type Meta = BTreeMap<String, String>;

/// Metadata key holding the human readable document name.
pub const META_DOCUMENT_NAME: &str = "document_name";

/// A stored vector. Dimensionality is fixed per collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: ChunkId,
    pub vector: Vec<f32>,
}

/// A single vector-backend hit. Higher `score` is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: ChunkId,
    pub score: f32,
}

impl SearchResult {
    pub fn new(id: impl Into<ChunkId>, score: f32) -> Self {
        Self { id: id.into(), score }
    }
}

/// A fused hit from the hybrid store.
///
/// `vector_score` and `text_score` are normalized per query against the best
/// hit of each side; `combined_score = w * text_score + (1 - w) * vector_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSearchResult {
    pub id: ChunkId,
    pub vector_score: f32,
    pub text_score: f32,
    pub combined_score: f32,
}

/// A chunk of a source document that is independently indexed.
///
/// - `id`: unique within the collection
/// - `document_id`: stable identity of the parent document
/// - `embedding`: empty until the embedding step fills it in
/// - `chunk_number`/`total_chunks`: zero-based position within the parent document
/// - `metadata`: free-form key/value pairs supplied by the chunker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: ChunkId,
    pub document_id: String,
    pub content: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub chunk_number: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub metadata: Meta,
}

impl DocumentChunk {
    pub fn new(
        document_id: impl Into<String>,
        content: impl Into<String>,
        chunk_number: usize,
        total_chunks: usize,
    ) -> Self {
        let document_id = document_id.into();
        Self {
            id: format!("{document_id}_chunk_{chunk_number}"),
            document_id,
            content: content.into(),
            embedding: Vec::new(),
            chunk_number,
            total_chunks,
            metadata: Meta::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }

    /// Document name from metadata, falling back to the document id.
    pub fn document_name(&self) -> &str {
        self.metadata
            .get(META_DOCUMENT_NAME)
            .map_or(self.document_id.as_str(), String::as_str)
    }

    /// Minimal source reference, e.g. `Source: manual.pdf (Section 2 of 7)`.
    pub fn source_ref(&self) -> String {
        format!(
            "Source: {} (Section {} of {})",
            self.document_name(),
            self.chunk_number + 1,
            self.total_chunks
        )
    }

    /// Flattened metadata stored next to the vector and indexed lexically.
    pub fn metadata_string(&self) -> String {
        let mut out = self.source_ref();
        for (k, v) in &self.metadata {
            if k == META_DOCUMENT_NAME {
                continue;
            }
            out.push_str(&format!("; {k}: {v}"));
        }
        out
    }
}

/// Durable projection of a chunk, enough to rebuild it in another backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorData {
    pub id: ChunkId,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: String,
}

/// Text payload carried alongside a vector by backends that can store it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPayload {
    pub content: String,
    pub metadata: String,
}

/// A candidate after the reranking pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub chunk: DocumentChunk,
    pub vector_score: f32,
    pub reranker_score: f32,
    pub final_score: f32,
}
