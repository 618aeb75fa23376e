use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use ragdb_core::error::{Error, Result};

use crate::tantivy_utils::{build_schema, register_tokenizer};

const WRITER_MEMORY_BYTES: usize = 20_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
	pub id: String,
	pub score: f32,
}

/// Inverted index over `{id, content, metadata}` documents.
///
/// Every write commits and reloads the reader, so hits reflect a write as
/// soon as the write call returns.
pub struct LexicalIndex {
	index: Index,
	reader: IndexReader,
	writer: Mutex<IndexWriter>,
	id_field: Field,
	content_field: Field,
	metadata_field: Field,
}

fn lexical(err: impl std::fmt::Display) -> Error {
	Error::Lexical(err.to_string())
}

impl LexicalIndex {
	pub fn in_memory() -> Result<Self> {
		Self::from_index(Index::create_in_ram(build_schema()))
	}

	pub fn open_or_create(dir: &Path) -> Result<Self> {
		std::fs::create_dir_all(dir)?;
		let directory = MmapDirectory::open(dir).map_err(lexical)?;
		let index = Index::open_or_create(directory, build_schema()).map_err(lexical)?;
		Self::from_index(index)
	}

	fn from_index(index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let schema = index.schema();
		let id_field = schema.get_field("id").map_err(lexical)?;
		let content_field = schema.get_field("content").map_err(lexical)?;
		let metadata_field = schema.get_field("metadata").map_err(lexical)?;
		let writer = index.writer_with_num_threads(1, WRITER_MEMORY_BYTES).map_err(lexical)?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(lexical)?;
		Ok(Self { index, reader, writer: Mutex::new(writer), id_field, content_field, metadata_field })
	}

	fn writer(&self) -> MutexGuard<'_, IndexWriter> {
		self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
	}

	fn commit(&self, writer: &mut IndexWriter) -> Result<()> {
		writer.commit().map_err(lexical)?;
		self.reader.reload().map_err(lexical)
	}

	/// Upsert by id.
	pub fn index_document(&self, id: &str, content: &str, metadata: &str) -> Result<()> {
		self.index_batch(std::iter::once((id, content, metadata)))
	}

	/// Upsert many documents with a single commit.
	pub fn index_batch<'a, I>(&self, docs: I) -> Result<()>
	where
		I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
	{
		let mut writer = self.writer();
		for (id, content, metadata) in docs {
			writer.delete_term(Term::from_field_text(self.id_field, id));
			writer
				.add_document(doc!(
					self.id_field => id,
					self.content_field => content,
					self.metadata_field => metadata,
				))
				.map_err(lexical)?;
		}
		self.commit(&mut writer)
	}

	pub fn delete(&self, id: &str) -> Result<()> {
		let mut writer = self.writer();
		writer.delete_term(Term::from_field_text(self.id_field, id));
		self.commit(&mut writer)
	}

	pub fn clear(&self) -> Result<()> {
		let mut writer = self.writer();
		writer.delete_all_documents().map_err(lexical)?;
		self.commit(&mut writer)
	}

	pub fn num_docs(&self) -> u64 {
		self.reader.searcher().num_docs()
	}

	/// Free-text search over content and metadata.
	///
	/// Query syntax errors are tolerated; whatever parses is searched.
	pub fn search(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>> {
		if k == 0 || query.trim().is_empty() {
			return Ok(Vec::new());
		}
		let searcher = self.reader.searcher();
		let qp = QueryParser::for_index(&self.index, vec![self.content_field, self.metadata_field]);
		let (q, errors) = qp.parse_query_lenient(query);
		if !errors.is_empty() {
			tracing::debug!(query, errors = errors.len(), "lenient query parse");
		}
		let top_docs = searcher.search(&q, &TopDocs::with_limit(k)).map_err(lexical)?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr).map_err(lexical)?;
			if let Some(id) = doc.get_first(self.id_field).and_then(|v| v.as_str()) {
				hits.push(LexicalHit { id: id.to_string(), score });
			}
		}
		Ok(hits)
	}
}
