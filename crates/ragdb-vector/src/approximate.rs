//! Approximate nearest-neighbour backend on a local LanceDB table.
//!
//! Below `MIN_ROWS_FOR_INDEX` rows LanceDB scans the table (exact). `save`
//! trains an IVF-PQ index once the table is large enough and retrains when
//! the row count drifted by a tenth since the last build.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arrow_array::{Array, Float32Array, StringArray};
use arrow_schema::Schema;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use tokio::runtime::Runtime;

use ragdb_core::error::{Error, Result};
use ragdb_core::similarity::rank;
use ragdb_core::traits::VectorStore;
use ragdb_core::types::{RecordPayload, SearchResult, VectorData};

use crate::table::{
    build_ivfpq_index, compute_ivfpq_params, ensure_table, get_meta, needs_retrain, open_db, quote, set_meta, storage,
    upsert, vector_batch, vectors_batch, vectors_schema, INDEXED_ROWS_KEY, VECTORS_TABLE,
};

pub struct ApproximateStore {
    dimensions: usize,
    path: PathBuf,
    schema: Arc<Schema>,
    conn: Connection,
    table: Table,
    closed: AtomicBool,
    // Declared last so the table handles drop before the runtime.
    runtime: Runtime,
}

impl ApproximateStore {
    /// Open or create the table under `path`. Must not be called from inside
    /// an async context; the store drives its own runtime.
    pub fn open(path: &Path, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(Error::InvalidConfig("dimensions must be > 0".into()));
        }
        std::fs::create_dir_all(path)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let schema = vectors_schema(dimensions)?;
        let uri = path.to_string_lossy().to_string();
        let (conn, table) = runtime.block_on(async {
            let conn = open_db(&uri).await?;
            let table = ensure_table(&conn, VECTORS_TABLE, schema.clone()).await?;
            Ok::<_, Error>((conn, table))
        })?;
        let existing = table_dimensions(&runtime, &table)?;
        if let Some(existing) = existing {
            if existing != dimensions {
                return Err(Error::InvalidConfig(format!(
                    "{} holds {existing}-dimensional vectors, store expects {dimensions}",
                    path.display()
                )));
            }
        }
        Ok(Self { dimensions, path: path.to_path_buf(), schema, conn, table, closed: AtomicBool::new(false), runtime })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    pub fn count(&self) -> Result<usize> {
        self.ensure_open()?;
        self.runtime.block_on(self.table.count_rows(None)).map_err(storage)
    }

    /// Train (or retrain) the IVF-PQ index. Returns whether an index was built.
    pub fn build_index(&self) -> Result<bool> {
        self.ensure_open()?;
        self.runtime.block_on(async {
            let rows = self.table.count_rows(None).await.map_err(storage)?;
            let indexed = get_meta(&self.conn, INDEXED_ROWS_KEY).await?.and_then(|v| v.parse::<usize>().ok());
            if !needs_retrain(rows, indexed) {
                return Ok(false);
            }
            let params = compute_ivfpq_params(rows, self.dimensions);
            build_ivfpq_index(&self.table, &params).await?;
            set_meta(&self.conn, INDEXED_ROWS_KEY, &rows.to_string()).await?;
            tracing::info!(rows, nlist = params.nlist, m = params.m, path = %self.path.display(), "built IVF-PQ index");
            Ok(true)
        })
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let mut stream = self
            .table
            .vector_search(query.to_vec())
            .map_err(storage)?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(storage)?;
        let mut results = Vec::new();
        while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await.map_err(storage)? {
            let ids = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let dist = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            let (Some(ids), Some(dist)) = (ids, dist) else {
                return Err(Error::Storage("search batch lacks id/_distance columns".into()));
            };
            for i in 0..batch.num_rows() {
                let score = if dist.is_valid(i) { 1.0 - dist.value(i) } else { 0.0 };
                results.push(SearchResult::new(ids.value(i), score));
            }
        }
        Ok(results)
    }
}

fn table_dimensions(runtime: &Runtime, table: &Table) -> Result<Option<usize>> {
    let schema = runtime.block_on(table.schema()).map_err(storage)?;
    let field = schema.field_with_name("vector").map_err(storage)?;
    match field.data_type() {
        arrow_schema::DataType::FixedSizeList(_, n) => Ok(usize::try_from(*n).ok()),
        _ => Ok(None),
    }
}

impl VectorStore for ApproximateStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn try_add(&self, id: &str, vector: &[f32], _payload: Option<&RecordPayload>) -> Result<()> {
        self.ensure_open()?;
        if vector.len() != self.dimensions {
            return Err(Error::DimensionMismatch { expected: self.dimensions, actual: vector.len() });
        }
        let batch = vector_batch(self.schema.clone(), self.dimensions, id, vector)?;
        self.runtime.block_on(upsert(&self.table, "id", batch))
    }

    /// One merge-insert for the whole batch.
    fn try_add_batch(&self, items: &[VectorData]) -> Result<()> {
        self.ensure_open()?;
        if items.is_empty() {
            return Ok(());
        }
        if let Some(bad) = items.iter().find(|i| i.vector.len() != self.dimensions) {
            return Err(Error::DimensionMismatch { expected: self.dimensions, actual: bad.vector.len() });
        }
        let rows = items.iter().map(|i| (i.id.as_str(), i.vector.as_slice()));
        let batch = vectors_batch(self.schema.clone(), self.dimensions, rows)?;
        self.runtime.block_on(upsert(&self.table, "id", batch))
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let predicate = format!("id = {}", quote(id));
        self.runtime.block_on(self.table.delete(&predicate)).map_err(storage)?;
        Ok(())
    }

    /// Deletes all rows and forgets the trained row count.
    fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        self.runtime.block_on(async {
            self.table.delete("true").await.map_err(storage)?;
            set_meta(&self.conn, INDEXED_ROWS_KEY, "0").await
        })?;
        tracing::info!(path = %self.path.display(), "approximate store cleared");
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        if k == 0 || query.len() != self.dimensions || self.ensure_open().is_err() {
            return Vec::new();
        }
        match self.runtime.block_on(self.nearest(query, k)) {
            Ok(mut results) => {
                rank(&mut results, k);
                results
            }
            Err(err) => {
                tracing::error!(error = %err, path = %self.path.display(), "approximate search failed");
                Vec::new()
            }
        }
    }

    /// Rows are durable on write; saving only refreshes the index.
    fn save(&self, _path: &Path) -> Result<()> {
        self.build_index().map(|_| ())
    }

    fn load(&self, _path: &Path) -> Result<()> {
        self.ensure_open()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn len(&self) -> usize {
        match self.count() {
            Ok(n) => n,
            Err(err) => {
                tracing::error!(error = %err, path = %self.path.display(), "approximate count failed");
                0
            }
        }
    }
}
