//! LanceDB connection and housekeeping helpers for the approximate backend.
//!
//! The vectors table is `(id: Utf8, vector: FixedSizeList<Float32, dims>)`.
//! A small key/value `meta` table records how many rows the current IVF-PQ
//! index was trained on so `save` only rebuilds once the table grew or shrank
//! noticeably.

use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::index::Index;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};

use ragdb_core::error::{Error, Result};

pub const VECTORS_TABLE: &str = "vectors";
pub const META_TABLE: &str = "meta";
pub const INDEX_NAME: &str = "vector_ivfpq";
pub const INDEXED_ROWS_KEY: &str = "indexed_rows";
/// PQ codebooks use 8 bits, so training needs at least 256 rows.
pub const MIN_ROWS_FOR_INDEX: usize = 256;
/// Retrain once the row count moved by at least 1/N of the indexed count.
pub const RETRAIN_DIVISOR: usize = 10;

pub struct IvfPqParams {
    pub nlist: usize,
    pub m: usize,
}

pub(crate) fn storage(err: impl std::fmt::Display) -> Error {
    Error::Storage(err.to_string())
}

pub fn vectors_schema(dims: usize) -> Result<Arc<Schema>> {
    let width = i32::try_from(dims).map_err(|_| Error::InvalidConfig(format!("dimensions {dims} too large")))?;
    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), width), true),
    ])))
}

fn meta_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
    ]))
}

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(storage)
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<Table> {
    let names = conn.table_names().execute().await.map_err(storage)?;
    if !names.iter().any(|n| n == name) {
        // create empty table with 0 rows
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
        conn.create_table(name, Box::new(iter)).execute().await.map_err(storage)?;
    }
    conn.open_table(name).execute().await.map_err(storage)
}

pub fn vector_batch(schema: Arc<Schema>, dims: usize, id: &str, vector: &[f32]) -> Result<RecordBatch> {
    vectors_batch(schema, dims, [(id, vector)])
}

/// One record batch holding every `(id, vector)` row.
pub fn vectors_batch<'a, I>(schema: Arc<Schema>, dims: usize, rows: I) -> Result<RecordBatch>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let width = i32::try_from(dims).map_err(storage)?;
    let (ids, values): (Vec<String>, Vec<Option<Vec<Option<f32>>>>) = rows
        .into_iter()
        .map(|(id, v)| (id.to_string(), Some(v.iter().copied().map(Some).collect())))
        .unzip();
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(values, width)),
        ],
    )
    .map_err(storage)
}

/// Insert or replace rows keyed by `key_column`.
pub async fn upsert(table: &Table, key_column: &str, batch: RecordBatch) -> Result<()> {
    let schema = batch.schema();
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    let mut mi = table.merge_insert(&[key_column]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(reader).await.map_err(storage)?;
    Ok(())
}

pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub async fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    let table = ensure_table(conn, META_TABLE, meta_schema()).await?;
    let rb = RecordBatch::try_new(
        meta_schema(),
        vec![Arc::new(StringArray::from(vec![key.to_string()])), Arc::new(StringArray::from(vec![value.to_string()]))],
    )
    .map_err(storage)?;
    upsert(&table, "key", rb).await
}

pub async fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let names = conn.table_names().execute().await.map_err(storage)?;
    if !names.iter().any(|n| n == META_TABLE) {
        return Ok(None);
    }
    let t = conn.open_table(META_TABLE).execute().await.map_err(storage)?;
    let mut stream = t.query().only_if(format!("key = {}", quote(key))).execute().await.map_err(storage)?;
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await.map_err(storage)? {
        if batch.num_rows() == 0 {
            continue;
        }
        let val = batch
            .column_by_name("value")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| Error::Storage("meta.value column missing".into()))?;
        return Ok(Some(val.value(0).to_string()));
    }
    Ok(None)
}

/// Whether a table of `rows` needs a (re)trained index, given how many rows
/// the current one was trained on.
pub fn needs_retrain(rows: usize, indexed: Option<usize>) -> bool {
    if rows < MIN_ROWS_FOR_INDEX {
        return false;
    }
    match indexed {
        None | Some(0) => true,
        Some(n) => rows.abs_diff(n).saturating_mul(RETRAIN_DIVISOR) >= n,
    }
}

pub fn compute_ivfpq_params(rows: usize, dim: usize) -> IvfPqParams {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let sqrt_n = (rows as f64).sqrt() as usize;
    // Clamp nlist to be less than rows for tiny datasets
    let nlist = if rows > 1 { sqrt_n.clamp(1, rows - 1) } else { 1 };
    let preferred = if dim >= 1024 { 32 } else { 16 };
    let m = [preferred, 16, 8, 4, 2, 1]
        .into_iter()
        .find(|m| *m <= dim && dim % m == 0)
        .unwrap_or(1);
    IvfPqParams { nlist, m }
}

pub async fn build_ivfpq_index(table: &Table, params: &IvfPqParams) -> Result<()> {
    let nlist = u32::try_from(params.nlist).map_err(storage)?;
    let m = u32::try_from(params.m).map_err(storage)?;
    table
        .create_index(
            &["vector"],
            Index::IvfPq(
                IvfPqIndexBuilder::default()
                    .distance_type(DistanceType::Cosine)
                    .num_partitions(nlist)
                    .num_sub_vectors(m),
            ),
        )
        .name(INDEX_NAME.to_string())
        .replace(true)
        .execute()
        .await
        .map_err(storage)
}
