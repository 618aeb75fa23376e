//! Qdrant backend.
//!
//! Point ids must be UUIDs on the wire. Ids that already parse as UUIDs are
//! sent verbatim; anything else is mapped to a name-based v5 UUID and the
//! original id travels in the `chunk_id` payload field.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::with_payload_selector::SelectorOptions;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PayloadIncludeSelector, PointId,
    PointStruct, PointsIdsList, Query, QueryPointsBuilder, ScoredPoint, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tokio::runtime::Runtime;
use uuid::Uuid;

use ragdb_core::collection::QdrantConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::similarity::rank;
use ragdb_core::traits::VectorStore;
use ragdb_core::types::{RecordPayload, SearchResult, VectorData};

pub const CHUNK_ID_FIELD: &str = "chunk_id";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn remote(err: impl std::fmt::Display) -> Error {
    Error::Remote(err.to_string())
}

/// Wire id for a chunk id.
pub fn point_uuid(id: &str) -> String {
    match Uuid::parse_str(id) {
        Ok(u) => u.to_string(),
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()).to_string(),
    }
}

pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    dimensions: usize,
    timeout: Duration,
    closed: AtomicBool,
    runtime: Runtime,
}

impl QdrantStore {
    /// Connect and verify (or create) the collection. Fails fast when the
    /// endpoint is unreachable.
    pub fn connect(config: &QdrantConfig, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(Error::InvalidConfig("dimensions must be > 0".into()));
        }
        if config.collection_name.trim().is_empty() {
            return Err(Error::InvalidConfig("qdrant collection_name is empty".into()));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = {
            let _guard = runtime.enter();
            Qdrant::from_url(&config.url())
                .api_key(config.api_key.clone())
                .timeout(timeout)
                .connect_timeout(CONNECT_TIMEOUT)
                .skip_compatibility_check()
                .build()
                .map_err(|e| Error::InvalidConfig(format!("qdrant client: {e}")))?
        };
        let store = Self {
            client,
            collection: config.collection_name.clone(),
            dimensions,
            timeout,
            closed: AtomicBool::new(false),
            runtime,
        };
        store.ensure_collection(config.create_if_missing)?;
        tracing::info!(url = %config.url(), collection = %store.collection, dimensions, "connected to qdrant");
        Ok(store)
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    fn call<T, F>(&self, timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, qdrant_client::QdrantError>>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.runtime.block_on(async {
            match tokio::time::timeout(timeout, fut).await {
                Ok(res) => res.map_err(remote),
                Err(_) => Err(Error::Timeout(timeout)),
            }
        })
    }

    fn ensure_collection(&self, create_if_missing: bool) -> Result<()> {
        let exists = self
            .call(CONNECT_TIMEOUT, self.client.collection_exists(&self.collection))
            .map_err(|e| Error::InvalidConfig(format!("qdrant unreachable: {e}")))?;
        if exists {
            return Ok(());
        }
        if !create_if_missing {
            return Err(Error::InvalidConfig(format!("qdrant collection '{}' does not exist", self.collection)));
        }
        let dims = u64::try_from(self.dimensions).map_err(remote)?;
        self.call(
            CONNECT_TIMEOUT,
            self.client.create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dims, Distance::Cosine)),
            ),
        )?;
        tracing::info!(collection = %self.collection, dims, "created qdrant collection");
        Ok(())
    }

    /// Number of points in the collection.
    pub fn count(&self) -> Result<u64> {
        let resp = self.call(self.timeout, self.client.count(CountPointsBuilder::new(&self.collection).exact(true)))?;
        Ok(resp.result.map_or(0, |r| r.count))
    }

    pub fn delete_collection(&self) -> Result<()> {
        self.call(self.timeout, self.client.delete_collection(&self.collection))?;
        tracing::info!(collection = %self.collection, "deleted qdrant collection");
        Ok(())
    }

    fn payload_selector() -> SelectorOptions {
        SelectorOptions::Include(PayloadIncludeSelector {
            fields: vec![CHUNK_ID_FIELD.to_string()],
        })
    }

    fn point(&self, id: &str, vector: &[f32], payload: Option<&RecordPayload>) -> Result<PointStruct> {
        if vector.len() != self.dimensions {
            return Err(Error::DimensionMismatch { expected: self.dimensions, actual: vector.len() });
        }
        let body = payload.cloned().unwrap_or_default();
        let payload = Payload::try_from(serde_json::json!({
            CHUNK_ID_FIELD: id,
            "content": body.content,
            "metadata": body.metadata,
        }))
        .map_err(remote)?;
        Ok(PointStruct::new(point_uuid(id), vector.to_vec(), payload))
    }

    fn upsert(&self, points: Vec<PointStruct>) -> Result<()> {
        self.call(self.timeout, self.client.upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true)))
            .map(|_| ())
    }

    fn hit_id(point: &ScoredPoint) -> Option<String> {
        if let Some(Kind::StringValue(s)) = point.payload.get(CHUNK_ID_FIELD).and_then(|v| v.kind.as_ref()) {
            return Some(s.clone());
        }
        match point.id.as_ref().and_then(|p| p.point_id_options.as_ref()) {
            Some(PointIdOptions::Uuid(u)) => Some(u.clone()),
            Some(PointIdOptions::Num(n)) => Some(n.to_string()),
            None => None,
        }
    }
}

impl VectorStore for QdrantStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn try_add(&self, id: &str, vector: &[f32], payload: Option<&RecordPayload>) -> Result<()> {
        let point = self.point(id, vector, payload)?;
        let res = self.upsert(vec![point]);
        if let Err(err) = &res {
            tracing::error!(collection = %self.collection, id, error = %err, "qdrant upsert failed");
        }
        res
    }

    fn try_add_batch(&self, items: &[VectorData]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let points = items
            .iter()
            .map(|i| {
                let payload = RecordPayload { content: i.content.clone(), metadata: i.metadata.clone() };
                self.point(&i.id, &i.vector, Some(&payload))
            })
            .collect::<Result<Vec<_>>>()?;
        let res = self.upsert(points);
        if let Err(err) = &res {
            tracing::error!(collection = %self.collection, points = items.len(), error = %err, "qdrant batch upsert failed");
        }
        res
    }

    fn remove(&self, id: &str) -> Result<()> {
        let ids: Vec<PointId> = vec![point_uuid(id).into()];
        let res = self.call(
            self.timeout,
            self.client.delete_points(
                DeletePointsBuilder::new(&self.collection).points(PointsIdsList { ids }).wait(true),
            ),
        );
        if let Err(err) = &res {
            tracing::error!(collection = %self.collection, id, error = %err, "qdrant delete failed");
        }
        res.map(|_| ())
    }

    /// An empty filter selects every point of the collection.
    fn clear(&self) -> Result<()> {
        self.call(
            self.timeout,
            self.client.delete_points(DeletePointsBuilder::new(&self.collection).points(Filter::default()).wait(true)),
        )?;
        tracing::info!(collection = %self.collection, "qdrant collection cleared");
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        if k == 0 || query.len() != self.dimensions {
            return Vec::new();
        }
        let request = QueryPointsBuilder::new(&self.collection)
            .query(Query::new_nearest(query.to_vec()))
            .limit(k as u64)
            .with_payload(Self::payload_selector())
            .with_vectors(false);
        match self.call(self.timeout, self.client.query(request)) {
            Ok(resp) => {
                let mut results: Vec<SearchResult> = resp
                    .result
                    .iter()
                    .filter_map(|p| Self::hit_id(p).map(|id| SearchResult::new(id, p.score)))
                    .collect();
                rank(&mut results, k);
                results
            }
            Err(err) => {
                tracing::error!(collection = %self.collection, error = %err, "qdrant search failed");
                Vec::new()
            }
        }
    }

    /// Persistence is managed by the server.
    fn save(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn load(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn len(&self) -> usize {
        match self.count() {
            Ok(n) => usize::try_from(n).unwrap_or(usize::MAX),
            Err(err) => {
                tracing::error!(collection = %self.collection, error = %err, "qdrant count failed");
                0
            }
        }
    }
}
