use ragdb_core::cancel::CancellationToken;
use ragdb_core::collection::{BackendConfig, BackendKind, CollectionMeta, QdrantConfig};
use ragdb_core::config::{Config, EngineConfig, ProviderKind};
use ragdb_core::similarity::{cosine_similarity, rank};
use ragdb_core::types::{DocumentChunk, SearchResult, META_DOCUMENT_NAME};
use ragdb_core::Error;

#[test]
fn cosine_is_symmetric_and_self_similar() {
    let a = [0.3f32, -1.2, 4.0, 0.5];
    let b = [1.0f32, 0.1, -0.7, 2.2];
    assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-6);
    assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    assert!((cosine_similarity(&b, &b) - 1.0).abs() < 1e-6);
}

#[test]
fn cosine_degenerate_inputs_score_zero() {
    assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
    assert_eq!(cosine_similarity(&[1.0], &[]), 0.0);
    assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
}

#[test]
fn rank_orders_and_truncates_deterministically() {
    let mut hits = vec![
        SearchResult::new("c", 0.5),
        SearchResult::new("a", 0.9),
        SearchResult::new("b", 0.5),
        SearchResult::new("d", f32::NAN),
    ];
    rank(&mut hits, 3);
    let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
}

#[test]
fn chunk_source_ref_prefers_document_name() {
    let plain = DocumentChunk::new("doc-1", "text", 1, 4);
    assert_eq!(plain.id, "doc-1_chunk_1");
    assert_eq!(plain.source_ref(), "Source: doc-1 (Section 2 of 4)");

    let named = plain.clone().with_metadata(META_DOCUMENT_NAME, "guide.md").with_metadata("lang", "en");
    assert_eq!(named.source_ref(), "Source: guide.md (Section 2 of 4)");
    assert_eq!(named.metadata_string(), "Source: guide.md (Section 2 of 4); lang: en");
}

#[test]
fn collection_meta_roundtrips_and_accepts_legacy_backend_tag() -> anyhow::Result<()> {
    let meta = CollectionMeta::new("docs", "llama3", 4).with_backend(BackendConfig::Qdrant(QdrantConfig {
        collection_name: "docs".into(),
        ..QdrantConfig::default()
    }));
    let json = serde_json::to_string(&meta)?;
    let back: CollectionMeta = serde_json::from_str(&json)?;
    assert_eq!(back, meta);
    assert_eq!(back.backend.kind(), BackendKind::Qdrant);

    let legacy = r#"{"name":"old","model_name":"m","dimensions":8,"backend":{"type":"internal"},
        "created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z"}"#;
    let old: CollectionMeta = serde_json::from_str(legacy)?;
    assert_eq!(old.backend, BackendConfig::BruteForce);
    assert!((old.lexical_weight - 0.3).abs() < f32::EPSILON);
    assert!(old.hybrid_search);
    assert_eq!(old.reranker.top_k, 5);
    assert_eq!(old.reranker.initial_k, 20);
    Ok(())
}

#[test]
fn collection_meta_rejects_bad_weights_and_dimensions() {
    let mut meta = CollectionMeta::new("docs", "m", 4);
    assert!(meta.validate().is_ok());
    meta.lexical_weight = 1.5;
    assert!(matches!(meta.validate(), Err(Error::InvalidConfig(_))));
    meta.lexical_weight = 0.3;
    meta.dimensions = 0;
    assert!(matches!(meta.validate(), Err(Error::InvalidConfig(_))));
}

#[test]
fn engine_config_merges_toml_and_env() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
            data_dir = "/tmp/ragdb-test"
            [cache]
            max_size = 10
            [provider]
            kind = "hashing"
            "#,
        )?;
        jail.set_env("RUST_ENV", "test");
        jail.set_env("APP_CACHE__TTL_SECS", "42");
        jail.set_env("APP_RETRIEVAL__EMBEDDING_WORKERS", "9");

        let cfg = Config::load().map_err(|e| e.to_string())?.engine().map_err(|e| e.to_string())?;
        assert_eq!(cfg.cache.max_size, 10);
        assert_eq!(cfg.cache.ttl_secs, 42);
        assert_eq!(cfg.provider.kind, ProviderKind::Hashing);
        assert_eq!(cfg.provider.port, 11434);
        assert_eq!(cfg.retrieval.context_size, 20);
        assert_eq!(cfg.embedding_workers(), 5);
        assert_eq!(cfg.data_dir(), std::path::PathBuf::from("/tmp/ragdb-test"));
        Ok(())
    });
}

#[test]
fn engine_config_validation() {
    let mut cfg = EngineConfig::default();
    assert!(cfg.validate().is_ok());
    cfg.cache.ttl_secs = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn cancellation_token_is_shared_between_clones() {
    let token = CancellationToken::new();
    let clone = token.clone();
    assert!(clone.check().is_ok());
    token.cancel();
    assert!(matches!(clone.check(), Err(Error::Cancelled)));
}
