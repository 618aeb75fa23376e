use std::sync::Arc;

use ragdb_core::collection::{BackendConfig, BackendKind, QdrantConfig};
use ragdb_core::traits::VectorStore;
use ragdb_core::Error;
use ragdb_core::types::VectorData;
use ragdb_vector::remote::point_uuid;
use ragdb_vector::{needs_retrain, MIN_ROWS_FOR_INDEX};
use ragdb_vector::{ApproximateStore, BruteForceStore, QdrantStore, VectorBackend};
use tempfile::TempDir;

fn seed(store: &dyn VectorStore) {
    store.add("a", &[1.0, 0.0, 0.0, 0.0]);
    store.add("b", &[0.8, 0.2, 0.0, 0.0]);
    store.add("c", &[0.0, 0.0, 1.0, 0.0]);
}

fn assert_sorted(store: &dyn VectorStore, q: &[f32], k: usize) {
    let hits = store.search(q, k);
    assert!(hits.len() <= k);
    for w in hits.windows(2) {
        assert!(w[0].score >= w[1].score, "scores not sorted: {hits:?}");
    }
}

#[test]
fn brute_force_three_chunk_scenario() {
    let store = BruteForceStore::new(4);
    seed(&store);
    let q = [0.9, 0.1, 0.0, 0.0];

    let hits = store.search(&q, 2);
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "a");
    assert_eq!(hits[1].id, "b");
    assert!(hits[0].score >= hits[1].score);

    store.remove("a").expect("remove");
    let hits = store.search(&q, 2);
    assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), ["b", "c"]);
    assert_eq!(store.search(&q, 10).len(), 2);
    store.remove("a").expect("removing twice is a no-op");
}

#[test]
fn brute_force_rejects_wrong_dimensions_without_panicking() {
    let store = BruteForceStore::new(4);
    store.add("short", &[1.0, 2.0]);
    assert!(store.is_empty());
    assert!(matches!(
        store.try_add("short", &[1.0, 2.0], None),
        Err(Error::DimensionMismatch { expected: 4, actual: 2 })
    ));
    seed(&store);
    // A malformed query scores zero everywhere instead of failing.
    let hits = store.search(&[1.0], 3);
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|h| h.score == 0.0));
    assert_sorted(&store, &[0.1, 0.2, 0.3, 0.4], 2);
}

#[test]
fn brute_force_add_is_upsert() {
    let store = BruteForceStore::new(4);
    seed(&store);
    store.add("c", &[1.0, 0.0, 0.0, 0.0]);
    assert_eq!(store.len(), 3);
    assert_eq!(store.get("c"), Some(vec![1.0, 0.0, 0.0, 0.0]));
}

#[test]
fn brute_force_save_load_roundtrip_and_dimension_guard() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let path = tmp.path().join("nested").join("vectors.json");
    let store = BruteForceStore::new(4);
    seed(&store);
    store.save(&path)?;

    let restored = BruteForceStore::new(4);
    restored.load(&path)?;
    assert_eq!(restored.ids(), ["a", "b", "c"]);
    assert_eq!(restored.search(&[0.0, 0.0, 1.0, 0.0], 1)[0].id, "c");

    let wrong = BruteForceStore::new(8);
    assert!(matches!(wrong.load(&path), Err(Error::InvalidConfig(_))));

    let empty = BruteForceStore::new(4);
    empty.load(&tmp.path().join("missing.json"))?;
    assert!(empty.is_empty());
    Ok(())
}

#[test]
fn brute_force_concurrent_add_and_search() {
    let store = Arc::new(BruteForceStore::new(4));
    std::thread::scope(|s| {
        for t in 0..4u8 {
            let store = Arc::clone(&store);
            s.spawn(move || {
                for i in 0..100u8 {
                    let v = [f32::from(t) + 1.0, f32::from(i), 1.0, 0.5];
                    store.add(&format!("{t}-{i}"), &v);
                    let hits = store.search(&v, 5);
                    assert!(hits.len() <= 5);
                }
            });
        }
    });
    assert_eq!(store.len(), 400);
    assert_sorted(store.as_ref(), &[1.0, 2.0, 3.0, 4.0], 10);
}

#[test]
fn approximate_store_small_table_is_exact() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = ApproximateStore::open(&tmp.path().join("lance"), 4)?;
    seed(&store);
    store.try_add("a", &[1.0, 0.0, 0.0, 0.0], None)?;
    assert_eq!(store.len(), 3, "re-adding an id replaces the row");

    let hits = store.search(&[0.9, 0.1, 0.0, 0.0], 2);
    eprintln!("approximate hits: {hits:?}");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "a");
    assert!(hits[0].score >= hits[1].score);
    assert!((hits[0].score - 0.9939).abs() < 1e-3);

    store.remove("a")?;
    assert_eq!(store.len(), 2);
    assert!(matches!(store.try_add("x", &[1.0], None), Err(Error::DimensionMismatch { .. })));

    // Too few rows to train; saving is still fine.
    assert!(!store.build_index()?);
    store.save(tmp.path())?;
    Ok(())
}

#[test]
fn approximate_store_reopens_with_rows() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let dir = tmp.path().join("lance");
    {
        let store = ApproximateStore::open(&dir, 4)?;
        seed(&store);
        store.close()?;
        assert!(matches!(store.try_add("z", &[1.0, 0.0, 0.0, 0.0], None), Err(Error::Closed)));
        assert!(store.search(&[1.0, 0.0, 0.0, 0.0], 1).is_empty());
        assert!(matches!(store.count(), Err(Error::Closed)));
        assert_eq!(store.len(), 0, "count errors are logged and read as empty");
    }
    let store = ApproximateStore::open(&dir, 4)?;
    assert_eq!(store.len(), 3);
    assert_eq!(store.search(&[0.0, 0.0, 1.0, 0.0], 1)[0].id, "c");
    assert!(matches!(ApproximateStore::open(&dir, 8), Err(Error::InvalidConfig(_))));
    Ok(())
}

#[test]
fn retrain_waits_for_a_tenth_of_drift() {
    assert!(!needs_retrain(MIN_ROWS_FOR_INDEX - 1, None));
    assert!(needs_retrain(MIN_ROWS_FOR_INDEX, None));
    assert!(needs_retrain(300, Some(0)));
    assert!(!needs_retrain(1000, Some(1000)));
    assert!(!needs_retrain(1099, Some(1000)));
    assert!(needs_retrain(1100, Some(1000)));
    assert!(needs_retrain(900, Some(1000)));
}

#[test]
fn approximate_store_batch_upsert_and_clear() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = ApproximateStore::open(&tmp.path().join("lance"), 4)?;
    seed(&store);
    let batch: Vec<VectorData> = [("a", [0.0, 1.0, 0.0, 0.0]), ("d", [0.0, 0.0, 0.0, 1.0])]
        .iter()
        .map(|(id, v)| VectorData { id: (*id).to_string(), vector: v.to_vec(), content: String::new(), metadata: String::new() })
        .collect();
    store.try_add_batch(&batch)?;
    assert_eq!(store.len(), 4);
    assert_eq!(store.search(&[0.0, 1.0, 0.0, 0.0], 1)[0].id, "a");
    assert_eq!(store.search(&[0.0, 0.0, 0.0, 1.0], 1)[0].id, "d");

    let mut bad = batch[0].clone();
    bad.vector.push(0.0);
    assert!(matches!(store.try_add_batch(&[bad]), Err(Error::DimensionMismatch { expected: 4, actual: 5 })));

    store.clear()?;
    assert!(store.is_empty());
    assert!(store.search(&[1.0, 0.0, 0.0, 0.0], 3).is_empty());
    store.try_add("e", &[1.0, 0.0, 0.0, 0.0], None)?;
    assert_eq!(store.len(), 1);
    Ok(())
}

#[test]
fn brute_force_clear_empties_the_map() {
    let store = BruteForceStore::new(4);
    seed(&store);
    store.clear().unwrap();
    assert!(store.is_empty());
    assert!(store.search(&[1.0, 0.0, 0.0, 0.0], 3).is_empty());
}

/// Slow: trains IVF-PQ on 300 rows. Run with
/// `cargo test -p ragdb-vector --test backend_tests -- --ignored`
#[ignore]
#[test]
fn approximate_store_builds_index_and_still_finds_rows() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = ApproximateStore::open(&tmp.path().join("lance"), 16)?;
    let rows: Vec<VectorData> = (0..300u16)
        .map(|i| VectorData {
            id: format!("v{i}"),
            vector: (0..16u16).map(|d| f32::from((i * 31 + d * 7) % 97) / 97.0 + 0.01).collect(),
            content: String::new(),
            metadata: String::new(),
        })
        .collect();
    store.try_add_batch(&rows)?;
    assert!(store.build_index()?);
    assert!(!store.build_index()?, "unchanged table is not retrained");
    store.try_add("extra", &rows[0].vector, None)?;
    assert!(!store.build_index()?, "one extra row does not retrain");
    let sample: Vec<f32> = (0..16u16).map(|d| f32::from((42 * 31 + d * 7) % 97) / 97.0 + 0.01).collect();
    let hits = store.search(&sample, 10);
    assert!(!hits.is_empty());
    assert_sorted(&store, &sample, 10);
    Ok(())
}

#[test]
fn point_ids_are_uuid_shaped_and_stable() {
    let raw = "550e8400-e29b-41d4-a716-446655440000";
    assert_eq!(point_uuid(raw), raw);
    let a = point_uuid("doc_chunk_0");
    assert_eq!(a, point_uuid("doc_chunk_0"));
    assert_ne!(a, point_uuid("doc_chunk_1"));
    assert!(uuid_like(&a));
}

fn uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4
}

#[test]
fn backend_enum_dispatches_by_config() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let bf = VectorBackend::open(&BackendConfig::BruteForce, 4, tmp.path())?;
    assert_eq!(bf.kind(), BackendKind::BruteForce);
    let approx = VectorBackend::open(&BackendConfig::Approximate { path: None }, 4, tmp.path())?;
    assert_eq!(approx.kind(), BackendKind::Approximate);
    assert!(tmp.path().join("lance").exists());
    for store in [&bf, &approx] {
        seed(store);
        assert_eq!(store.len(), 3);
        assert_eq!(store.search(&[1.0, 0.0, 0.0, 0.0], 1)[0].id, "a");
    }
    Ok(())
}

#[test]
fn qdrant_connect_fails_fast_when_unreachable() {
    let cfg = QdrantConfig {
        host: "127.0.0.1".into(),
        port: 1,
        collection_name: "unreachable".into(),
        timeout_secs: 1,
        ..QdrantConfig::default()
    };
    assert!(matches!(QdrantStore::connect(&cfg, 4), Err(Error::InvalidConfig(_))));
}

/// Needs a running Qdrant: `APP_QDRANT_HOST=localhost cargo test -p ragdb-vector -- --ignored qdrant_roundtrip`
#[ignore]
#[test]
fn qdrant_roundtrip() -> anyhow::Result<()> {
    let cfg = QdrantConfig {
        host: std::env::var("APP_QDRANT_HOST").unwrap_or_else(|_| "localhost".into()),
        collection_name: format!("ragdb_test_{}", std::process::id()),
        ..QdrantConfig::default()
    };
    let store = QdrantStore::connect(&cfg, 4)?;
    seed(&store);
    let hits = store.search(&[0.9, 0.1, 0.0, 0.0], 2);
    assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);
    store.remove("a")?;
    assert_eq!(store.search(&[1.0, 0.0, 0.0, 0.0], 1)[0].id, "b");
    store.delete_collection()?;
    Ok(())
}
