use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ragdb_core::error::{Error, Result};
use ragdb_core::similarity::cosine_similarity;
use ragdb_core::traits::Provider;
use ragdb_core::types::DocumentChunk;
use ragdb_embed::cache::fingerprint;
use ragdb_embed::{EmbeddingCache, EmbeddingService, HashingProvider, OllamaProvider};

/// Provider double: per-model vectors, optional failing models, call counting.
struct ScriptedProvider {
    dims: usize,
    failing: Vec<String>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl ScriptedProvider {
    fn new(dims: usize, failing: &[&str]) -> Self {
        Self {
            dims,
            failing: failing.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        }
    }

    fn calls_for(&self, model: &str) -> usize {
        self.calls.lock().unwrap().get(model).copied().unwrap_or(0)
    }
}

impl Provider for ScriptedProvider {
    fn generate_embedding(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(model.to_string()).or_default() += 1;
        if self.failing.iter().any(|m| m == model) {
            return Err(Error::Provider(format!("model {model} unavailable")));
        }
        Ok(HashingProvider::new(self.dims).embed(text))
    }

    fn generate_completion(&self, _model: &str, _prompt: &str) -> Result<String> {
        Ok(String::new())
    }
}

#[test]
fn hashing_provider_shapes_and_determinism() {
    let p = HashingProvider::new(64);
    let v1 = p.generate_embedding("any", "hello world").unwrap();
    let v2 = p.generate_embedding("other", "hello world").unwrap();
    assert_eq!(v1.len(), 64);
    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");
    assert_eq!(v1, v2);
    let related = p.embed("hello there world");
    let unrelated = p.embed("quantum chromodynamics");
    assert!(cosine_similarity(&v1, &related) > cosine_similarity(&v1, &unrelated));
    assert!(p.generate_completion("m", "hi").is_err());
}

#[test]
fn fingerprint_separates_text_and_model() {
    assert_eq!(fingerprint("abc", "m"), fingerprint("abc", "m"));
    assert_ne!(fingerprint("abc", "m"), fingerprint("abc", "n"));
    assert_ne!(fingerprint("ab", "cm"), fingerprint("abc", "m"));
}

#[test]
fn cache_hit_and_model_scoping() {
    let cache = EmbeddingCache::new(10, Duration::from_secs(60));
    assert!(cache.get("t", "m").is_none());
    cache.set("t", "m", vec![1.0, 2.0]);
    assert_eq!(cache.get("t", "m"), Some(vec![1.0, 2.0]));
    assert!(cache.get("t", "other").is_none());
    cache.set("t", "m", vec![3.0]);
    assert_eq!(cache.get("t", "m"), Some(vec![3.0]));
    assert_eq!(cache.len(), 1);
}

#[test]
fn cache_entry_past_ttl_is_a_miss_before_cleanup() {
    let cache = EmbeddingCache::new(10, Duration::from_millis(80));
    cache.set("t", "m", vec![1.0]);
    assert!(cache.get("t", "m").is_some());
    std::thread::sleep(Duration::from_millis(120));
    assert!(cache.get("t", "m").is_none());
    assert_eq!(cache.len(), 1, "still physically stored");
    cache.cleanup();
    assert!(cache.is_empty());
}

#[test]
fn cache_eviction_keeps_frequently_used_entry() {
    let max = 5;
    let cache = EmbeddingCache::new(max, Duration::from_secs(600));
    cache.set("hot", "m", vec![0.0]);
    for _ in 0..50 {
        assert!(cache.get("hot", "m").is_some());
    }
    for i in 0..max {
        std::thread::sleep(Duration::from_millis(2));
        cache.set(&format!("cold-{i}"), "m", vec![0.0]);
    }
    cache.cleanup();
    assert!(cache.len() <= max);
    assert!(cache.get("hot", "m").is_some(), "frequently used entry survives");
    let cold_left = (0..max).filter(|i| cache.get(&format!("cold-{i}"), "m").is_some()).count();
    assert!(cold_left < max, "at least one never-accessed entry is evicted");
}

#[test]
fn service_uses_cache_for_repeated_queries() {
    let provider = Arc::new(ScriptedProvider::new(8, &[]));
    let service = EmbeddingService::new(provider.clone(), EmbeddingCache::new(100, Duration::from_secs(60)), "embed", 2).unwrap();
    let a = service.embed_query("what is rust", "llm").unwrap();
    let b = service.embed_query("what is rust", "llm").unwrap();
    assert_eq!(a, b);
    assert_eq!(provider.total.load(Ordering::SeqCst), 1);
}

#[test]
fn service_falls_back_to_collection_model_once() {
    let provider = Arc::new(ScriptedProvider::new(8, &["embed"]));
    let service = EmbeddingService::new(provider.clone(), EmbeddingCache::new(100, Duration::from_secs(60)), "embed", 1).unwrap();
    let v = service.embed_query("hello", "llm").unwrap();
    assert_eq!(v.len(), 8);
    assert_eq!(provider.calls_for("embed"), 1);
    assert_eq!(provider.calls_for("llm"), 1);

    // Same model on both sides: no second attempt.
    let err = service.embed_query("hello", "embed").unwrap_err();
    assert!(matches!(err, Error::Provider(_)));
    assert_eq!(provider.calls_for("embed"), 2);
}

#[test]
fn embed_chunks_fills_only_missing_embeddings() {
    let provider = Arc::new(ScriptedProvider::new(8, &[]));
    let service = EmbeddingService::new(provider.clone(), EmbeddingCache::new(100, Duration::from_secs(60)), "embed", 9).unwrap();
    let mut chunks: Vec<DocumentChunk> = (0..6).map(|i| DocumentChunk::new("doc", format!("chunk number {i}"), i, 6)).collect();
    chunks[2].embedding = vec![0.5; 8];
    let computed = service.embed_chunks(&mut chunks, "llm", 8).unwrap();
    assert_eq!(computed, 5);
    assert!(chunks.iter().all(|c| c.embedding.len() == 8));
    assert_eq!(chunks[2].embedding, vec![0.5; 8]);
    assert_eq!(service.embed_chunks(&mut chunks, "llm", 8).unwrap(), 0);

    let mut fresh = vec![DocumentChunk::new("doc2", "other text", 0, 1)];
    assert!(matches!(
        service.embed_chunks(&mut fresh, "llm", 4),
        Err(Error::DimensionMismatch { expected: 4, actual: 8 })
    ));
}

/// Serves `responses` in order, one connection each, and records request lines.
fn canned_server(responses: Vec<(u16, String)>) -> (String, std::thread::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = std::thread::spawn(move || {
        let mut seen = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
            }
            let mut body_in = vec![0u8; content_length];
            reader.read_exact(&mut body_in).unwrap();
            seen.push(format!("{} {}", request_line.trim(), String::from_utf8_lossy(&body_in)));
            let reply = format!(
                "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).unwrap();
        }
        seen
    });
    (format!("http://{addr}"), handle)
}

#[test]
fn ollama_provider_speaks_embeddings_and_generate() {
    let (url, handle) = canned_server(vec![
        (200, r#"{"embedding":[0.1,0.2,0.3]}"#.to_string()),
        (200, r#"{"response":"forty-two","done":true}"#.to_string()),
        (500, r#"{"error":"boom"}"#.to_string()),
    ]);
    let provider = OllamaProvider::with_base_url(url, Duration::from_secs(5)).unwrap();
    assert_eq!(provider.generate_embedding("m", "hi").unwrap(), vec![0.1, 0.2, 0.3]);
    assert_eq!(provider.generate_completion("m", "question").unwrap(), "forty-two");
    assert!(matches!(provider.generate_embedding("m", "hi"), Err(Error::Provider(_))));

    let seen = handle.join().unwrap();
    eprintln!("requests: {seen:?}");
    assert!(seen[0].starts_with("POST /api/embeddings"));
    assert!(seen[0].contains(r#""prompt":"hi""#));
    assert!(seen[1].starts_with("POST /api/generate"));
    assert!(seen[1].contains(r#""stream":false"#));
}

#[test]
fn ollama_provider_unreachable_is_an_error() {
    let provider = OllamaProvider::with_base_url("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
    assert!(!provider.is_running());
    assert!(provider.generate_embedding("m", "x").is_err());
}
