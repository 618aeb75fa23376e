use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

use ragdb_core::error::{Error, Result};
use ragdb_core::traits::Provider;

/// Deterministic bag-of-tokens embedder for offline runs and tests.
///
/// Texts sharing tokens land close in cosine space; the model name is ignored.
pub struct HashingProvider {
    dim: usize,
}

impl HashingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let token = token.to_lowercase();
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            #[allow(clippy::cast_possible_truncation)]
            let idx = (h % self.dim as u64) as usize;
            #[allow(clippy::cast_precision_loss)]
            let val = ((h >> 32) as u32) as f32 / u32::MAX as f32;
            #[allow(clippy::cast_precision_loss)]
            let jitter = (i % 3) as f32 * 0.01;
            v[idx] += val + jitter;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Provider for HashingProvider {
    fn generate_embedding(&self, _model: &str, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    fn generate_completion(&self, model: &str, _prompt: &str) -> Result<String> {
        Err(Error::Provider(format!("hashing provider cannot generate text (model '{model}')")))
    }
}
