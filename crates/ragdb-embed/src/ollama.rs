//! Blocking HTTP client for an Ollama-compatible model server.

use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use ragdb_core::config::ProviderConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::Provider;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaProvider {
    base_url: String,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl OllamaProvider {
    pub fn new(cfg: &ProviderConfig) -> Result<Self> {
        Self::with_base_url(cfg.base_url(), Duration::from_secs(cfg.timeout_secs.max(1)))
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { base_url, timeout, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_err(&self, e: &reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Provider(e.to_string())
        }
    }

    fn post<Req: Serialize, Resp: DeserializeOwned>(&self, path: &str, body: &Req) -> Result<Resp> {
        let url = format!("{}{path}", self.base_url);
        let resp = self.client.post(&url).json(body).send().map_err(|e| self.map_err(&e))?;
        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().unwrap_or_default();
            return Err(Error::Provider(format!("{path}: HTTP {status}: {body_text}")));
        }
        resp.json::<Resp>().map_err(|e| Error::Provider(format!("{path}: invalid response: {e}")))
    }

    /// True when the server answers `/api/version`.
    pub fn is_running(&self) -> bool {
        let url = format!("{}/api/version", self.base_url);
        match self.client.get(&url).send() {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                tracing::debug!(url, error = %err, "model server not reachable");
                false
            }
        }
    }
}

impl Provider for OllamaProvider {
    fn generate_embedding(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let resp: EmbeddingResponse = self.post("/api/embeddings", &EmbeddingRequest { model, prompt: text })?;
        if resp.embedding.is_empty() {
            return Err(Error::Provider(format!("model '{model}' returned an empty embedding")));
        }
        Ok(resp.embedding)
    }

    fn generate_completion(&self, model: &str, prompt: &str) -> Result<String> {
        let resp: GenerateResponse =
            self.post("/api/generate", &GenerateRequest { model, prompt, stream: false })?;
        Ok(resp.response)
    }
}
