use std::env;
use std::future::Future;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;

use lodestar_core::{HashEmbedder, HashEmbedderConfig};

/// Seam over the embedding service so the indexer and retriever can be driven by
/// test doubles.
pub trait Embed: Send + Sync {
    fn default_model(&self) -> &str;

    /// One vector per input, in input order.
    fn embed_batch(
        &self,
        model: &str,
        inputs: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;
}

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbeddingClient),
    Ollama(OllamaEmbeddingClient),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
    model: String,
}

impl EmbeddingClient {
    pub fn from_env() -> Result<Self> {
        match env::var("EMBEDDING_PROVIDER")
            .unwrap_or_else(|_| "hash".to_string())
            .to_lowercase()
            .as_str()
        {
            "openai" => {
                let model = env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "text-embedding-3-small".to_string());
                Ok(Self {
                    backend: EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new()?),
                    model,
                })
            }
            "ollama" => {
                let model =
                    env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "nomic-embed-text".to_string());
                Ok(Self {
                    backend: EmbeddingBackend::Ollama(OllamaEmbeddingClient::from_env()),
                    model,
                })
            }
            _ => {
                let dims = env::var("HASH_EMBED_DIMENSIONS")
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(64);
                Ok(Self::hash_with(HashEmbedderConfig {
                    dimensions: dims,
                    seed: 1337,
                }))
            }
        }
    }

    pub fn hash() -> Self {
        Self::hash_with(HashEmbedderConfig::default())
    }

    fn hash_with(config: HashEmbedderConfig) -> Self {
        let embedder = HashEmbedder::new(config);
        Self {
            model: format!("hash-{}", embedder.dimensions()),
            backend: EmbeddingBackend::Hash(embedder),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inputs = vec![text.to_string()];
        let mut output = self.embed_batch(&self.model, &inputs).await?;
        output.pop().ok_or_else(|| anyhow!("embedding service returned no vector"))
    }
}

impl Embed for EmbeddingClient {
    fn default_model(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(inputs
                .iter()
                .map(|text| embedder.embed_text(text))
                .collect()),
            EmbeddingBackend::OpenAi(client) => client.embed_batch(model, inputs).await,
            EmbeddingBackend::Ollama(client) => client.embed_batch(model, inputs).await,
        }
    }
}

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    api_key: String,
}

impl OpenAiEmbeddingClient {
    pub fn new() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY is required for openai embeddings"))?;
        Ok(Self {
            http: Client::new(),
            api_key,
        })
    }

    pub async fn embed_batch(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = "https://api.openai.com/v1/embeddings";
        let payload = serde_json::json!({
            "model": model,
            "input": inputs,
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("openai embeddings request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "openai embeddings request failed: {}",
                response.status()
            ));
        }
        let parsed: OpenAiEmbeddingResponse = response.json().await?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Clone)]
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
}

impl OllamaEmbeddingClient {
    pub fn from_env() -> Self {
        Self {
            http: Client::new(),
            base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
        }
    }

    /// Embeds the whole batch in one `/api/embed` call.
    pub async fn embed_batch(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let parsed: OllamaEmbeddingResponse = self
            .http
            .post(&url)
            .json(&ollama_embed_payload(model, inputs))
            .send()
            .await
            .context("ollama embeddings request failed")?
            .error_for_status()
            .context("ollama embeddings returned an error")?
            .json()
            .await
            .context("failed to decode ollama embeddings")?;
        ollama_vectors(parsed, inputs.len())
    }
}

fn ollama_embed_payload(model: &str, inputs: &[String]) -> serde_json::Value {
    serde_json::json!({ "model": model, "input": inputs })
}

fn ollama_vectors(parsed: OllamaEmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    if parsed.embeddings.len() != expected {
        return Err(anyhow!(
            "ollama returned {} embeddings for {} inputs",
            parsed.embeddings.len(),
            expected
        ));
    }
    if parsed.embeddings.iter().any(Vec::is_empty) {
        return Err(anyhow!("ollama returned an empty embedding"));
    }
    Ok(parsed.embeddings)
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}
