use std::path::Path;

use anyhow::{Context, Result};

use lodestar_engine::{Engine, EngineConfig};
use lodestar_llm::{LlmClient, LlmProvider};
use lodestar_rag::EmbeddingClient;

pub type LocalEngine = Engine<LlmClient, EmbeddingClient>;

pub fn load(path: Option<&Path>) -> Result<EngineConfig> {
    EngineConfig::load(path)
}

pub fn llm_client(config: &EngineConfig) -> Result<LlmClient> {
    let provider = config.llm.provider()?;
    LlmClient::new(provider, config.llm.model.clone())
        .with_context(|| format!("failed to configure {} client", provider.as_str()))
}

pub fn embedder() -> Result<EmbeddingClient> {
    EmbeddingClient::from_env().context("failed to configure embeddings")
}

pub fn open_engine(config: EngineConfig) -> Result<LocalEngine> {
    let llm = llm_client(&config)?;
    let embedder = embedder()?;
    Engine::open(config, llm, Some(embedder))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_provider_needs_no_keys() {
        let config = EngineConfig::default();
        let client = llm_client(&config).unwrap();
        assert_eq!(client.provider(), LlmProvider::Local);
    }
}
