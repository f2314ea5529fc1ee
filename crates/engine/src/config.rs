use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use lodestar_core::DEFAULT_CHUNK_CHARS;
use lodestar_ledger::DEFAULT_MAX_ATTEMPTS;
use lodestar_llm::LlmProvider;

use crate::budget::PricingConfig;
use crate::cet::DEFAULT_PROPERTY_TESTS;
use crate::router::RouterConfig;
use crate::tunneler::Domain;

pub const DEFAULT_CONFIG_FILE: &str = "lodestar.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelMode {
    Off,
    #[default]
    Auto,
    Always,
}

impl TunnelMode {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "off" => Some(TunnelMode::Off),
            "auto" => Some(TunnelMode::Auto),
            "always" => Some(TunnelMode::Always),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub llm: LlmSettings,
    pub retrieval: RetrievalSettings,
    pub router: RouterConfig,
    pub tunnel: TunnelSettings,
    pub governance: GovernanceSettings,
    pub ingest: IngestSettings,
    pub pricing: PricingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".lodestar"),
            llm: LlmSettings::default(),
            retrieval: RetrievalSettings::default(),
            router: RouterConfig::default(),
            tunnel: TunnelSettings::default(),
            governance: GovernanceSettings::default(),
            ingest: IngestSettings::default(),
            pricing: PricingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: String,
    /// Client default; per-request models come from the router.
    pub model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "local".to_string(),
        }
    }
}

impl LlmSettings {
    pub fn provider(&self) -> Result<LlmProvider> {
        LlmProvider::from_str(&self.provider)
            .ok_or_else(|| anyhow!(format!("unknown provider {}", self.provider)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub k_vec: usize,
    pub k_bm25: usize,
    pub k_final: usize,
    pub chunk_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k_vec: 50,
            k_bm25: 50,
            k_final: 12,
            chunk_chars: DEFAULT_CHUNK_CHARS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    pub mode: TunnelMode,
    pub role: String,
    pub cet: bool,
    pub domain: Option<Domain>,
    pub locale: Option<String>,
    pub require_citations: Option<u32>,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            mode: TunnelMode::Auto,
            role: "a careful research assistant".to_string(),
            cet: true,
            domain: None,
            locale: None,
            require_citations: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GovernanceSettings {
    /// Models asked in `multi` mode.
    pub candidates: Vec<String>,
    /// Candidates considered by the vote; all of them when unset.
    pub vote_k: Option<usize>,
    pub property_tests: Vec<String>,
}

impl Default for GovernanceSettings {
    fn default() -> Self {
        Self {
            candidates: vec![
                "llama3.1:8b".to_string(),
                "mistral-nemo:12b".to_string(),
                "qwen2.5:14b".to_string(),
            ],
            vote_k: None,
            property_tests: DEFAULT_PROPERTY_TESTS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Reads the TOML file (defaults when it does not exist) then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env();
        config.pin_hosted_routes()?;
        Ok(config)
    }

    /// The built-in route table names Ollama tags. A hosted provider without a
    /// `[router]` table routes every task to `llm.model` instead.
    pub fn pin_hosted_routes(&mut self) -> Result<()> {
        let provider = self.llm.provider()?;
        if provider.is_self_hosted() || !self.router.is_builtin() {
            return Ok(());
        }
        tracing::warn!(
            provider = provider.as_str(),
            model = %self.llm.model,
            "no [router] table for a hosted provider, routing every task to llm.model"
        );
        self.router.fallback_model = Some(self.llm.model.clone());
        if self.governance.candidates == GovernanceSettings::default().candidates {
            tracing::warn!("governance.candidates still lists Ollama tags; set it for multi mode");
        }
        Ok(())
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env(&mut self) {
        if let Ok(provider) = env::var("LODESTAR_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Ok(model) = env::var("LODESTAR_MODEL") {
            self.llm.model = model;
        }
        if let Ok(dir) = env::var("LODESTAR_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(chars) = env::var("LODESTAR_CHUNK_CHARS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.retrieval.chunk_chars = chars;
        }
    }

    pub fn rag_path(&self) -> PathBuf {
        self.data_dir.join("rag.sqlite")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::TaskType;
    use crate::router::route_model;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            data_dir = "/tmp/lodestar"

            [tunnel]
            mode = "always"
            domain = "legal"

            [governance]
            candidates = ["a", "b"]

            [pricing.openai."gpt-4.1-mini"]
            prompt_per_1m = 0.4
            completion_per_1m = 1.6
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/lodestar"));
        assert_eq!(config.tunnel.mode, TunnelMode::Always);
        assert_eq!(config.tunnel.domain, Some(Domain::Legal));
        assert_eq!(config.tunnel.role, TunnelSettings::default().role);
        assert_eq!(config.governance.candidates, vec!["a", "b"]);
        assert_eq!(config.retrieval.k_final, 12);
        assert_eq!(config.ingest.max_attempts, 3);
        assert!(config.pricing.lookup("openai", "gpt-4.1-mini").is_some());
    }

    #[test]
    fn hosted_provider_without_router_uses_llm_model() {
        let mut config = EngineConfig::from_toml_str(
            r#"
            [llm]
            provider = "openai"
            model = "gpt-4.1-mini"
            "#,
        )
        .unwrap();
        config.pin_hosted_routes().unwrap();
        let decision = route_model(&config.router, TaskType::Reason, "why");
        assert_eq!(decision.model, "gpt-4.1-mini");

        let mut routed = EngineConfig::from_toml_str(
            r#"
            [llm]
            provider = "openai"
            model = "gpt-4.1-mini"

            [router.tasks.reason]
            model = "o4-mini"
            latency_ms = 30000
            usd = 0.01
            "#,
        )
        .unwrap();
        routed.pin_hosted_routes().unwrap();
        assert_eq!(routed.router.fallback_model, None);
        assert_eq!(
            route_model(&routed.router, TaskType::Reason, "why").model,
            "o4-mini"
        );

        let mut local = EngineConfig::default();
        local.llm.provider = "ollama".to_string();
        local.pin_hosted_routes().unwrap();
        assert!(local.router.is_builtin());

        let mut bogus = EngineConfig::default();
        bogus.llm.provider = "bogus".to_string();
        assert!(bogus.pin_hosted_routes().is_err());
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.retrieval.chunk_chars, DEFAULT_CHUNK_CHARS);
    }
}
