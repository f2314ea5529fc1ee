use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::router::Budget;

#[derive(Debug, Default, Deserialize, Clone)]
pub struct PricingConfig {
    #[serde(default)]
    pub openai: HashMap<String, PricingEntry>,
    #[serde(default)]
    pub anthropic: HashMap<String, PricingEntry>,
    #[serde(default)]
    pub gemini: HashMap<String, PricingEntry>,
    #[serde(default)]
    pub deepseek: HashMap<String, PricingEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PricingEntry {
    pub prompt_per_1k: Option<f64>,
    pub completion_per_1k: Option<f64>,
    pub prompt_per_1m: Option<f64>,
    pub completion_per_1m: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PricingRate {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl PricingConfig {
    /// Self-hosted providers (ollama, local) have no table and cost nothing.
    pub fn lookup(&self, provider: &str, model: &str) -> Option<PricingRate> {
        match provider {
            "openai" => Self::lookup_entry(&self.openai, model),
            "anthropic" => Self::lookup_entry(&self.anthropic, model),
            "gemini" => Self::lookup_entry(&self.gemini, model),
            "deepseek" => Self::lookup_entry(&self.deepseek, model),
            "ollama" | "local" => Some(PricingRate {
                prompt_per_1k: 0.0,
                completion_per_1k: 0.0,
            }),
            _ => None,
        }
    }

    fn lookup_entry(map: &HashMap<String, PricingEntry>, model: &str) -> Option<PricingRate> {
        map.get(model)
            .or_else(|| map.get(&model.to_lowercase()))
            .and_then(|entry| entry.normalized())
    }
}

impl PricingEntry {
    pub fn normalized(&self) -> Option<PricingRate> {
        let prompt = self
            .prompt_per_1k
            .or_else(|| self.prompt_per_1m.map(|value| value / 1000.0));
        let completion = self
            .completion_per_1k
            .or_else(|| self.completion_per_1m.map(|value| value / 1000.0));
        if prompt.is_none() && completion.is_none() {
            return None;
        }
        Some(PricingRate {
            prompt_per_1k: prompt.unwrap_or(0.0),
            completion_per_1k: completion.unwrap_or(0.0),
        })
    }
}

impl PricingRate {
    pub fn cost_usd(&self, usage: Usage) -> f64 {
        (usage.prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

/// Token usage summed over every generation call made for one answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub calls: u32,
}

impl Usage {
    pub fn record(&mut self, prompt_tokens: u32, completion_tokens: u32) {
        self.prompt_tokens += u64::from(prompt_tokens);
        self.completion_tokens += u64::from(completion_tokens);
        self.calls += 1;
    }
}

/// Expected-versus-actual telemetry for a routed call. Nothing here aborts work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetReport {
    pub expected: Budget,
    pub actual_latency_ms: u64,
    pub actual_usd: Option<f64>,
    pub usage: Usage,
    pub over_latency: bool,
    /// `None` when no pricing is known for the model.
    pub over_cost: Option<bool>,
}

impl BudgetReport {
    pub fn compare(
        expected: Budget,
        elapsed: Duration,
        usage: Usage,
        rate: Option<PricingRate>,
    ) -> Self {
        let actual_latency_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let actual_usd = rate.map(|rate| rate.cost_usd(usage));
        Self {
            expected,
            actual_latency_ms,
            actual_usd,
            usage,
            over_latency: actual_latency_ms > expected.latency_ms,
            over_cost: actual_usd.map(|usd| usd > expected.usd),
        }
    }
}
