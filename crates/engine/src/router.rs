use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use lodestar_core::{dominant_script, Script};

use crate::planner::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub latency_ms: u64,
    pub usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub model: String,
    #[serde(flatten)]
    pub budget: Budget,
}

impl Route {
    fn new(model: &str, latency_ms: u64, usd: f64) -> Self {
        Self {
            model: model.to_string(),
            budget: Budget { latency_ms, usd },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterDecision {
    pub model: String,
    pub budget: Budget,
    /// Set when a script override replaced the task-type model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,
}

/// Task-type table plus script overrides. Deserialized from the `[router]` table;
/// entries that are not configured fall back to the built-in defaults, which name
/// Ollama model tags. With `fallback_model` set, that model replaces every
/// built-in model and built-in script overrides are off; budgets stay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub tasks: HashMap<String, Route>,
    #[serde(default)]
    pub scripts: HashMap<String, String>,
    #[serde(default)]
    pub fallback_model: Option<String>,
}

impl RouterConfig {
    /// True when nothing was configured and only the built-in table applies.
    pub fn is_builtin(&self) -> bool {
        self.tasks.is_empty() && self.scripts.is_empty() && self.fallback_model.is_none()
    }

    fn task_route(&self, task_type: TaskType) -> Route {
        if let Some(route) = self.tasks.get(task_type.as_str()) {
            return route.clone();
        }
        let mut route = default_route(task_type);
        if let Some(model) = &self.fallback_model {
            route.model = model.clone();
        }
        route
    }

    fn script_model(&self, script: Script) -> Option<String> {
        if let Some(model) = self.scripts.get(script.as_str()) {
            return Some(model.clone());
        }
        if self.fallback_model.is_some() {
            return None;
        }
        default_script_model(script).map(str::to_string)
    }
}

fn default_route(task_type: TaskType) -> Route {
    match task_type {
        TaskType::Transform => Route::new("llama3.2:3b", 4_000, 0.0005),
        TaskType::Compute => Route::new("qwen2.5-math:7b", 6_000, 0.001),
        TaskType::Retrieve => Route::new("llama3.1:8b", 8_000, 0.001),
        TaskType::Generate => Route::new("mistral-nemo:12b", 12_000, 0.002),
        TaskType::Reason => Route::new("llama3.1:70b", 20_000, 0.004),
    }
}

fn default_script_model(script: Script) -> Option<&'static str> {
    match script {
        Script::Arabic => Some("command-r7b-arabic"),
        Script::Cjk => Some("qwen2.5:14b"),
        Script::Cyrillic => Some("aya-expanse:8b"),
        Script::Devanagari => Some("aya-expanse:8b"),
        Script::Latin => None,
    }
}

/// Picks the model and advisory budget for a task. Non-Latin script in the text
/// overrides the model; the budget always comes from the task-type entry.
pub fn route_model(config: &RouterConfig, task_type: TaskType, text: &str) -> RouterDecision {
    let route = config.task_route(task_type);
    if let Some(script) = dominant_script(text) {
        if let Some(model) = config.script_model(script) {
            return RouterDecision {
                model,
                budget: route.budget,
                script: Some(script),
            };
        }
    }
    RouterDecision {
        model: route.model,
        budget: route.budget,
        script: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_by_task_type() {
        let config = RouterConfig::default();
        let decision = route_model(&config, TaskType::Compute, "what is 2 + 2");
        assert_eq!(decision.model, "qwen2.5-math:7b");
        assert_eq!(decision.budget.latency_ms, 6_000);
        assert!(decision.script.is_none());
    }

    #[test]
    fn script_overrides_task_model() {
        let config = RouterConfig::default();
        let decision = route_model(&config, TaskType::Compute, "ما هو مجموع ٢ و ٣");
        assert_eq!(decision.model, "command-r7b-arabic");
        assert_eq!(decision.script, Some(Script::Arabic));
        assert_eq!(decision.budget, default_route(TaskType::Compute).budget);

        let decision = route_model(&config, TaskType::Reason, "东京 is in Japan");
        assert_eq!(decision.model, "qwen2.5:14b");
    }

    #[test]
    fn configured_entries_win() {
        let config: RouterConfig = toml::from_str(
            r#"
            [tasks.reason]
            model = "small-reasoner"
            latency_ms = 1000
            usd = 0.0

            [scripts]
            cyrillic = "saiga"
            "#,
        )
        .unwrap();
        assert_eq!(
            route_model(&config, TaskType::Reason, "why").model,
            "small-reasoner"
        );
        assert_eq!(
            route_model(&config, TaskType::Retrieve, "почему небо синее").model,
            "saiga"
        );
        assert_eq!(
            route_model(&config, TaskType::Retrieve, "plain").model,
            "llama3.1:8b"
        );
    }

    #[test]
    fn fallback_model_replaces_builtin_models_only() {
        let config = RouterConfig {
            fallback_model: Some("gpt-4.1-mini".to_string()),
            scripts: HashMap::from([("cjk".to_string(), "qwen-max".to_string())]),
            ..RouterConfig::default()
        };
        assert!(!config.is_builtin());
        let decision = route_model(&config, TaskType::Reason, "why is the sky blue");
        assert_eq!(decision.model, "gpt-4.1-mini");
        assert_eq!(decision.budget, default_route(TaskType::Reason).budget);
        assert_eq!(
            route_model(&config, TaskType::Compute, "ما هو مجموع ٢ و ٣").model,
            "gpt-4.1-mini"
        );
        assert_eq!(
            route_model(&config, TaskType::Compute, "东京の人口").model,
            "qwen-max"
        );
        assert!(RouterConfig::default().is_builtin());
    }
}
