use std::env;

use anyhow::{anyhow, Context, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{backoff_delay, LlmProvider, LlmRequest, LlmResponse, MAX_RETRIES};

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const GEMINI_MODELS_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

/// Hosted generation APIs. OpenAI and Deepseek share the chat-completions wire shape.
#[derive(Clone)]
pub(crate) enum CloudApi {
    ChatCompletions {
        provider: LlmProvider,
        base_url: String,
        api_key: String,
    },
    Anthropic {
        api_key: String,
        max_tokens: u32,
    },
    Gemini {
        api_key: String,
    },
}

impl CloudApi {
    pub(crate) fn from_env(provider: LlmProvider) -> Result<Option<Self>> {
        let api = match provider {
            LlmProvider::OpenAi => CloudApi::ChatCompletions {
                provider,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key: read_api_key("OPENAI_API_KEY")?,
            },
            LlmProvider::Deepseek => CloudApi::ChatCompletions {
                provider,
                base_url: DEEPSEEK_BASE_URL.to_string(),
                api_key: read_api_key("DEEPSEEK_API_KEY")?,
            },
            LlmProvider::Anthropic => CloudApi::Anthropic {
                api_key: read_api_key("ANTHROPIC_API_KEY")?,
                max_tokens: env::var("ANTHROPIC_MAX_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1024),
            },
            LlmProvider::Gemini => CloudApi::Gemini {
                api_key: read_api_key("GEMINI_API_KEY")?,
            },
            LlmProvider::Ollama | LlmProvider::Local => return Ok(None),
        };
        Ok(Some(api))
    }

    fn name(&self) -> &'static str {
        match self {
            CloudApi::ChatCompletions { provider, .. } => provider.as_str(),
            CloudApi::Anthropic { .. } => "anthropic",
            CloudApi::Gemini { .. } => "gemini",
        }
    }

    fn endpoint(&self, model: &str) -> String {
        match self {
            CloudApi::ChatCompletions { base_url, .. } => {
                format!("{}/chat/completions", base_url.trim_end_matches('/'))
            }
            CloudApi::Anthropic { .. } => ANTHROPIC_URL.to_string(),
            CloudApi::Gemini { .. } => format!("{GEMINI_MODELS_URL}/{model}:generateContent"),
        }
    }

    fn request(&self, http: &Client, model: &str, payload: &Value) -> RequestBuilder {
        let builder = http.post(self.endpoint(model)).json(payload);
        match self {
            CloudApi::ChatCompletions { api_key, .. } => builder.bearer_auth(api_key),
            CloudApi::Anthropic { api_key, .. } => builder
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            CloudApi::Gemini { api_key } => builder.query(&[("key", api_key)]),
        }
    }

    fn payload(&self, model: &str, req: &LlmRequest) -> Value {
        match self {
            CloudApi::ChatCompletions { .. } => chat_payload(model, req),
            CloudApi::Anthropic { max_tokens, .. } => anthropic_payload(model, *max_tokens, req),
            CloudApi::Gemini { .. } => gemini_payload(req),
        }
    }

    fn decode(&self, body: Value) -> Result<LlmResponse> {
        match self {
            CloudApi::ChatCompletions { .. } => chat_reply(&body),
            CloudApi::Anthropic { .. } => anthropic_reply(body),
            CloudApi::Gemini { .. } => gemini_reply(body),
        }
    }

    /// One generation, retrying transport errors, 429 and 5xx with exponential backoff.
    pub(crate) async fn generate(
        &self,
        http: &Client,
        model: &str,
        req: &LlmRequest,
    ) -> Result<LlmResponse> {
        let name = self.name();
        let payload = self.payload(model, req);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match self.request(http, model, &payload).send().await {
                Ok(resp) => resp,
                Err(err) if attempt <= MAX_RETRIES => {
                    tracing::warn!(provider = name, attempt, error = %err, "request failed, retrying");
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("{name} request failed"));
                }
            };
            let status = response.status();
            if (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
                && attempt <= MAX_RETRIES
            {
                let wait = backoff_delay(attempt, response.headers().get(RETRY_AFTER));
                tracing::warn!(provider = name, attempt, %status, ?wait, "backing off");
                sleep(wait).await;
                continue;
            }
            let body = response
                .text()
                .await
                .with_context(|| format!("failed to read {name} response"))?;
            if !status.is_success() {
                return Err(anyhow!("{name} returned error (status {status}): {body}"));
            }
            let value: Value = serde_json::from_str(&body)
                .with_context(|| format!("failed to decode {name} response"))?;
            return self.decode(value);
        }
    }
}

fn chat_payload(model: &str, req: &LlmRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": req.user }));
    let mut payload = json!({ "model": model, "messages": messages });
    if let Some(temperature) = req.temperature {
        payload["temperature"] = json!(temperature);
    }
    payload
}

fn anthropic_payload(model: &str, max_tokens: u32, req: &LlmRequest) -> Value {
    let mut payload = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": [ { "role": "user", "content": req.user } ],
    });
    if let Some(system) = &req.system {
        payload["system"] = json!(system);
    }
    if let Some(temperature) = req.temperature {
        payload["temperature"] = json!(temperature);
    }
    payload
}

/// Gemini has no system role on this endpoint; the system text is prefixed inline.
fn gemini_payload(req: &LlmRequest) -> Value {
    let mut prompt = String::new();
    if let Some(system) = &req.system {
        prompt.push_str("[SYSTEM]\n");
        prompt.push_str(system.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str(&req.user);
    let mut payload = json!({ "contents": [ { "parts": [ { "text": prompt } ] } ] });
    if let Some(temperature) = req.temperature {
        payload["generationConfig"] = json!({ "temperature": temperature });
    }
    payload
}

fn chat_reply(body: &Value) -> Result<LlmResponse> {
    let content =
        extract_chat_text(body).ok_or_else(|| anyhow!("missing text in chat completion"))?;
    let usage: TokenUsage = body
        .get("usage")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default();
    Ok(usage.into_response(content))
}

fn anthropic_reply(body: Value) -> Result<LlmResponse> {
    let parsed: AnthropicResponse =
        serde_json::from_value(body).context("unexpected anthropic response shape")?;
    let content = parsed
        .content
        .into_iter()
        .find_map(|part| part.text)
        .ok_or_else(|| anyhow!("missing text in Anthropic response"))?;
    let usage = parsed.usage.unwrap_or_default();
    Ok(TokenUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
    }
    .into_response(content))
}

fn gemini_reply(body: Value) -> Result<LlmResponse> {
    let parsed: GeminiResponse =
        serde_json::from_value(body).context("unexpected gemini response shape")?;
    let content = parsed
        .candidates
        .into_iter()
        .flatten()
        .flat_map(|candidate| candidate.content.parts)
        .find_map(|part| part.text)
        .ok_or_else(|| anyhow!("missing text in Gemini response"))?;
    let usage = parsed.usage.unwrap_or_default();
    Ok(TokenUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
    }
    .into_response(content))
}

/// Accepts both `message.content` strings and content-part arrays, plus legacy `text`.
fn extract_chat_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| anyhow!("{var} is not set"))?;
    validate_api_key(var, &value)?;
    Ok(value)
}

fn validate_api_key(var: &str, value: &str) -> Result<()> {
    let prefix = match var {
        "ANTHROPIC_API_KEY" => "sk-ant-",
        "OPENAI_API_KEY" | "DEEPSEEK_API_KEY" => "sk-",
        "GEMINI_API_KEY" => "AI",
        _ => return Ok(()),
    };
    if !value.starts_with(prefix) {
        return Err(anyhow!("{var} must start with '{prefix}'"));
    }
    Ok(())
}

#[derive(Default, Deserialize)]
struct TokenUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

impl TokenUsage {
    fn into_response(self, content: String) -> LlmResponse {
        LlmResponse {
            content,
            prompt_tokens: self.prompt_tokens.unwrap_or(0),
            completion_tokens: self.completion_tokens.unwrap_or(0),
        }
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "usageMetadata")]
    usage: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_tokens: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    completion_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmRequest {
        LlmRequest {
            system: Some("Be brief.".to_string()),
            user: "Is rent due on the 1st?".to_string(),
            temperature: Some(0.2),
        }
    }

    #[test]
    fn chat_completions_payload_and_reply() {
        let payload = chat_payload("gpt-4o-mini", &request());
        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "Is rent due on the 1st?");
        assert_eq!(payload["temperature"], json!(0.2f32));

        let body = json!({
            "choices": [{"message": {"content": "Yes."}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 2}
        });
        let reply = chat_reply(&body).unwrap();
        assert_eq!(reply.content, "Yes.");
        assert_eq!((reply.prompt_tokens, reply.completion_tokens), (12, 2));

        let parts = json!({"choices": [{"message": {"content": [{"type": "text", "text": "Part"}]}}]});
        assert_eq!(chat_reply(&parts).unwrap().content, "Part");
        assert!(chat_reply(&json!({"choices": []})).is_err());
    }

    #[test]
    fn deepseek_shares_the_chat_wire_shape() {
        let api = CloudApi::ChatCompletions {
            provider: LlmProvider::Deepseek,
            base_url: DEEPSEEK_BASE_URL.to_string(),
            api_key: "sk-test".to_string(),
        };
        assert_eq!(api.name(), "deepseek");
        assert_eq!(
            api.endpoint("deepseek-chat"),
            "https://api.deepseek.com/v1/chat/completions"
        );
        let payload = api.payload("deepseek-chat", &LlmRequest::user("hi"));
        assert_eq!(payload["messages"].as_array().unwrap().len(), 1);
        let reply = api
            .decode(json!({"choices": [{"message": {"content": "hello"}}]}))
            .unwrap();
        assert_eq!(reply.content, "hello");
        assert_eq!(reply.prompt_tokens, 0);
    }

    #[test]
    fn anthropic_payload_and_reply() {
        let payload = anthropic_payload("claude-3-5-haiku", 512, &request());
        assert_eq!(payload["max_tokens"], 512);
        assert_eq!(payload["system"], "Be brief.");
        assert_eq!(payload["messages"][0]["role"], "user");

        let body = json!({
            "content": [{"type": "tool_use"}, {"type": "text", "text": "Yes, on the 1st."}],
            "usage": {"input_tokens": 20, "output_tokens": 5}
        });
        let reply = anthropic_reply(body).unwrap();
        assert_eq!(reply.content, "Yes, on the 1st.");
        assert_eq!((reply.prompt_tokens, reply.completion_tokens), (20, 5));
        assert!(anthropic_reply(json!({"content": []})).is_err());
    }

    #[test]
    fn gemini_payload_and_reply() {
        let payload = gemini_payload(&request());
        let text = payload["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("[SYSTEM]\nBe brief.\n\n"));
        assert!(text.ends_with("Is rent due on the 1st?"));
        assert_eq!(payload["generationConfig"]["temperature"], json!(0.2f32));

        let api = CloudApi::Gemini {
            api_key: "AIzaTest".to_string(),
        };
        assert!(api
            .endpoint("gemini-1.5-flash")
            .ends_with("/models/gemini-1.5-flash:generateContent"));

        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "Yes."}]}}],
            "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 1}
        });
        let reply = gemini_reply(body).unwrap();
        assert_eq!(reply.content, "Yes.");
        assert_eq!((reply.prompt_tokens, reply.completion_tokens), (9, 1));
        assert!(gemini_reply(json!({})).is_err());
    }

    #[test]
    fn api_keys_are_checked_by_prefix() {
        assert!(validate_api_key("OPENAI_API_KEY", "sk-abc").is_ok());
        assert!(validate_api_key("OPENAI_API_KEY", "abc").is_err());
        assert!(validate_api_key("ANTHROPIC_API_KEY", "sk-abc").is_err());
        assert!(validate_api_key("ANTHROPIC_API_KEY", "sk-ant-abc").is_ok());
        assert!(validate_api_key("GEMINI_API_KEY", "AIza").is_ok());
        assert!(validate_api_key("OTHER", "anything").is_ok());
    }
}
