use std::env;

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{LlmRequest, LlmResponse};

#[derive(Clone)]
pub(crate) struct OllamaConfig {
    base_url: String,
}

impl OllamaConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
        }
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

/// One line of an Ollama NDJSON stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamFragment {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Deserialize)]
struct GenerateBody {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

fn payload(model: &str, req: &LlmRequest, stream: bool) -> Value {
    let mut payload = json!({
        "model": model,
        "prompt": req.user,
        "stream": stream,
    });
    if let Some(system) = &req.system {
        payload["system"] = json!(system);
    }
    if let Some(temperature) = req.temperature {
        payload["options"] = json!({ "temperature": temperature });
    }
    payload
}

pub(crate) async fn generate(
    http: &Client,
    cfg: &OllamaConfig,
    model: &str,
    req: &LlmRequest,
) -> Result<LlmResponse> {
    let body = http
        .post(cfg.generate_url())
        .json(&payload(model, req, false))
        .send()
        .await
        .with_context(|| "ollama request failed")?
        .error_for_status()
        .context("ollama returned an error")?
        .json::<GenerateBody>()
        .await
        .context("failed to decode ollama response")?;
    Ok(LlmResponse {
        content: body.response,
        prompt_tokens: body.prompt_eval_count.unwrap_or(0),
        completion_tokens: body.eval_count.unwrap_or(0),
    })
}

pub(crate) async fn generate_stream<F>(
    http: &Client,
    cfg: &OllamaConfig,
    model: &str,
    req: &LlmRequest,
    mut on_fragment: F,
) -> Result<LlmResponse>
where
    F: FnMut(&StreamFragment) + Send,
{
    let response = http
        .post(cfg.generate_url())
        .json(&payload(model, req, true))
        .send()
        .await
        .with_context(|| "ollama request failed")?
        .error_for_status()
        .context("ollama returned an error")?;
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut content = String::new();
    let mut finished = false;
    while let Some(bytes) = stream.next().await {
        let bytes = bytes.context("ollama stream interrupted")?;
        buffer.extend_from_slice(&bytes);
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            if let Some(fragment) = parse_line(&line)? {
                content.push_str(&fragment.response);
                finished |= fragment.done;
                on_fragment(&fragment);
            }
        }
    }
    if let Some(fragment) = parse_line(&buffer)? {
        content.push_str(&fragment.response);
        finished |= fragment.done;
        on_fragment(&fragment);
    }
    if !finished {
        return Err(anyhow!("ollama stream ended before done"));
    }
    Ok(LlmResponse {
        content,
        prompt_tokens: 0,
        completion_tokens: 0,
    })
}

fn parse_line(line: &[u8]) -> Result<Option<StreamFragment>> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .context("malformed ollama stream line")
}
