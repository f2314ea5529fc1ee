use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use lodestar_engine::{
    extract_distilled, plan_tasks, route_model, run_property_tests, tunnel, validate_cet,
    AskRequest, CetOutput, Domain, EngineConfig, GovernanceLoop, TaskType, TunnelInput,
    TunnelMode,
};
use lodestar_ledger::{AnswerMode, MemoryLog};
use lodestar_llm::{Generate, LlmClient, LlmRequest};
use lodestar_rag::{HybridRetriever, RagStore, RetrievalQuery, SearchFilters};

use crate::config::{self, LocalEngine};

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn search(
    config: &EngineConfig,
    query: String,
    k: usize,
    filters: SearchFilters,
) -> Result<()> {
    let store = RagStore::open(config.rag_path())?;
    let retriever = HybridRetriever::new(store, Some(config::embedder()?));
    let mut request = RetrievalQuery::new(query);
    request.k_vec = config.retrieval.k_vec;
    request.k_bm25 = config.retrieval.k_bm25;
    request.k_final = k;
    request.filters = filters;
    print_json(&retriever.retrieve_hybrid(&request).await)
}

pub fn plan(prompt: &str) -> Result<()> {
    print_json(&plan_tasks(prompt))
}

pub fn route(config: &EngineConfig, prompt: &str, task: Option<&str>) -> Result<()> {
    let task_type = match task {
        Some(name) => TaskType::from_str(name).ok_or_else(|| anyhow!("unknown task type {name}"))?,
        None => plan_tasks(prompt).primary(),
    };
    print_json(&route_model(&config.router, task_type, prompt))
}

pub fn tunnel_prompt(config: &EngineConfig, input: TunnelInput) -> Result<()> {
    let mut input = input;
    if input.role.trim().is_empty() {
        input.role = config.tunnel.role.clone();
    }
    input.domain = input.domain.or(config.tunnel.domain);
    input.locale = input.locale.or_else(|| config.tunnel.locale.clone());
    input.require_citations = input.require_citations.or(config.tunnel.require_citations);
    print_json(&tunnel(&input))
}

pub struct AskArgs {
    pub prompt: String,
    pub session: String,
    pub user: String,
    pub mode: String,
    pub tunnel: Option<String>,
    pub domain: Option<String>,
    pub locale: Option<String>,
    pub json: bool,
}

pub async fn ask(engine: &LocalEngine, args: AskArgs) -> Result<()> {
    let mode = AnswerMode::from_str(&args.mode)
        .ok_or_else(|| anyhow!("unknown mode {}; expected governed or multi", args.mode))?;
    let tunnel = args
        .tunnel
        .as_deref()
        .map(|raw| {
            TunnelMode::from_str(raw)
                .ok_or_else(|| anyhow!("unknown tunnel mode {raw}; expected off, auto or always"))
        })
        .transpose()?;
    let mut request = AskRequest::new(args.session, args.prompt);
    request.user_id = args.user;
    request.mode = mode;
    request.tunnel = tunnel;
    request.domain = args.domain.as_deref().map(Domain::from_str);
    request.locale = args.locale;
    let answer = engine.answer(&request).await;
    if args.json {
        return print_json(&answer);
    }
    println!("{}", answer.reply);
    let notes = &answer.notes;
    eprintln!(
        "[lodestar] task={} model={} cet_ok={} properties_ok={} latency_ms={} memory={}",
        answer.task_type.as_str(),
        answer.route.model,
        notes.validation.ok,
        notes.properties.passed,
        notes.budget.actual_latency_ms,
        answer.memory_id
    );
    if !notes.validation.ok {
        eprintln!("[lodestar] missing CET sections: {}", notes.validation.missing.join(", "));
    }
    Ok(())
}

pub async fn chat(client: &LlmClient, prompt: String, model: Option<String>, stream: bool) -> Result<()> {
    let model = model.unwrap_or_else(|| client.model().to_string());
    let request = LlmRequest::user(prompt);
    if !stream {
        let response = client.generate(&model, &request).await?;
        println!("{}", response.content);
        return Ok(());
    }
    let mut stdout = std::io::stdout();
    client
        .chat_stream(&model, &request, |fragment| {
            let _ = stdout.write_all(fragment.response.as_bytes());
            let _ = stdout.flush();
        })
        .await?;
    println!();
    Ok(())
}

pub async fn govern(client: &LlmClient, draft: &Path, model: Option<String>) -> Result<()> {
    let text = fs::read_to_string(draft)
        .with_context(|| format!("failed to read {}", draft.display()))?;
    let model = model.unwrap_or_else(|| client.model().to_string());
    let trace = GovernanceLoop::new(client, &model).run(&text).await;
    print_json(&trace)
}

pub fn validate(config: &EngineConfig, reply: &Path, tests: Option<String>) -> Result<()> {
    let text = fs::read_to_string(reply)
        .with_context(|| format!("failed to read {}", reply.display()))?;
    let tests: Vec<String> = match tests {
        Some(list) => list
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        None => config.governance.property_tests.clone(),
    };
    let cet = CetOutput::from_text(&text);
    print_json(&serde_json::json!({
        "validation": validate_cet(&cet),
        "properties": run_property_tests(&text, &tests),
        "cet": cet,
    }))
}

pub fn distill(config: &EngineConfig, session: &str) -> Result<()> {
    let memory = MemoryLog::open(&config.data_dir)?;
    let distilled = extract_distilled(&memory, session)?;
    print_json(&serde_json::json!({
        "facts": distilled.facts,
        "entities": distilled.entities,
        "header": distilled.context_header(),
    }))
}

pub fn summary_get(config: &EngineConfig, session: &str) -> Result<()> {
    let memory = MemoryLog::open(&config.data_dir)?;
    match memory.get_session_summary(session)? {
        Some(text) => println!("{text}"),
        None => eprintln!("[lodestar] no summary for session {session}"),
    }
    Ok(())
}

pub fn summary_set(config: &EngineConfig, session: &str, text: &str) -> Result<()> {
    let memory = MemoryLog::open(&config.data_dir)?;
    memory.set_session_summary(session, text)?;
    Ok(())
}
