use std::fs;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use lodestar_core::{content_hash, short_id};
use lodestar_ledger::{AnswerMode, ArtifactRef, ArtifactStore, MemoryEntry, MemoryLog};
use lodestar_llm::{Generate, LlmRequest};
use lodestar_rag::{Embed, HybridRetriever, Passage, RagStore, RetrievalQuery, SearchFilters};

use crate::budget::{BudgetReport, Usage};
use crate::cet::{run_property_tests, validate_cet, CetOutput, CetValidation, PropertyReport};
use crate::config::{EngineConfig, TunnelMode};
use crate::distiller::{extract_distilled, Distilled};
use crate::governance::{generate_text, GovernanceLoop, GovernanceTrace};
use crate::planner::{plan_tasks, TaskType};
use crate::router::{route_model, RouterDecision};
use crate::tunneler::{
    cet_contract, diagnose, tunnel, Domain, Friction, TunnelInput, TunnelOutput,
    DEFAULT_CITATIONS,
};
use crate::vote::{arbitrate, CandidateOutcome, VoteResult};

const SUMMARY_FALLBACK_CHARS: usize = 280;

#[derive(Debug, Clone)]
pub struct AskRequest {
    pub user_id: String,
    pub session_id: String,
    pub prompt: String,
    pub mode: AnswerMode,
    /// Overrides the configured tunnel mode.
    pub tunnel: Option<TunnelMode>,
    pub domain: Option<Domain>,
    pub locale: Option<String>,
    pub filters: SearchFilters,
}

impl AskRequest {
    pub fn new(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            user_id: "local".to_string(),
            session_id: session_id.into(),
            prompt: prompt.into(),
            mode: AnswerMode::Governed,
            tunnel: None,
            domain: None,
            locale: None,
            filters: SearchFilters::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GovernanceNotes {
    pub cet: CetOutput,
    pub validation: CetValidation,
    pub properties: PropertyReport,
    pub budget: BudgetReport,
    pub friction: Vec<Friction>,
    pub tunneled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote: Option<VoteResult>,
    /// Artifact ids in the order they were produced.
    pub lineage: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub memory_id: String,
    pub reply: String,
    pub task_type: TaskType,
    pub route: RouterDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelOutput>,
    pub passages: Vec<Passage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub governance: Option<GovernanceTrace>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<CandidateOutcome>,
    pub notes: GovernanceNotes,
    pub artifacts: Vec<ArtifactRef>,
}

struct Generated {
    reply: String,
    usage: Usage,
    governance: Option<GovernanceTrace>,
    candidates: Vec<CandidateOutcome>,
    vote: Option<VoteResult>,
    models: Vec<String>,
}

pub struct Engine<G, E> {
    config: EngineConfig,
    generator: G,
    store: RagStore,
    retriever: HybridRetriever<E>,
    memory: MemoryLog,
    artifacts: ArtifactStore,
}

impl<G: Generate, E: Embed> Engine<G, E> {
    /// Opens the relational store, artifact store and session log under the
    /// configured data directory.
    pub fn open(config: EngineConfig, generator: G, embedder: Option<E>) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
        let store = RagStore::open(config.rag_path())?;
        let memory = MemoryLog::open(&config.data_dir)?;
        let artifacts = ArtifactStore::open(config.artifacts_dir())?;
        Ok(Self {
            retriever: HybridRetriever::new(store.clone(), embedder),
            store,
            config,
            generator,
            memory,
            artifacts,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &RagStore {
        &self.store
    }

    pub fn retriever(&self) -> &HybridRetriever<E> {
        &self.retriever
    }

    pub fn memory(&self) -> &MemoryLog {
        &self.memory
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Runs plan → route → tunnel → retrieve → generate → govern → persist.
    /// Upstream failures degrade the reply; persistence failures are logged.
    pub async fn answer(&self, request: &AskRequest) -> Answer {
        let started = Instant::now();
        let plan = plan_tasks(&request.prompt);
        let task_type = plan.primary();
        let route = route_model(&self.config.router, task_type, &request.prompt);
        tracing::debug!(task = task_type.as_str(), model = %route.model, "request routed");

        let friction = diagnose(&request.prompt);
        let tunnel_output = self.maybe_tunnel(request, &friction);
        let citations = self
            .config
            .tunnel
            .require_citations
            .unwrap_or(DEFAULT_CITATIONS);
        let base_prompt = match &tunnel_output {
            Some(out) => out.transformed.clone(),
            None => format!(
                "REQUEST: {}\n\n{}",
                request.prompt.trim(),
                cet_contract(citations)
            ),
        };

        let passages = if task_type == TaskType::Retrieve {
            let mut query = RetrievalQuery::new(request.prompt.clone());
            query.k_vec = self.config.retrieval.k_vec;
            query.k_bm25 = self.config.retrieval.k_bm25;
            query.k_final = self.config.retrieval.k_final;
            query.filters = request.filters.clone();
            self.retriever.retrieve_hybrid(&query).await.passages
        } else {
            Vec::new()
        };

        let distilled = self.distilled(&request.session_id);
        let prompt = compose_prompt(&distilled, &passages, &base_prompt);

        let generated = match request.mode {
            AnswerMode::Governed => self.governed(&route.model, prompt).await,
            AnswerMode::Multi => self.multi(&route.model, prompt).await,
        };

        let cet = CetOutput::from_text(&generated.reply);
        let validation = validate_cet(&cet);
        let properties =
            run_property_tests(&generated.reply, &self.config.governance.property_tests);
        let rate = self
            .config
            .pricing
            .lookup(&self.config.llm.provider, &route.model);
        let budget = BudgetReport::compare(route.budget, started.elapsed(), generated.usage, rate);
        if !validation.ok {
            tracing::debug!(missing = ?validation.missing, "reply does not satisfy CET");
        }

        let artifacts = self.save_artifacts(&generated);
        let notes = GovernanceNotes {
            cet,
            validation,
            properties,
            budget,
            friction,
            tunneled: tunnel_output.is_some(),
            vote: generated.vote.clone(),
            lineage: artifacts.iter().map(|a| a.id.clone()).collect(),
        };
        let memory_id = self.remember(request, &route, &generated, &notes);

        Answer {
            memory_id,
            reply: generated.reply,
            task_type,
            route,
            tunnel: tunnel_output,
            passages,
            governance: generated.governance,
            candidates: generated.candidates,
            notes,
            artifacts,
        }
    }

    fn maybe_tunnel(&self, request: &AskRequest, friction: &[Friction]) -> Option<TunnelOutput> {
        let settings = &self.config.tunnel;
        let apply = match request.tunnel.unwrap_or(settings.mode) {
            TunnelMode::Off => false,
            TunnelMode::Always => true,
            TunnelMode::Auto => friction
                .iter()
                .any(|f| matches!(f, Friction::Policy | Friction::Vague)),
        };
        if !apply {
            return None;
        }
        Some(tunnel(&TunnelInput {
            text: request.prompt.clone(),
            cet: settings.cet,
            role: settings.role.clone(),
            domain: request.domain.or(settings.domain),
            locale: request.locale.clone().or_else(|| settings.locale.clone()),
            require_citations: settings.require_citations,
        }))
    }

    fn distilled(&self, session_id: &str) -> Distilled {
        extract_distilled(&self.memory, session_id).unwrap_or_else(|err| {
            tracing::warn!(session = session_id, error = %err, "could not read session memory");
            Distilled::default()
        })
    }

    async fn governed(&self, model: &str, prompt: String) -> Generated {
        let draft = generate_text(&self.generator, model, prompt).await;
        let trace = GovernanceLoop::new(&self.generator, model)
            .run(&draft.text)
            .await;
        let mut usage = draft.usage;
        usage.prompt_tokens += trace.usage.prompt_tokens;
        usage.completion_tokens += trace.usage.completion_tokens;
        usage.calls += trace.usage.calls;
        Generated {
            reply: trace.reply.clone(),
            usage,
            governance: Some(trace),
            candidates: Vec::new(),
            vote: None,
            models: vec![model.to_string()],
        }
    }

    async fn multi(&self, routed_model: &str, prompt: String) -> Generated {
        let models = if self.config.governance.candidates.is_empty() {
            vec![routed_model.to_string()]
        } else {
            self.config.governance.candidates.clone()
        };
        let k = self.config.governance.vote_k.unwrap_or(models.len());
        let arbitration = arbitrate(&self.generator, &models, &LlmRequest::user(prompt), k).await;
        let reply = match &arbitration.vote {
            Some(vote) => vote.winner.clone(),
            None => {
                let errors: Vec<String> = arbitration
                    .candidates
                    .iter()
                    .filter_map(|c| c.error.as_ref().map(|e| format!("{}: {e}", c.model)))
                    .collect();
                format!(
                    "[generation error: none of the first {k} candidates answered; {}]",
                    errors.join("; ")
                )
            }
        };
        Generated {
            reply,
            usage: arbitration.usage,
            governance: None,
            candidates: arbitration.candidates,
            vote: arbitration.vote,
            models,
        }
    }

    /// Governed answers chain draft → verify → critique → refine; multi answers
    /// store each candidate and then the winner with every candidate as lineage.
    fn save_artifacts(&self, generated: &Generated) -> Vec<ArtifactRef> {
        let mut stages: Vec<(&str, &str)> = Vec::new();
        if let Some(trace) = &generated.governance {
            stages.push(("draft", trace.draft.as_str()));
            stages.push(("verify", trace.verification.text.as_str()));
            stages.push(("critique", trace.critique.text.as_str()));
            stages.push(("refine", trace.refine_raw.text.as_str()));
        }
        let mut saved: Vec<ArtifactRef> = Vec::new();
        let mut lineage: Vec<String> = Vec::new();
        for (kind, text) in stages {
            match self.artifacts.save_text(kind, text, &lineage) {
                Ok(artifact) => {
                    lineage.push(artifact.id.clone());
                    saved.push(artifact);
                }
                Err(err) => tracing::warn!(kind, error = %err, "artifact save failed"),
            }
        }
        if generated.governance.is_none() {
            for candidate in &generated.candidates {
                let Some(reply) = candidate.reply.as_deref() else {
                    continue;
                };
                match self.artifacts.save_text("candidate", reply, &[]) {
                    Ok(artifact) => {
                        lineage.push(artifact.id.clone());
                        saved.push(artifact);
                    }
                    Err(err) => tracing::warn!(error = %err, "artifact save failed"),
                }
            }
            match self.artifacts.save_text("answer", &generated.reply, &lineage) {
                Ok(artifact) => saved.push(artifact),
                Err(err) => tracing::warn!(error = %err, "artifact save failed"),
            }
        }
        saved
    }

    fn remember(
        &self,
        request: &AskRequest,
        route: &RouterDecision,
        generated: &Generated,
        notes: &GovernanceNotes,
    ) -> String {
        let timestamp = Utc::now();
        let id = short_id(&content_hash(&format!(
            "{}\u{0}{}\u{0}{}",
            request.session_id,
            timestamp.to_rfc3339(),
            request.prompt
        )));
        let governance_notes = serde_json::to_value(notes)
            .map_err(|err| tracing::warn!(error = %err, "governance notes not serializable"))
            .ok();
        let (model, candidates) = match request.mode {
            AnswerMode::Governed => (Some(route.model.clone()), None),
            AnswerMode::Multi => (None, Some(generated.models.clone())),
        };
        let entry = MemoryEntry {
            id: id.clone(),
            timestamp,
            user_id: request.user_id.clone(),
            session_id: request.session_id.clone(),
            mode: request.mode,
            prompt: request.prompt.clone(),
            model,
            candidates,
            response: generated.reply.clone(),
            governance_notes,
        };
        if let Err(err) = self.memory.append(&entry) {
            tracing::warn!(session = %request.session_id, error = %err, "memory append failed");
            return id;
        }
        let header = self.distilled(&request.session_id).context_header();
        let summary = if header.is_empty() {
            generated
                .reply
                .chars()
                .take(SUMMARY_FALLBACK_CHARS)
                .collect::<String>()
        } else {
            header
        };
        if let Err(err) = self
            .memory
            .set_session_summary(&request.session_id, &summary)
        {
            tracing::warn!(session = %request.session_id, error = %err, "summary write failed");
        }
        id
    }
}

/// Distilled header, then numbered sources, then the request itself.
pub fn compose_prompt(distilled: &Distilled, passages: &[Passage], base: &str) -> String {
    let mut prompt = distilled.context_header();
    if !prompt.is_empty() {
        prompt.push('\n');
    }
    if !passages.is_empty() {
        prompt.push_str("Sources:\n");
        for (idx, passage) in passages.iter().enumerate() {
            prompt.push_str(&format!(
                "[{}] ({}) {}\n",
                idx + 1,
                passage.provenance.document_source,
                passage.text.trim()
            ));
        }
        prompt.push('\n');
    }
    prompt.push_str(base);
    prompt
}
