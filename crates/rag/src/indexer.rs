use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::task;

use lodestar_core::{content_hash, dominant_script, ChunkConfig, Chunker};

use crate::embedding::Embed;
use crate::store::{ChunkInsert, DocumentInsert, RagStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub raw_text: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

impl IngestRequest {
    /// Idempotency key for queued ingestion: same source and bytes, same key.
    pub fn idempotency_key(&self) -> String {
        content_hash(&format!("{}\u{0}{}", self.source, self.raw_text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub document_id: i64,
    pub chunk_count: usize,
    /// True when the content was already indexed and only the title was touched.
    pub reused: bool,
}

pub struct Indexer<E> {
    store: RagStore,
    embedder: E,
    chunk_config: ChunkConfig,
}

impl<E: Embed> Indexer<E> {
    pub fn new(store: RagStore, embedder: E, chunk_config: ChunkConfig) -> Self {
        Self {
            store,
            embedder,
            chunk_config,
        }
    }

    pub fn store(&self) -> &RagStore {
        &self.store
    }

    /// Chunks, embeds and persists a document. Embedding runs before any write, and
    /// every write lands in one transaction, so a failure leaves no trace of the document.
    pub async fn ingest_document(&self, req: &IngestRequest) -> Result<IngestOutcome> {
        let hash = content_hash(&req.raw_text);
        let store = self.store.clone();
        let lookup_hash = hash.clone();
        let existing = task::spawn_blocking(move || store.find_document_by_hash(&lookup_hash))
            .await
            .context("document lookup task failed")??;
        if let Some(existing) = existing.filter(|doc| doc.chunk_count > 0) {
            if let Some(title) = req.title.clone() {
                let store = self.store.clone();
                task::spawn_blocking(move || store.update_title(existing.id, &title))
                    .await
                    .context("title update task failed")??;
            }
            tracing::debug!(document = existing.id, "content already indexed, title upserted");
            return Ok(IngestOutcome {
                document_id: existing.id,
                chunk_count: existing.chunk_count,
                reused: true,
            });
        }

        let chunks = Chunker::new(self.chunk_config).chunk(&req.raw_text);
        let model = req
            .embedding_model
            .clone()
            .unwrap_or_else(|| self.embedder.default_model().to_string());
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed_batch(&model, &texts)
                .await
                .with_context(|| format!("embedding failed for {}", req.source))?
        };
        if vectors.len() != chunks.len() {
            return Err(anyhow!(
                "embedding service returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            ));
        }

        let inserts: Vec<ChunkInsert> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| ChunkInsert {
                lang: dominant_script(&chunk.text).map(|s| s.as_str().to_string()),
                chunk_index: chunk.chunk_index,
                content_id: chunk.id,
                text: chunk.text,
                span: chunk.span,
                embedding,
                embedding_model: model.clone(),
            })
            .collect();
        let doc = DocumentInsert {
            source: req.source.clone(),
            content_hash: hash,
            title: req.title.clone(),
            mime: req.mime.clone(),
            owner_id: req.owner_id.clone(),
            char_len: req.raw_text.chars().count(),
        };
        let store = self.store.clone();
        let stored =
            task::spawn_blocking(move || store.insert_document_with_chunks(&doc, &inserts))
                .await
                .context("ingest task failed")??;
        if stored.reused {
            tracing::debug!(
                document = stored.document_id,
                "content indexed concurrently, title upserted"
            );
        } else {
            tracing::info!(
                document = stored.document_id,
                chunks = stored.chunk_count,
                source = %req.source,
                "document ingested"
            );
        }
        Ok(IngestOutcome {
            document_id: stored.document_id,
            chunk_count: stored.chunk_count,
            reused: stored.reused,
        })
    }
}
