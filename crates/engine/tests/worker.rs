use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use lodestar_core::ChunkConfig;
use lodestar_engine::IngestWorker;
use lodestar_ledger::JobQueue;
use lodestar_rag::{Embed, EmbeddingClient, IngestRequest, Indexer, RagStore};

/// Fails the first `failures` embedding calls, then behaves like the hash backend.
#[derive(Clone)]
struct FailsFirst {
    inner: EmbeddingClient,
    remaining: Arc<AtomicUsize>,
}

impl Embed for FailsFirst {
    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    async fn embed_batch(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining.store(left - 1, Ordering::SeqCst);
            return Err(anyhow!("embedding service unavailable"));
        }
        self.inner.embed_batch(model, inputs).await
    }
}

fn worker(dir: &tempfile::TempDir, failures: usize) -> (IngestWorker<FailsFirst>, RagStore) {
    let store = RagStore::open(dir.path().join("rag.sqlite")).unwrap();
    let embedder = FailsFirst {
        inner: EmbeddingClient::hash(),
        remaining: Arc::new(AtomicUsize::new(failures)),
    };
    let indexer = Indexer::new(store.clone(), embedder, ChunkConfig::default());
    let worker = IngestWorker::new(indexer, JobQueue::new(3), Duration::from_millis(1));
    (worker, store)
}

fn request(source: &str, text: &str) -> IngestRequest {
    IngestRequest {
        source: source.to_string(),
        title: None,
        mime: Some("text/plain".to_string()),
        owner_id: None,
        raw_text: text.to_string(),
        embedding_model: None,
    }
}

#[tokio::test]
async fn duplicate_submissions_are_ingested_once() {
    let dir = tempfile::tempdir().unwrap();
    let (worker, store) = worker(&dir, 0);
    assert!(worker.submit(request("a.txt", "first body")));
    assert!(!worker.submit(request("a.txt", "first body")));
    assert!(worker.submit(request("b.txt", "second body")));
    assert_eq!(worker.queue().len(), 2);

    let report = worker.drain().await;
    assert_eq!(report.ingested, 2);
    assert_eq!(report.retried, 0);
    assert_eq!(store.counts().unwrap(), (2, 2));
}

#[tokio::test]
async fn transient_failure_is_retried_to_success() {
    let dir = tempfile::tempdir().unwrap();
    let (worker, store) = worker(&dir, 1);
    worker.submit(request("a.txt", "flaky body"));
    let report = worker.drain().await;
    assert_eq!(report.retried, 1);
    assert_eq!(report.ingested, 1);
    assert_eq!(report.exhausted, 0);
    assert_eq!(store.counts().unwrap(), (1, 1));
}

#[tokio::test]
async fn persistent_failure_is_dead_lettered() {
    let dir = tempfile::tempdir().unwrap();
    let (worker, store) = worker(&dir, usize::MAX);
    worker.submit(request("a.txt", "never lands"));
    let report = worker.drain().await;
    // attempts 0 and 1 are retried; the third failure hits the ceiling of 3
    assert_eq!(report.retried, 2);
    assert_eq!(report.exhausted, 1);
    assert_eq!(report.ingested, 0);
    assert!(worker.queue().is_empty());
    let dead = worker.queue().dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 2);
    assert_eq!(store.counts().unwrap(), (0, 0));
}
