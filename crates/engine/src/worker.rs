use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use lodestar_ledger::{JobQueue, RetryOutcome};
use lodestar_rag::{Embed, IngestOutcome, IngestRequest, Indexer};

#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    pub ingested: usize,
    pub retried: usize,
    pub exhausted: usize,
    pub outcomes: Vec<IngestOutcome>,
}

/// Drains a queue of ingest requests, retrying failures with exponential backoff.
pub struct IngestWorker<E> {
    indexer: Indexer<E>,
    queue: JobQueue<IngestRequest>,
    base_backoff: Duration,
}

impl<E: Embed> IngestWorker<E> {
    pub fn new(indexer: Indexer<E>, queue: JobQueue<IngestRequest>, base_backoff: Duration) -> Self {
        Self {
            indexer,
            queue,
            base_backoff,
        }
    }

    pub fn queue(&self) -> &JobQueue<IngestRequest> {
        &self.queue
    }

    /// False when an identical request was already submitted to this queue.
    pub fn submit(&self, request: IngestRequest) -> bool {
        let key = request.idempotency_key();
        self.queue.enqueue(key, request)
    }

    pub fn backoff_for(&self, attempts: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempts))
    }

    /// Runs until the queue is empty and no retry is still waiting on its delay.
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        let mut waiting: Vec<JoinHandle<()>> = Vec::new();
        loop {
            while let Some(job) = self.queue.next() {
                match self.indexer.ingest_document(&job.payload).await {
                    Ok(outcome) => {
                        report.ingested += 1;
                        report.outcomes.push(outcome);
                    }
                    Err(err) => {
                        let backoff = self.backoff_for(job.attempts);
                        tracing::warn!(
                            job = %job.id,
                            attempts = job.attempts,
                            error = %err,
                            "ingest failed"
                        );
                        match self.queue.retry(job, backoff) {
                            RetryOutcome::Scheduled(handle) => {
                                report.retried += 1;
                                waiting.push(handle);
                            }
                            RetryOutcome::Exhausted => report.exhausted += 1,
                        }
                    }
                }
            }
            if waiting.is_empty() {
                break;
            }
            for handle in waiting.drain(..) {
                if let Err(err) = handle.await {
                    tracing::warn!(error = %err, "retry task did not complete");
                }
            }
        }
        tracing::info!(
            ingested = report.ingested,
            retried = report.retried,
            exhausted = report.exhausted,
            "ingest queue drained"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestar_core::ChunkConfig;
    use lodestar_rag::{EmbeddingClient, RagStore};

    #[test]
    fn backoff_doubles_per_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let store = RagStore::open(dir.path().join("rag.sqlite")).unwrap();
        let worker = IngestWorker::new(
            Indexer::new(store, EmbeddingClient::hash(), ChunkConfig::default()),
            JobQueue::default(),
            Duration::from_millis(100),
        );
        assert_eq!(worker.backoff_for(0), Duration::from_millis(100));
        assert_eq!(worker.backoff_for(1), Duration::from_millis(200));
        assert_eq!(worker.backoff_for(3), Duration::from_millis(800));
    }
}
