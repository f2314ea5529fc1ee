use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job<P> {
    /// Idempotency key supplied by the caller.
    pub id: String,
    pub payload: P,
    pub attempts: u32,
}

#[derive(Debug)]
pub enum RetryOutcome {
    /// The copy lands at the back of the queue once the handle completes.
    Scheduled(JoinHandle<()>),
    Exhausted,
}

struct QueueState<P> {
    seen: HashSet<String>,
    pending: VecDeque<Job<P>>,
    dead: Vec<Job<P>>,
}

/// In-memory idempotent FIFO with delayed retries. Cloning yields another handle to the
/// same queue; there is no process-global instance.
pub struct JobQueue<P> {
    state: Arc<Mutex<QueueState<P>>>,
    max_attempts: u32,
}

impl<P> Clone for JobQueue<P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            max_attempts: self.max_attempts,
        }
    }
}

impl<P: Clone + Send + 'static> Default for JobQueue<P> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl<P: Clone + Send + 'static> JobQueue<P> {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                seen: HashSet::new(),
                pending: VecDeque::new(),
                dead: Vec::new(),
            })),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns false when the key was already seen during this queue's lifetime.
    pub fn enqueue(&self, key: impl Into<String>, payload: P) -> bool {
        let key = key.into();
        let mut state = self.state.lock();
        if !state.seen.insert(key.clone()) {
            tracing::debug!(job = %key, "duplicate idempotency key ignored");
            return false;
        }
        state.pending.push_back(Job {
            id: key,
            payload,
            attempts: 0,
        });
        true
    }

    pub fn next(&self) -> Option<Job<P>> {
        self.state.lock().pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-enqueues a copy with `attempts + 1` after `backoff` while that stays below the
    /// ceiling. Otherwise the job is dropped and kept only in the dead-letter list.
    /// Must be called from within a tokio runtime.
    pub fn retry(&self, job: Job<P>, backoff: Duration) -> RetryOutcome {
        let attempts = job.attempts + 1;
        if attempts >= self.max_attempts {
            tracing::warn!(job = %job.id, attempts, "job exhausted its retries, dropping");
            self.state.lock().dead.push(job);
            return RetryOutcome::Exhausted;
        }
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            state.lock().pending.push_back(Job {
                attempts,
                ..job
            });
        });
        RetryOutcome::Scheduled(handle)
    }

    pub fn dead_letters(&self) -> Vec<Job<P>> {
        self.state.lock().dead.clone()
    }
}
