mod artifacts;
mod error;
mod jobs;
mod jsonl;
mod memory;

pub use artifacts::{ArtifactRef, ArtifactStore};
pub use error::{LedgerError, Result};
pub use jobs::{Job, JobQueue, RetryOutcome, DEFAULT_MAX_ATTEMPTS};
pub use jsonl::{read_jsonl, JsonlWriter};
pub use memory::{AnswerMode, MemoryEntry, MemoryLog, MAX_SESSION_ENTRIES};
