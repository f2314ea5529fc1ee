use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use lodestar_core::{content_hash_bytes, short_id};
use serde::{Deserialize, Serialize};

use crate::error::{IoContext, LedgerError, Result};
use crate::jsonl::{read_jsonl, JsonlWriter};

/// Handle to a stored artifact. `lineage` lists the ids that produced it, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: String,
    pub content_hash: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub path: PathBuf,
    #[serde(default)]
    pub lineage: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LineageRecord {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    lineage: Vec<String>,
}

/// Content-addressed blob store on the local filesystem.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let objects = root.join("objects");
        fs::create_dir_all(&objects).at(&objects)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn save(&self, kind: &str, data: &[u8], lineage: &[String]) -> Result<ArtifactRef> {
        let content_hash = content_hash_bytes(data);
        let id = short_id(&content_hash);
        let kind = sanitize_kind(kind);
        let path = self.object_path(&id, &kind);
        if !path.exists() {
            fs::write(&path, data).at(&path)?;
            tracing::debug!(artifact = %id, kind = %kind, bytes = data.len(), "stored artifact");
        }
        self.append_lineage(&LineageRecord {
            id: id.clone(),
            kind: kind.clone(),
            lineage: lineage.to_vec(),
        })?;
        Ok(ArtifactRef {
            id,
            content_hash,
            kind,
            path,
            lineage: lineage.to_vec(),
        })
    }

    pub fn save_text(&self, kind: &str, text: &str, lineage: &[String]) -> Result<ArtifactRef> {
        self.save(kind, text.as_bytes(), lineage)
    }

    pub fn load(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        let path = self.object_path(&artifact.id, &artifact.kind);
        if !path.exists() {
            return Err(LedgerError::MissingArtifact(artifact.id.clone()));
        }
        fs::read(&path).at(&path)
    }

    /// Number of distinct stored objects.
    pub fn count(&self) -> Result<usize> {
        let objects = self.root.join("objects");
        let entries = fs::read_dir(&objects).at(&objects)?;
        let mut count = 0usize;
        for entry in entries {
            if entry.at(&objects)?.path().is_file() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Lineage recorded for `id` on its most recent save.
    pub fn lineage_of(&self, id: &str) -> Result<Option<Vec<String>>> {
        let records: Vec<LineageRecord> = read_jsonl(&self.lineage_path())?;
        Ok(records
            .into_iter()
            .rev()
            .find(|record| record.id == id)
            .map(|record| record.lineage))
    }

    fn object_path(&self, id: &str, kind: &str) -> PathBuf {
        self.root.join("objects").join(format!("{id}.{kind}"))
    }

    fn lineage_path(&self) -> PathBuf {
        self.root.join("lineage.jsonl")
    }

    fn append_lineage(&self, record: &LineageRecord) -> Result<()> {
        let path = self.lineage_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .at(&path)?;
        JsonlWriter::new(file).write_record(record).at(&path)
    }
}

fn sanitize_kind(kind: &str) -> String {
    let cleaned: String = kind
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        "bin".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_sanitized() {
        assert_eq!(sanitize_kind("Draft/../x"), "draftx");
        assert_eq!(sanitize_kind("  "), "bin");
        assert_eq!(sanitize_kind("refine_out"), "refine_out");
    }
}
