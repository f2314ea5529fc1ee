use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use glob::Pattern;
use walkdir::WalkDir;

use lodestar_core::ChunkConfig;
use lodestar_engine::{DrainReport, EngineConfig, IngestWorker};
use lodestar_ledger::JobQueue;
use lodestar_rag::{Embed, IngestRequest, Indexer, RagStore};

pub async fn run<E: Embed>(
    config: &EngineConfig,
    embedder: E,
    input: &str,
    pattern: &str,
    owner: Option<String>,
) -> Result<DrainReport> {
    let input_path = PathBuf::from(input);
    if !input_path.exists() {
        return Err(anyhow!(format!(
            "input path {} does not exist",
            input_path.display()
        )));
    }
    fs::create_dir_all(&config.data_dir)?;
    let store = RagStore::open(config.rag_path())?;
    let indexer = Indexer::new(
        store,
        embedder,
        ChunkConfig {
            max_chars: config.retrieval.chunk_chars,
        },
    );
    let worker = IngestWorker::new(
        indexer,
        JobQueue::new(config.ingest.max_attempts),
        Duration::from_millis(config.ingest.base_backoff_ms),
    );

    let files = discover_files(&input_path, pattern)?;
    if files.is_empty() {
        tracing::info!(pattern, root = %input_path.display(), "no documents matched");
        return Ok(DrainReport::default());
    }
    tracing::info!(files = files.len(), root = %input_path.display(), "discovered files");
    for path in files {
        let raw_text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable file");
                continue;
            }
        };
        let request = IngestRequest {
            source: path.to_string_lossy().replace('\\', "/"),
            title: path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned()),
            mime: Some(mime_for(&path).to_string()),
            owner_id: owner.clone(),
            raw_text,
            embedding_model: None,
        };
        if !worker.submit(request) {
            tracing::debug!(path = %path.display(), "duplicate submission ignored");
        }
    }
    let report = worker.drain().await;
    for job in worker.queue().dead_letters() {
        tracing::warn!(source = %job.payload.source, attempts = job.attempts, "gave up on document");
    }
    Ok(report)
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .as_deref()
    {
        Some("md") | Some("markdown") => "text/markdown",
        Some("rst") => "text/x-rst",
        Some("html") | Some("htm") => "text/html",
        _ => "text/plain",
    }
}

fn discover_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let patterns = build_patterns(pattern)?;
    let mut files = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or_else(|_| entry.path());
        let rel_norm = rel.to_string_lossy().replace('\\', "/").to_lowercase();
        if !patterns.is_empty() && !patterns.iter().any(|pat| pat.matches(&rel_norm)) {
            continue;
        }
        files.push(entry.path().to_path_buf());
    }
    files.sort();
    Ok(files)
}

fn build_patterns(pattern: &str) -> Result<Vec<Pattern>> {
    let mut patterns = Vec::new();
    for raw in pattern.split(',') {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let normalized = if trimmed.contains('/') {
            trimmed.to_lowercase()
        } else {
            format!("**/{}", trimmed.to_lowercase())
        };
        patterns.push(Pattern::new(&normalized).map_err(|e| anyhow!(e.msg))?);
    }
    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestar_rag::EmbeddingClient;
    use tempfile::tempdir;

    #[test]
    fn build_patterns_expands_simple_globs() {
        let patterns = build_patterns("*.txt,sub/*.md").unwrap();
        let rendered: Vec<&str> = patterns.iter().map(|p| p.as_str()).collect();
        assert!(rendered.contains(&"**/*.txt"));
        assert!(rendered.contains(&"sub/*.md"));
    }

    #[test]
    fn discover_files_filters_and_sorts() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("nested/a.md"), "a").unwrap();
        fs::write(dir.path().join("image.png"), "x").unwrap();
        let files = discover_files(dir.path(), "*.txt,*.md").unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("b.txt"));
        assert!(files[1].ends_with("nested/a.md"));
    }

    #[tokio::test]
    async fn ingests_a_directory_once() {
        let dir = tempdir().unwrap();
        let docs = dir.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("one.md"), "# Tides\nThe Moon drives tides.").unwrap();
        fs::write(docs.join("two.txt"), "Neutron stars are dense.").unwrap();
        let config = EngineConfig {
            data_dir: dir.path().join("data"),
            ..EngineConfig::default()
        };
        let input = docs.to_string_lossy().into_owned();
        let report = run(&config, EmbeddingClient::hash(), &input, "*.md,*.txt", None)
            .await
            .unwrap();
        assert_eq!(report.ingested, 2);

        let again = run(&config, EmbeddingClient::hash(), &input, "*.md,*.txt", None)
            .await
            .unwrap();
        assert!(again.outcomes.iter().all(|outcome| outcome.reused));
        let store = RagStore::open(config.rag_path()).unwrap();
        assert_eq!(store.counts().unwrap(), (2, 2));
    }
}
