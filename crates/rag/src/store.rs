use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use bytemuck::cast_slice;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use lodestar_core::{check_span, cosine_similarity};

/// What the backing database can do. Probed once at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub vector: bool,
    pub lexical: bool,
}

#[derive(Clone)]
pub struct RagStore {
    path: PathBuf,
    capabilities: StoreCapabilities,
}

impl RagStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut store = Self {
            path: path.as_ref().to_path_buf(),
            capabilities: StoreCapabilities {
                vector: true,
                lexical: false,
            },
        };
        store.init()?;
        Ok(store)
    }

    /// Overrides the probed capabilities, e.g. to run without a dense index.
    pub fn with_capabilities(mut self, capabilities: StoreCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn init(&mut self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                content_hash TEXT NOT NULL UNIQUE,
                title TEXT,
                mime TEXT,
                owner_id TEXT,
                char_len INTEGER NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL,
                chunk_index INTEGER NOT NULL,
                content_id TEXT NOT NULL,
                text TEXT NOT NULL,
                span_start INTEGER NOT NULL,
                span_end INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                embedding_model TEXT NOT NULL,
                lang TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(document_id, chunk_index),
                FOREIGN KEY(document_id) REFERENCES documents(id)
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id);
            "#,
        )?;
        let fts = conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                text,
                content='chunks',
                content_rowid='id'
            );
            CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, text) VALUES (new.id, new.text);
            END;
            CREATE TRIGGER IF NOT EXISTS chunks_fts_delete BEFORE DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES ('delete', old.id, old.text);
            END;
            "#,
        );
        match fts {
            Ok(()) => self.capabilities.lexical = true,
            Err(err) => {
                tracing::warn!(%err, "fts5 unavailable, lexical ranking disabled");
                self.capabilities.lexical = false;
            }
        }
        Ok(())
    }

    pub fn find_document_by_hash(&self, content_hash: &str) -> Result<Option<DocumentRow>> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                r#"
                SELECT documents.id, documents.source, documents.content_hash, documents.title,
                       documents.mime, documents.owner_id, documents.char_len,
                       (SELECT COUNT(*) FROM chunks WHERE chunks.document_id = documents.id)
                FROM documents
                WHERE documents.content_hash = ?1
                "#,
                [content_hash],
                document_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn update_title(&self, document_id: i64, title: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE documents SET title = ?1 WHERE id = ?2",
            params![title, document_id],
        )?;
        Ok(())
    }

    /// Upserts the document and writes every chunk in one transaction. Nothing is kept
    /// if any chunk fails validation or insertion. When the content already has chunks
    /// (e.g. a concurrent ingest of the same bytes committed first) only the title is
    /// upserted and the existing chunks are reported.
    pub fn insert_document_with_chunks(
        &self,
        doc: &DocumentInsert,
        chunks: &[ChunkInsert],
    ) -> Result<StoredDocument> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            r#"
            INSERT INTO documents (source, content_hash, title, mime, owner_id, char_len)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(content_hash) DO UPDATE SET title = COALESCE(excluded.title, documents.title)
            "#,
            params![
                doc.source,
                doc.content_hash,
                doc.title,
                doc.mime,
                doc.owner_id,
                doc.char_len as i64
            ],
        )?;
        let document_id: i64 = tx.query_row(
            "SELECT id FROM documents WHERE content_hash = ?1",
            [&doc.content_hash],
            |row| row.get(0),
        )?;
        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
            [document_id],
            |row| row.get(0),
        )?;
        if existing > 0 {
            tx.commit()?;
            return Ok(StoredDocument {
                document_id,
                chunk_count: existing as usize,
                reused: true,
            });
        }
        for chunk in chunks {
            check_span(&chunk.span, doc.char_len)
                .with_context(|| format!("chunk {} rejected", chunk.chunk_index))?;
            let embedding_blob = cast_slice::<f32, u8>(&chunk.embedding);
            tx.execute(
                r#"
                INSERT INTO chunks (document_id, chunk_index, content_id, text, span_start, span_end,
                                    embedding, embedding_model, lang)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    document_id,
                    chunk.chunk_index as i64,
                    chunk.content_id,
                    chunk.text,
                    chunk.span.start as i64,
                    chunk.span.end as i64,
                    embedding_blob,
                    chunk.embedding_model,
                    chunk.lang
                ],
            )?;
        }
        tx.commit()?;
        Ok(StoredDocument {
            document_id,
            chunk_count: chunks.len(),
            reused: false,
        })
    }

    /// (documents, chunks) row counts.
    pub fn counts(&self) -> Result<(usize, usize)> {
        let conn = self.connection()?;
        let documents: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        let chunks: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        Ok((documents as usize, chunks as usize))
    }

    /// Exact cosine scan over chunks embedded with `embedding_model`, best first.
    pub fn search_vector(
        &self,
        query_embedding: &[f32],
        embedding_model: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<RankedChunk>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT chunks.id, chunks.document_id, documents.source, chunks.text,
                   chunks.span_start, chunks.span_end, chunks.embedding
            FROM chunks
            JOIN documents ON chunks.document_id = documents.id
            WHERE chunks.embedding_model = ?1
              AND (?2 IS NULL OR documents.id = ?2)
              AND (?3 IS NULL OR documents.owner_id = ?3)
              AND (?4 IS NULL OR documents.mime = ?4)
            "#,
        )?;
        let mut rows = stmt.query(params![
            embedding_model,
            filters.document_id,
            filters.owner_id,
            filters.mime
        ])?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let embedding_blob: Vec<u8> = row.get(6)?;
            if embedding_blob.len() % std::mem::size_of::<f32>() != 0 {
                return Err(anyhow!("invalid embedding blob"));
            }
            let embedding: Vec<f32> = bytemuck::pod_collect_to_vec(&embedding_blob);
            let mut hit = ranked_from_row(row)?;
            hit.score = cosine_similarity(query_embedding, &embedding)
                .with_context(|| format!("chunk {} has a stale embedding", hit.chunk_id))?;
            hits.push(hit);
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit);
        assign_ranks(&mut hits);
        Ok(hits)
    }

    /// FTS5 bm25 ranking; any query term may match.
    pub fn search_lexical(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<RankedChunk>> {
        if !self.capabilities.lexical {
            return Err(anyhow!("lexical index unavailable"));
        }
        let Some(expression) = fts_expression(query) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT chunks.id, chunks.document_id, documents.source, chunks.text,
                   chunks.span_start, chunks.span_end, bm25(chunks_fts) AS score
            FROM chunks_fts
            JOIN chunks ON chunks.id = chunks_fts.rowid
            JOIN documents ON chunks.document_id = documents.id
            WHERE chunks_fts MATCH ?1
              AND (?2 IS NULL OR documents.id = ?2)
              AND (?3 IS NULL OR documents.owner_id = ?3)
              AND (?4 IS NULL OR documents.mime = ?4)
            ORDER BY score, chunks.id
            LIMIT ?5
            "#,
        )?;
        let mut rows = stmt.query(params![
            expression,
            filters.document_id,
            filters.owner_id,
            filters.mime,
            limit as i64
        ])?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let mut hit = ranked_from_row(row)?;
            let bm25: f64 = row.get(6)?;
            // bm25() is lower-is-better; flip so every ranker reports higher-is-better.
            hit.score = -bm25 as f32;
            hits.push(hit);
        }
        assign_ranks(&mut hits);
        Ok(hits)
    }
}

#[derive(Debug, Clone)]
pub struct DocumentInsert {
    pub source: String,
    pub content_hash: String,
    pub title: Option<String>,
    pub mime: Option<String>,
    pub owner_id: Option<String>,
    pub char_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredDocument {
    pub document_id: i64,
    pub chunk_count: usize,
    pub reused: bool,
}

#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: i64,
    pub source: String,
    pub content_hash: String,
    pub title: Option<String>,
    pub mime: Option<String>,
    pub owner_id: Option<String>,
    pub char_len: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkInsert {
    pub chunk_index: usize,
    pub content_id: String,
    pub text: String,
    pub span: Range<usize>,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub lang: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub document_id: Option<i64>,
    pub owner_id: Option<String>,
    pub mime: Option<String>,
}

/// One entry of a single ranker's list. `rank` is 1-based.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk_id: i64,
    pub document_id: i64,
    pub document_source: String,
    pub text: String,
    pub span: Range<usize>,
    pub rank: usize,
    pub score: f32,
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        source: row.get(1)?,
        content_hash: row.get(2)?,
        title: row.get(3)?,
        mime: row.get(4)?,
        owner_id: row.get(5)?,
        char_len: row.get::<_, i64>(6)? as usize,
        chunk_count: row.get::<_, i64>(7)? as usize,
    })
}

fn ranked_from_row(row: &Row<'_>) -> rusqlite::Result<RankedChunk> {
    Ok(RankedChunk {
        chunk_id: row.get(0)?,
        document_id: row.get(1)?,
        document_source: row.get(2)?,
        text: row.get(3)?,
        span: row.get::<_, i64>(4)? as usize..row.get::<_, i64>(5)? as usize,
        rank: 0,
        score: 0.0,
    })
}

fn assign_ranks(hits: &mut [RankedChunk]) {
    for (idx, hit) in hits.iter_mut().enumerate() {
        hit.rank = idx + 1;
    }
}

/// Quotes each term so FTS5 operators in user text are inert.
fn fts_expression(query: &str) -> Option<String> {
    let terms = lodestar_core::query_terms(query);
    if terms.is_empty() {
        return None;
    }
    let mut seen = std::collections::HashSet::new();
    let quoted: Vec<String> = terms
        .into_iter()
        .filter(|term| seen.insert(term.clone()))
        .map(|term| format!("\"{term}\""))
        .collect();
    Some(quoted.join(" OR "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_expression_quotes_and_dedups() {
        assert_eq!(
            fts_expression("rent OR rent* NEAR(x)").as_deref(),
            Some("\"rent\" OR \"or\" OR \"near\" OR \"x\"")
        );
        assert_eq!(fts_expression("  ?? "), None);
    }
}
