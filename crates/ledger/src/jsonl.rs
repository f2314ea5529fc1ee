use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{IoContext, Result};

pub struct JsonlWriter<W> {
    writer: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> std::io::Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reads every well-formed record. A torn trailing line (crash mid-append) is skipped
/// with a warning instead of poisoning the whole file.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).at(path)?;
    let mut out = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.at(path)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => out.push(record),
            Err(err) => {
                tracing::warn!(path = %path.display(), line = idx + 1, %err, "skipping malformed jsonl record");
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        id: u32,
        name: String,
    }

    #[test]
    fn writer_terminates_records_with_newline() {
        let mut writer = JsonlWriter::new(Vec::new());
        writer
            .write_record(&Row {
                id: 1,
                name: "a".to_string(),
            })
            .unwrap();
        let buf = writer.into_inner();
        assert!(buf.ends_with(b"\n"));
        let parsed: Row = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed.id, 1);
    }

    #[test]
    fn reader_skips_torn_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        std::fs::write(&path, "{\"id\":1,\"name\":\"a\"}\n\n{\"id\":2,\"na").unwrap();
        let rows: Vec<Row> = read_jsonl(&path).unwrap();
        assert_eq!(rows.len(), 1);
        let missing: Vec<Row> = read_jsonl(&dir.path().join("none.jsonl")).unwrap();
        assert!(missing.is_empty());
    }
}
