use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("artifact {0} not found")]
    MissingArtifact(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

pub(crate) trait IoContext<T> {
    fn at(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
