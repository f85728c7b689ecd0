use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source file missing: {0}")]
    SourceMissing(PathBuf),

    #[error("archive I/O failure on {container}: {source}")]
    ArchiveIo {
        container: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest {path} line {line}: {reason}")]
    ManifestCorrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("no run identifier under {0}")]
    InvalidRunIdentifier(PathBuf),

    #[error("content store: {0}")]
    Store(String),

    #[error("filesystem watch: {0}")]
    Watch(String),
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, VaultError>;
