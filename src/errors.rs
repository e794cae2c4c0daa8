use std::path::PathBuf;
use thiserror::Error;

/// KvsError: Enum to deal with error programm wide
#[derive(Debug, Error)]
pub enum KvsError {
    /// Wrapper for io errors
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be appended to the log. Nothing was committed.
    #[error("failed to write to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing location could not be created or opened
    #[error("store at {} could not be initialized: {source}", .path.display())]
    Initialization {
        path: PathBuf,
        #[source]
        source: Box<KvsError>,
    },

    /// wrapper for bincode errors
    #[error("record encoding error: {0}")]
    Codec(#[from] bincode::Error),

    /// The index points at bytes that do not decode to the expected record
    #[error("corrupt record at offset {offset}")]
    CorruptRecord { offset: u64 },

    /// A failed append could not be rolled back, the log tail is unknown
    #[error("log {} is in an unknown state after a failed write", .path.display())]
    LogPoisoned { path: PathBuf },

    /// Bad configuration value
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result<T>
pub type Result<T> = std::result::Result<T, KvsError>;
