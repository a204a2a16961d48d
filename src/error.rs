use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("run not found: {0}")]
    NotFound(String),

    #[error("run id already exists: {0}")]
    DuplicateId(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("no logs available for {0}")]
    NoLogs(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
