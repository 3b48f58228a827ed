use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open cursor store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: sled::Error,
    },

    #[error("cursor store I/O error: {0}")]
    Io(#[from] sled::Error),

    #[error("corrupt cursor value for key {key}: expected 8 bytes, got {len}")]
    CorruptValue { key: String, len: usize },
}

pub type Result<T> = std::result::Result<T, StoreError>;
