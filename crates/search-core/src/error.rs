use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("host RPC failed: {0}")]
    HostRpc(String),

    #[error("cursor store error: {0}")]
    Store(String),

    #[error("full-text index error: {0}")]
    Index(String),

    #[error("invalid search request: {0}")]
    InvalidRequest(String),

    #[error("federated fan-out failed: {0}")]
    Federation(String),

    #[error("deadline exceeded after {ms}ms")]
    DeadlineExceeded { ms: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Short error code sent to HTTP clients in the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::Config(_) => "CONFIG_ERROR",
            SearchError::HostRpc(_) => "HOST_RPC_ERROR",
            SearchError::Store(_) => "STORE_ERROR",
            SearchError::Index(_) => "INDEX_ERROR",
            SearchError::InvalidRequest(_) => "INVALID_REQUEST",
            SearchError::Federation(_) => "FEDERATION_ERROR",
            SearchError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            SearchError::Serialization(_) => "SERIALIZATION_ERROR",
            SearchError::Io(_) => "IO_ERROR",
            SearchError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status this error should surface as.
    pub fn status_code(&self) -> u16 {
        match self {
            SearchError::InvalidRequest(_) => 400,
            SearchError::DeadlineExceeded { .. } => 504,
            SearchError::HostRpc(_) | SearchError::Federation(_) => 502,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
