use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to open or create index at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: tantivy::TantivyError,
    },

    #[error("index write error: {0}")]
    Write(#[from] tantivy::TantivyError),

    #[error("query construction error: {0}")]
    Query(String),

    #[error("document payload was not valid JSON, skipped")]
    MalformedPayload,
}

pub type Result<T> = std::result::Result<T, IndexError>;
