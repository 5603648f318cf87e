use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend request failed: {0}")]
    Backend(#[from] reqwest::Error),

    #[error("backend returned unexpected status {status}: {body}")]
    BackendStatus { status: u16, body: String },

    #[error("internal store error: {0}")]
    Internal(String),
}
