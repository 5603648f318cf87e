use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request to {url} timed out after {attempts} attempt(s)")]
    Timeout { url: String, attempts: u32 },

    #[error("failed to build HTTPS client: {0}")]
    BuildClient(reqwest::Error),

    #[error("transport is not ready; CA bundle has not been installed yet")]
    NotReady,

    #[error("response body was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}
