use thiserror::Error;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("inventory service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("redfish transport error: {0}")]
    Transport(#[from] fwo_transport::TransportError),

    #[error("unexpected response shape from {endpoint}: {detail}")]
    BadResponse { endpoint: String, detail: String },
}
