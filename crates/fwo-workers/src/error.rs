use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] fwo_store::StoreError),

    #[error("domain error: {0}")]
    Domain(#[from] fwo_domain::DomainError),

    #[error("inventory error: {0}")]
    Inventory(#[from] fwo_inventory::InventoryError),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unsupported manufacturer: {0}")]
    UnsupportedManufacturer(String),

    #[error("malformed vendor response: {0}")]
    MalformedResponse(String),
}
