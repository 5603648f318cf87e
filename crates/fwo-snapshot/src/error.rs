use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot '{0}' already exists")]
    Conflict(String),

    #[error("snapshot '{0}' not found")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] fwo_store::StoreError),

    #[error("domain error: {0}")]
    Domain(#[from] fwo_domain::DomainError),

    #[error("inventory error: {0}")]
    Inventory(#[from] fwo_inventory::InventoryError),
}
