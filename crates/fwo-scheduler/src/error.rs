use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] fwo_store::StoreError),

    #[error("domain error: {0}")]
    Domain(#[from] fwo_domain::DomainError),
}
