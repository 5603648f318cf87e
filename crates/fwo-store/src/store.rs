use async_trait::async_trait;
use fwo_domain::{Action, Image, Operation, Snapshot};
use uuid::Uuid;

use crate::error::StoreError;

/// Persistence for the four record kinds the planner and control loop operate on.
///
/// Records are addressed under flat key prefixes (`/actions/`, `/operations/`,
/// `/images/`, `/snapshots/`) regardless of backend, so swapping [`MemoryStore`] for
/// [`EtcdStore`] changes nothing about how callers address a record.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn put_action(&self, action: &Action) -> Result<(), StoreError>;
    async fn get_action(&self, id: Uuid) -> Result<Option<Action>, StoreError>;
    async fn list_actions(&self) -> Result<Vec<Action>, StoreError>;
    async fn delete_action(&self, id: Uuid) -> Result<(), StoreError>;

    async fn put_operation(&self, operation: &Operation) -> Result<(), StoreError>;
    async fn get_operation(&self, id: Uuid) -> Result<Option<Operation>, StoreError>;
    async fn list_operations_for_action(&self, action_id: Uuid) -> Result<Vec<Operation>, StoreError>;
    async fn list_operations(&self) -> Result<Vec<Operation>, StoreError>;
    async fn delete_operation(&self, id: Uuid) -> Result<(), StoreError>;

    async fn put_image(&self, image: &Image) -> Result<(), StoreError>;
    async fn get_image(&self, id: Uuid) -> Result<Option<Image>, StoreError>;
    async fn list_images(&self) -> Result<Vec<Image>, StoreError>;
    async fn delete_image(&self, id: Uuid) -> Result<(), StoreError>;

    async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
    async fn get_snapshot(&self, name: &str) -> Result<Option<Snapshot>, StoreError>;
    async fn list_snapshots(&self) -> Result<Vec<Snapshot>, StoreError>;
    async fn delete_snapshot(&self, name: &str) -> Result<(), StoreError>;

    /// `/ping/{token}`: writes a marker under a dedicated prefix then reads it back,
    /// exercising the full write/read path of the backend for health checks.
    async fn ping(&self, token: Uuid) -> Result<(), StoreError>;
}
