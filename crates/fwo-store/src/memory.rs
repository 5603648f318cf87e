use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fwo_domain::{Action, Image, Operation, Snapshot};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::StateStore;

#[derive(Debug, Default)]
struct Inner {
    actions: HashMap<Uuid, Action>,
    operations: HashMap<Uuid, Operation>,
    images: HashMap<Uuid, Image>,
    snapshots: HashMap<String, Snapshot>,
    pings: HashMap<Uuid, ()>,
}

/// In-memory implementation of [`StateStore`], selected by `STORAGE=MEMORY`.
///
/// All data is lost on process exit; intended for single-instance deployments and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn put_action(&self, action: &Action) -> Result<(), StoreError> {
        self.inner.write().await.actions.insert(action.id, action.clone());
        Ok(())
    }

    async fn get_action(&self, id: Uuid) -> Result<Option<Action>, StoreError> {
        Ok(self.inner.read().await.actions.get(&id).cloned())
    }

    async fn list_actions(&self) -> Result<Vec<Action>, StoreError> {
        Ok(self.inner.read().await.actions.values().cloned().collect())
    }

    async fn delete_action(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.write().await.actions.remove(&id);
        Ok(())
    }

    async fn put_operation(&self, operation: &Operation) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .operations
            .insert(operation.id, operation.clone());
        Ok(())
    }

    async fn get_operation(&self, id: Uuid) -> Result<Option<Operation>, StoreError> {
        Ok(self.inner.read().await.operations.get(&id).cloned())
    }

    async fn list_operations_for_action(&self, action_id: Uuid) -> Result<Vec<Operation>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .operations
            .values()
            .filter(|op| op.action_id == action_id)
            .cloned()
            .collect())
    }

    async fn list_operations(&self) -> Result<Vec<Operation>, StoreError> {
        Ok(self.inner.read().await.operations.values().cloned().collect())
    }

    async fn delete_operation(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.write().await.operations.remove(&id);
        Ok(())
    }

    async fn put_image(&self, image: &Image) -> Result<(), StoreError> {
        self.inner.write().await.images.insert(image.id, image.clone());
        Ok(())
    }

    async fn get_image(&self, id: Uuid) -> Result<Option<Image>, StoreError> {
        Ok(self.inner.read().await.images.get(&id).cloned())
    }

    async fn list_images(&self) -> Result<Vec<Image>, StoreError> {
        Ok(self.inner.read().await.images.values().cloned().collect())
    }

    async fn delete_image(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.write().await.images.remove(&id);
        Ok(())
    }

    async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .snapshots
            .insert(snapshot.name.clone(), snapshot.clone());
        Ok(())
    }

    async fn get_snapshot(&self, name: &str) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.inner.read().await.snapshots.get(name).cloned())
    }

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>, StoreError> {
        Ok(self.inner.read().await.snapshots.values().cloned().collect())
    }

    async fn delete_snapshot(&self, name: &str) -> Result<(), StoreError> {
        self.inner.write().await.snapshots.remove(name);
        Ok(())
    }

    async fn ping(&self, token: Uuid) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.pings.insert(token, ());
        guard
            .pings
            .get(&token)
            .copied()
            .ok_or_else(|| StoreError::Internal("ping marker vanished".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwo_domain::ActionParameters;

    #[tokio::test]
    async fn put_and_get_action() {
        let store = MemoryStore::new();
        let action = Action::new(ActionParameters::default());
        store.put_action(&action).await.unwrap();

        let got = store.get_action(action.id).await.unwrap();
        assert_eq!(got.unwrap().id, action.id);
    }

    #[tokio::test]
    async fn list_operations_for_action_filters() {
        let store = MemoryStore::new();
        let action_id = Uuid::new_v4();
        let other_action_id = Uuid::new_v4();
        let op1 = Operation::new(action_id, "x0", "BMC");
        let op2 = Operation::new(other_action_id, "x1", "BMC");
        store.put_operation(&op1).await.unwrap();
        store.put_operation(&op2).await.unwrap();

        let for_action = store.list_operations_for_action(action_id).await.unwrap();
        assert_eq!(for_action.len(), 1);
        assert_eq!(for_action[0].id, op1.id);
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let store = MemoryStore::new();
        let snap = Snapshot::new("s1", ActionParameters::default(), None);
        store.put_snapshot(&snap).await.unwrap();

        assert!(store.get_snapshot("s1").await.unwrap().is_some());
        store.delete_snapshot("s1").await.unwrap();
        assert!(store.get_snapshot("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ping_roundtrips() {
        let store = MemoryStore::new();
        store.ping(Uuid::new_v4()).await.unwrap();
    }
}
