use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use fwo_domain::{Action, Image, Operation, Snapshot};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::StateStore;

/// Persistence against an etcd cluster's v3 HTTP/JSON gateway, selected whenever
/// `STORAGE` names anything other than `MEMORY` (see `fwo-config`'s `ETCD_HOST`/
/// `ETCD_PORT`). All requests go through the gateway's base64-encoded JSON envelope
/// rather than the native gRPC wire format.
#[derive(Debug, Clone)]
pub struct EtcdStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize, Default)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<Kv>,
}

#[derive(Debug, Deserialize)]
struct Kv {
    value: String,
}

fn prefix_range_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    for byte in end.iter_mut().rev() {
        if *byte < 0xff {
            *byte += 1;
            return end;
        }
        *byte = 0;
    }
    end.push(0);
    end
}

impl EtcdStore {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("http://{host}:{port}"),
        }
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(StoreError::BackendStatus { status, body })
        }
    }

    async fn put_raw(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let body = serde_json::json!({
            "key": STANDARD.encode(key),
            "value": STANDARD.encode(value),
        });
        let resp = self
            .client
            .post(format!("{}/v3/kv/put", self.base_url))
            .json(&body)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let body = serde_json::json!({ "key": STANDARD.encode(key) });
        let resp = self
            .client
            .post(format!("{}/v3/kv/range", self.base_url))
            .json(&body)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let parsed: RangeResponse = resp.json().await?;
        match parsed.kvs.into_iter().next() {
            Some(kv) => {
                let decoded = STANDARD
                    .decode(kv.value)
                    .map_err(|e| StoreError::Internal(e.to_string()))?;
                Ok(Some(decoded))
            }
            None => Ok(None),
        }
    }

    async fn list_raw(&self, prefix: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        let body = serde_json::json!({
            "key": STANDARD.encode(prefix),
            "range_end": STANDARD.encode(prefix_range_end(prefix)),
        });
        let resp = self
            .client
            .post(format!("{}/v3/kv/range", self.base_url))
            .json(&body)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let parsed: RangeResponse = resp.json().await?;
        parsed
            .kvs
            .into_iter()
            .map(|kv| {
                STANDARD
                    .decode(kv.value)
                    .map_err(|e| StoreError::Internal(e.to_string()))
            })
            .collect()
    }

    async fn delete_raw(&self, key: &str) -> Result<(), StoreError> {
        let body = serde_json::json!({ "key": STANDARD.encode(key) });
        let resp = self
            .client
            .post(format!("{}/v3/kv/deleterange", self.base_url))
            .json(&body)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StateStore for EtcdStore {
    async fn put_action(&self, action: &Action) -> Result<(), StoreError> {
        self.put_raw(&format!("/actions/{}", action.id), &serde_json::to_vec(action)?)
            .await
    }

    async fn get_action(&self, id: Uuid) -> Result<Option<Action>, StoreError> {
        match self.get_raw(&format!("/actions/{id}")).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_actions(&self) -> Result<Vec<Action>, StoreError> {
        self.list_raw("/actions/")
            .await?
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(StoreError::from))
            .collect()
    }

    async fn delete_action(&self, id: Uuid) -> Result<(), StoreError> {
        self.delete_raw(&format!("/actions/{id}")).await
    }

    async fn put_operation(&self, operation: &Operation) -> Result<(), StoreError> {
        self.put_raw(
            &format!("/operations/{}", operation.id),
            &serde_json::to_vec(operation)?,
        )
        .await
    }

    async fn get_operation(&self, id: Uuid) -> Result<Option<Operation>, StoreError> {
        match self.get_raw(&format!("/operations/{id}")).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_operations_for_action(&self, action_id: Uuid) -> Result<Vec<Operation>, StoreError> {
        Ok(self
            .list_operations()
            .await?
            .into_iter()
            .filter(|op| op.action_id == action_id)
            .collect())
    }

    async fn list_operations(&self) -> Result<Vec<Operation>, StoreError> {
        self.list_raw("/operations/")
            .await?
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(StoreError::from))
            .collect()
    }

    async fn delete_operation(&self, id: Uuid) -> Result<(), StoreError> {
        self.delete_raw(&format!("/operations/{id}")).await
    }

    async fn put_image(&self, image: &Image) -> Result<(), StoreError> {
        self.put_raw(&format!("/images/{}", image.id), &serde_json::to_vec(image)?)
            .await
    }

    async fn get_image(&self, id: Uuid) -> Result<Option<Image>, StoreError> {
        match self.get_raw(&format!("/images/{id}")).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_images(&self) -> Result<Vec<Image>, StoreError> {
        self.list_raw("/images/")
            .await?
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(StoreError::from))
            .collect()
    }

    async fn delete_image(&self, id: Uuid) -> Result<(), StoreError> {
        self.delete_raw(&format!("/images/{id}")).await
    }

    async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.put_raw(
            &format!("/snapshots/{}", snapshot.name),
            &serde_json::to_vec(snapshot)?,
        )
        .await
    }

    async fn get_snapshot(&self, name: &str) -> Result<Option<Snapshot>, StoreError> {
        match self.get_raw(&format!("/snapshots/{name}")).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>, StoreError> {
        self.list_raw("/snapshots/")
            .await?
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(StoreError::from))
            .collect()
    }

    async fn delete_snapshot(&self, name: &str) -> Result<(), StoreError> {
        self.delete_raw(&format!("/snapshots/{name}")).await
    }

    async fn ping(&self, token: Uuid) -> Result<(), StoreError> {
        let key = format!("/ping/{token}");
        self.put_raw(&key, b"ok").await?;
        self.get_raw(&key)
            .await?
            .ok_or_else(|| StoreError::Internal("ping key vanished".to_string()))?;
        Ok(())
    }
}
