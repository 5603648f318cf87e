use std::sync::Arc;

use fwo_inventory::InventoryClient;
use fwo_store::StateStore;

/// Shared handle given to every Launch/Verify worker: the persistence layer, the
/// inventory client (for lock/unlock and power-state reads), and a plain HTTP client
/// for device-facing requests that don't go through the task-pool transport (the
/// worker drives exactly one device at a time, so a pooled `RedfishTransport` buys
/// nothing here — see DESIGN.md).
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn StateStore>,
    pub inventory: Arc<InventoryClient>,
    pub http: reqwest::Client,
    /// `scheme://host` to substitute for the `s3://` pseudo-scheme in artifact URLs.
    pub s3_endpoint: Option<String>,
}

impl WorkerContext {
    pub fn new(store: Arc<dyn StateStore>, inventory: Arc<InventoryClient>, s3_endpoint: Option<String>) -> Self {
        Self {
            store,
            inventory,
            http: reqwest::Client::new(),
            s3_endpoint,
        }
    }

    /// Rewrites `s3://bucket/path` to `{s3_endpoint}/bucket/path`; anything else passes through.
    pub fn resolve_artifact_url(&self, artifact_url: &str) -> String {
        match (artifact_url.strip_prefix("s3://"), &self.s3_endpoint) {
            (Some(rest), Some(endpoint)) => format!("{}/{}", endpoint.trim_end_matches('/'), rest),
            _ => artifact_url.to_string(),
        }
    }
}
