use std::sync::Arc;

use chrono::{DateTime, Utc};
use fwo_inventory::InventoryClient;
use fwo_planner::Planner;
use fwo_snapshot::SnapshotEngine;
use fwo_store::StateStore;
use fwo_transport::RedfishTransport;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub inventory: Arc<InventoryClient>,
    pub transport: Arc<RedfishTransport>,
    pub planner: Arc<Planner>,
    pub snapshots: Arc<SnapshotEngine>,
    pub started_at: DateTime<Utc>,
}
