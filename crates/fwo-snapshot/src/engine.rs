use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fwo_domain::{
    Action, ActionParameters, Command, Operation, Snapshot, SnapshotDevice, SnapshotTarget,
    StateComponentFilter, TargetVersion, VersionSelection,
};
use fwo_inventory::InventoryClient;
use fwo_planner::{build_candidate, compatible_images, link_sibling_blocks, select_source_image};
use fwo_store::StateStore;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SnapshotError;

/// Capture and restore of firmware state across a device set (§4.8). Shares the
/// Planner's component-resolution and image-matching logic rather than reimplementing it.
pub struct SnapshotEngine {
    store: Arc<dyn StateStore>,
    inventory: Arc<InventoryClient>,
    node_blacklist: Vec<String>,
}

impl SnapshotEngine {
    pub fn new(store: Arc<dyn StateStore>, inventory: Arc<InventoryClient>, node_blacklist: Vec<String>) -> Self {
        Self {
            store,
            inventory,
            node_blacklist,
        }
    }

    /// `Create(params)`: rejects a duplicate name, persists a `ready = false` snapshot, then
    /// populates it in the background. Returns once the placeholder is persisted — population
    /// is asynchronous, matching `go BuildSnapshot(snapshot)` in the original. Requires an
    /// `Arc<SnapshotEngine>` handle since population outlives this call.
    pub async fn create(
        self: &Arc<Self>,
        name: impl Into<String>,
        parameters: ActionParameters,
        expiration_time: Option<DateTime<Utc>>,
    ) -> Result<(), SnapshotError> {
        let name = name.into();
        if self.store.get_snapshot(&name).await?.is_some() {
            return Err(SnapshotError::Conflict(name));
        }

        let snapshot = Snapshot::new(name, parameters, expiration_time);
        self.store.put_snapshot(&snapshot).await?;

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.populate(snapshot).await {
                tracing::error!(error = %err, "snapshot population failed");
            }
        });
        Ok(())
    }

    /// Resolves components (Planner steps 1-4), probes each target's current firmware
    /// version, best-effort resolves an `imageId` per target, then finalizes the snapshot.
    async fn populate(&self, mut snapshot: Snapshot) -> Result<(), SnapshotError> {
        let mut devices = self.inventory.enumerate(&snapshot.parameters.state_component_filter).await?;
        devices.retain(|xname, device| {
            let blacklisted = self.node_blacklist.iter().any(|role| role == &device.device_type);
            if blacklisted {
                debug!(xname, "dropped by node blacklist");
            }
            !blacklisted
        });
        self.inventory.fill_endpoints(&mut devices).await;
        self.inventory.fill_update_service(&mut devices).await;
        self.inventory.fill_model_manufacturer(&mut devices).await;

        for device in devices.values() {
            for err in &device.errors {
                snapshot.push_error(err.clone());
            }
        }

        let targets = self.inventory.enumerate_targets(&devices).await;
        let targets: Vec<TargetVersion> = targets
            .into_iter()
            .filter(|t| snapshot.parameters.target_filter.matches(&t.target, &t.target_name))
            .collect();

        let images = self.store.list_images().await?;
        let mut by_xname: HashMap<String, Vec<SnapshotTarget>> = HashMap::new();
        for target in &targets {
            let Some(device) = devices.get(&target.xname) else {
                continue;
            };
            if let Some(manufacturer) = &snapshot.parameters.inventory_hardware_filter.manufacturer {
                if device.manufacturer.as_deref() != Some(manufacturer.as_str()) {
                    continue;
                }
            }
            if let Some(model) = &snapshot.parameters.inventory_hardware_filter.model {
                if device.model.as_deref() != Some(model.as_str()) {
                    continue;
                }
            }

            let candidate = build_candidate(Uuid::nil(), device, target);
            let image_id = compatible_images(&images, &candidate)
                .into_iter()
                .find(|image| {
                    image.firmware_version == target.version
                        || target
                            .software_id
                            .as_deref()
                            .is_some_and(|sid| image.matches_software_id(sid))
                })
                .map(|image| image.id);

            by_xname.entry(target.xname.clone()).or_default().push(SnapshotTarget {
                name: target.target.clone(),
                observed_firmware_version: Some(target.version.clone()),
                software_id: target.software_id.clone(),
                image_id,
                error: None,
            });
        }

        let snapshot_devices = by_xname
            .into_iter()
            .filter_map(|(xname, targets)| {
                let device = devices.get(&xname)?;
                Some(SnapshotDevice {
                    xname,
                    device_type: device.device_type.clone(),
                    manufacturer: device.manufacturer.clone().unwrap_or_default(),
                    model: device.model.clone().unwrap_or_default(),
                    targets,
                })
            })
            .collect();

        snapshot.finalize(snapshot_devices)?;
        self.store.put_snapshot(&snapshot).await?;
        info!(name = %snapshot.name, "snapshot ready");
        Ok(())
    }

    /// `Restore(name, overrideDryrun, timeLimit)`: builds an explicit-version action whose
    /// candidate operations come directly from the snapshot's captured devices, runs the same
    /// from-firmware fill and no-solution/no-operation logic the Planner runs, and links
    /// sibling blocks the same way (fixing the original's off-by-one: block on the previous
    /// entry in the per-xname slice, not an index derived from the outer map's size).
    pub async fn restore(
        &self,
        name: &str,
        override_dryrun: bool,
        time_limit_seconds: Option<u64>,
    ) -> Result<Uuid, SnapshotError> {
        let snapshot = self
            .store
            .get_snapshot(name)
            .await?
            .ok_or_else(|| SnapshotError::NotFound(name.to_string()))?;

        let mut params = ActionParameters::default();
        params.state_component_filter = StateComponentFilter {
            xnames: snapshot.devices.iter().map(|d| d.xname.clone()).collect(),
            ..Default::default()
        };
        params.command = Command {
            override_dryrun,
            restore_not_possible_override: true,
            time_limit_seconds,
            version: VersionSelection::Explicit,
            description: format!("restore snapshot {}", snapshot.name),
            ..Command::default()
        };

        let mut action = Action::new(params);
        self.store.put_action(&action).await?;

        let mut devices = self.inventory.enumerate(&action.parameters.state_component_filter).await?;
        self.inventory.fill_endpoints(&mut devices).await;
        self.inventory.fill_update_service(&mut devices).await;
        let current_targets = self.inventory.enumerate_targets(&devices).await;
        let current_versions: HashMap<(String, String), String> = current_targets
            .into_iter()
            .map(|t| ((t.xname, t.target), t.version))
            .collect();

        let images = self.store.list_images().await?;
        let mut candidates: Vec<Operation> = Vec::new();
        for device in &snapshot.devices {
            for target in &device.targets {
                let mut op = synthetic_operation(action.id, device, target);
                op.from_firmware_version = current_versions.get(&(device.xname.clone(), target.name.clone())).cloned();
                if op.from_image_id.is_none() {
                    op.from_image_id = select_source_image(&images, &op);
                }
                candidates.push(op);
            }
        }

        for op in &mut candidates {
            if op.to_image_id.is_none() {
                op.transition_no_solution("snapshot has no imageId recorded for this target")?;
            } else if op.to_image_id == op.from_image_id && !action.parameters.command.overwrite_same_image {
                op.transition_no_operation()?;
            } else {
                op.transition_configure()?;
                op.set_expiration(time_limit_seconds);
            }
        }

        link_sibling_blocks(&mut candidates)?;

        for op in &candidates {
            self.store.put_operation(op).await?;
            action.operation_ids.push(op.id);
        }

        if candidates.is_empty() {
            action.transition_complete_empty()?;
        } else {
            action.transition_configure()?;
        }
        self.store.put_action(&action).await?;

        info!(action_id = %action.id, snapshot = name, operations = candidates.len(), "restore planned");
        Ok(action.id)
    }

    /// `Delete(name)`: removes the snapshot.
    pub async fn delete(&self, name: &str) -> Result<(), SnapshotError> {
        if self.store.get_snapshot(name).await?.is_none() {
            return Err(SnapshotError::NotFound(name.to_string()));
        }
        self.store.delete_snapshot(name).await?;
        Ok(())
    }
}

fn synthetic_operation(action_id: Uuid, device: &fwo_domain::SnapshotDevice, target: &SnapshotTarget) -> Operation {
    let mut op = Operation::new(action_id, &device.xname, &target.name);
    op.device_type = device.device_type.clone();
    op.manufacturer = device.manufacturer.clone();
    op.model = device.model.clone();
    op.software_id = target.software_id.clone();
    op.to_image_id = target.image_id;
    op
}
