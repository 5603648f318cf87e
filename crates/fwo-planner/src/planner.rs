use std::collections::HashMap;
use std::sync::Arc;

use fwo_domain::{Action, DeviceRecord, Image, Operation, TargetVersion, VersionSelection};
use fwo_inventory::InventoryClient;
use fwo_store::StateStore;
use tracing::{debug, info};

use crate::error::PlannerError;

/// Turns a just-submitted Action (`state = new`) into a concrete set of Operations,
/// attaching source/target image IDs, and persists both (§4.4).
pub struct Planner {
    store: Arc<dyn StateStore>,
    inventory: Arc<InventoryClient>,
    /// Component roles the control loop must never schedule operations for.
    node_blacklist: Vec<String>,
}

impl Planner {
    pub fn new(store: Arc<dyn StateStore>, inventory: Arc<InventoryClient>, node_blacklist: Vec<String>) -> Self {
        Self {
            store,
            inventory,
            node_blacklist,
        }
    }

    pub async fn plan(&self, action: &mut Action) -> Result<(), PlannerError> {
        let params = action.parameters.clone();

        // Step 1: resolve the component set.
        let mut devices = self.inventory.enumerate(&params.state_component_filter).await?;
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
                action.push_error(err.clone());
            }
        }

        // Step 2: enumerate inventoried targets (this also serves as step 7's firmware probe —
        // both read the same Redfish inventory URI response).
        let targets = self.inventory.enumerate_targets(&devices).await;

        // Step 3: restrict to targets matching TargetFilter.
        let targets: Vec<TargetVersion> = targets
            .into_iter()
            .filter(|t| params.target_filter.matches(&t.target, &t.target_name))
            .collect();

        // Step 4 + 5: fill (model, manufacturer), apply InventoryHardwareFilter, build candidates.
        let hw_filter = &params.inventory_hardware_filter;
        let mut candidates: Vec<Operation> = Vec::new();
        for target in &targets {
            let Some(device) = devices.get(&target.xname) else {
                continue;
            };
            if let Some(manufacturer) = &hw_filter.manufacturer {
                if device.manufacturer.as_deref() != Some(manufacturer.as_str()) {
                    continue;
                }
            }
            if let Some(model) = &hw_filter.model {
                if device.model.as_deref() != Some(model.as_str()) {
                    continue;
                }
            }
            candidates.push(build_candidate(action.id, device, target));
        }

        // Step 6: explicit image selection.
        if params.command.version == VersionSelection::Explicit {
            if let Some(image_id) = params.image_filter.image_id {
                match self.store.get_image(image_id).await? {
                    Some(image) => {
                        candidates.retain_mut(|op| {
                            let compatible = image.applies_to(&op.device_type, &op.manufacturer, &op.model, &op.target)
                                || op.software_id.as_deref().is_some_and(|sid| image.matches_software_id(sid));
                            if compatible || params.image_filter.override_image {
                                op.to_image_id = Some(image.id);
                                true
                            } else {
                                false
                            }
                        });
                    }
                    None => {
                        action.push_error(format!("explicit image {image_id} not found"));
                    }
                }
            } else {
                action.push_error("command.version is 'explicit' but imageFilter.imageId is unset".to_string());
            }
        }

        // Step 8: image resolution for candidates without an explicit toImageId.
        let images = self.store.list_images().await?;
        for op in &mut candidates {
            if op.to_image_id.is_none() {
                op.to_image_id = select_target_image(&images, op, &params.command.version, &params.command.tag);
            }
            op.from_image_id = select_source_image(&images, op);
        }

        // Step 9 + 10: terminal conditions, or configure.
        for op in &mut candidates {
            if op.to_image_id.is_none() {
                op.transition_no_solution("no compatible target image found")?;
            } else if op.to_image_id == op.from_image_id && !params.command.overwrite_same_image {
                op.transition_no_operation()?;
            } else {
                op.transition_configure()?;
                op.set_expiration(params.command.time_limit_seconds);
            }
        }

        // Step 11: sibling blocks, topologically linearized per xname. Targets within one
        // xname are ordered deterministically by target name; everything after the first
        // configured operation blocks on the previous one's ID.
        link_sibling_blocks(&mut candidates)?;

        for op in &candidates {
            self.store.put_operation(op).await?;
            action.operation_ids.push(op.id);
        }

        // Step 12: terminal action transition.
        if candidates.is_empty() {
            action.transition_complete_empty()?;
        } else {
            action.transition_configure()?;
        }

        // Step 13: errors are already deduplicated by Action::push_error on insert.
        self.store.put_action(action).await?;

        info!(
            action_id = %action.id,
            operations = candidates.len(),
            errors = action.errors.len(),
            "planning complete"
        );
        Ok(())
    }
}

/// Builds a bare candidate operation from a resolved device/target pair, before image
/// resolution. Shared with the Snapshot Engine's restore path (§4.8).
pub fn build_candidate(action_id: uuid::Uuid, device: &DeviceRecord, target: &TargetVersion) -> Operation {
    let mut op = Operation::new(action_id, &target.xname, &target.target);
    op.target_name = target.target_name.clone();
    op.device_type = device.device_type.clone();
    op.manufacturer = device.manufacturer.clone().unwrap_or_default();
    op.model = device.model.clone().unwrap_or_default();
    op.software_id = target.software_id.clone();
    op.from_firmware_version = Some(target.version.clone());
    op.device_fqdn = device.fqdn.clone();
    op.update_uri = device.update_uri.clone();
    op.inventory_uri = device.inventory_uri.clone();
    op.reset_uri = device.reset_uri.clone();
    op.credentials = device.credentials.clone();
    op
}

pub fn compatible_images<'a>(images: &'a [Image], op: &Operation) -> Vec<&'a Image> {
    images
        .iter()
        .filter(|image| {
            image.applies_to(&op.device_type, &op.manufacturer, &op.model, &op.target)
                || op.software_id.as_deref().is_some_and(|sid| image.matches_software_id(sid))
        })
        .collect()
}

pub fn select_target_image(
    images: &[Image],
    op: &Operation,
    version: &VersionSelection,
    tag: &str,
) -> Option<uuid::Uuid> {
    let mut matches = compatible_images(images, op);
    if matches!(version, VersionSelection::Latest | VersionSelection::Earliest) {
        matches.retain(|image| image.has_tag(tag));
    }
    match version {
        VersionSelection::Latest => matches.into_iter().max_by(|a, b| a.semantic_version.cmp(&b.semantic_version)).map(|i| i.id),
        VersionSelection::Earliest => matches.into_iter().min_by(|a, b| a.semantic_version.cmp(&b.semantic_version)).map(|i| i.id),
        VersionSelection::Explicit => None,
    }
}

pub fn select_source_image(images: &[Image], op: &Operation) -> Option<uuid::Uuid> {
    let from_version = op.from_firmware_version.as_deref()?;
    compatible_images(images, op)
        .into_iter()
        .find(|image| image.firmware_version == from_version)
        .map(|i| i.id)
}

/// Groups `configured` operations by xname and chains each one's `blockedBy` to the
/// previous entry in deterministic (by-target) order. Exposed for the control loop to
/// re-run after operations complete (§4.5 "run the sibling blocker check again").
pub fn link_sibling_blocks(candidates: &mut [Operation]) -> Result<(), fwo_domain::DomainError> {
    let mut by_xname: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, op) in candidates.iter().enumerate() {
        if op.state == fwo_domain::OperationState::Configured {
            by_xname.entry(op.xname.clone()).or_default().push(idx);
        }
    }

    for indices in by_xname.values_mut() {
        indices.sort_by(|&a, &b| candidates[a].target.cmp(&candidates[b].target));
        for window in indices.windows(2) {
            let (prev_idx, cur_idx) = (window[0], window[1]);
            let blocker = candidates[prev_idx].id;
            candidates[cur_idx].transition_block(blocker)?;
        }
    }
    Ok(())
}

/// Unblocks every `blocked` operation whose blockers have all reached a terminal state.
/// Control loop counterpart to [`link_sibling_blocks`] — run on every tick of a `running`
/// action so a finished predecessor frees its sibling (§4.5 "running").
pub fn refresh_operation_blocks(operations: &mut [Operation]) -> Result<(), fwo_domain::DomainError> {
    let terminal: std::collections::HashSet<uuid::Uuid> = operations
        .iter()
        .filter(|op| op.state.is_terminal())
        .map(|op| op.id)
        .collect();

    for op in operations.iter_mut() {
        if op.state == fwo_domain::OperationState::Blocked && op.blocked_by.iter().all(|b| terminal.contains(b)) {
            op.transition_unblock()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwo_domain::{ActionParameters, Command, ImageFilter, VersionSelection};
    use semver::Version;
    use uuid::Uuid;

    fn sample_image(version: &str, target: &str, tag: &str) -> Image {
        Image {
            id: Uuid::new_v4(),
            device_type: "NodeBMC".into(),
            manufacturer: "cray".into(),
            models: vec![],
            software_ids: vec![],
            target: target.into(),
            firmware_version: format!("v{version}"),
            semantic_version: Version::parse(version).unwrap(),
            tags: vec![tag.into()],
            artifact_url: "s3://bucket/path".into(),
            self_reboot: false,
            force_reset_type: None,
            wait_time_before_manual_reboot_seconds: 0,
            wait_time_after_reboot_seconds: 0,
            polling_speed_seconds: 5,
            allowable_device_states: vec![],
        }
    }

    fn sample_op() -> Operation {
        let mut op = Operation::new(Uuid::new_v4(), "x0c0s0b0", "BMC");
        op.device_type = "NodeBMC".into();
        op.manufacturer = "cray".into();
        op.model = "".into();
        op
    }

    #[test]
    fn select_target_image_picks_latest() {
        let images = vec![sample_image("1.0.0", "BMC", "default"), sample_image("2.0.0", "BMC", "default")];
        let op = sample_op();
        let picked = select_target_image(&images, &op, &VersionSelection::Latest, "default").unwrap();
        assert_eq!(images.iter().find(|i| i.id == picked).unwrap().semantic_version, Version::parse("2.0.0").unwrap());
    }

    #[test]
    fn select_target_image_picks_earliest() {
        let images = vec![sample_image("1.0.0", "BMC", "default"), sample_image("2.0.0", "BMC", "default")];
        let op = sample_op();
        let picked = select_target_image(&images, &op, &VersionSelection::Earliest, "default").unwrap();
        assert_eq!(images.iter().find(|i| i.id == picked).unwrap().semantic_version, Version::parse("1.0.0").unwrap());
    }

    #[test]
    fn select_target_image_respects_tag() {
        let images = vec![sample_image("3.0.0", "BMC", "canary")];
        let op = sample_op();
        assert!(select_target_image(&images, &op, &VersionSelection::Latest, "default").is_none());
    }

    #[test]
    fn select_source_image_matches_firmware_version() {
        let images = vec![sample_image("1.0.0", "BMC", "default")];
        let mut op = sample_op();
        op.from_firmware_version = Some("v1.0.0".into());
        let picked = select_source_image(&images, &op).unwrap();
        assert_eq!(picked, images[0].id);
    }

    #[test]
    fn link_sibling_blocks_chains_same_xname() {
        let mut ops = vec![sample_op(), sample_op()];
        ops[0].target = "BIOS".into();
        ops[1].target = "BMC".into();
        for op in &mut ops {
            op.transition_configure().unwrap();
        }
        link_sibling_blocks(&mut ops).unwrap();
        assert_eq!(ops[0].state, fwo_domain::OperationState::Configured);
        assert_eq!(ops[1].state, fwo_domain::OperationState::Blocked);
        assert_eq!(ops[1].blocked_by, vec![ops[0].id]);
    }

    #[test]
    fn refresh_unblocks_when_blocker_terminal() {
        let mut ops = vec![sample_op(), sample_op()];
        ops[0].target = "BIOS".into();
        ops[1].target = "BMC".into();
        for op in &mut ops {
            op.transition_configure().unwrap();
        }
        link_sibling_blocks(&mut ops).unwrap();
        assert_eq!(ops[1].state, fwo_domain::OperationState::Blocked);

        ops[0].transition_launch().unwrap();
        ops[0].transition_succeed("done").unwrap();
        refresh_operation_blocks(&mut ops).unwrap();
        assert_eq!(ops[1].state, fwo_domain::OperationState::Configured);
    }

    #[test]
    fn default_command_has_default_tag_and_latest_version() {
        let params = ActionParameters::default();
        assert_eq!(params.command.tag, "default");
        assert_eq!(params.command.version, VersionSelection::Latest);
        let _ = Command::default();
        let _ = ImageFilter::default();
    }
}
