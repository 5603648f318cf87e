use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Device power states an image is allowed to be applied in. Empty means "skip the
/// power-state gate entirely" (Launch Worker Stage 3).
pub type PowerState = String;

/// Redfish `ResetType` value used when an image declares it needs a manual reboot.
pub type ResetKind = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: Uuid,
    pub device_type: String,
    pub manufacturer: String,
    /// Models this image applies to. Empty means "any model of this manufacturer/device_type".
    pub models: Vec<String>,
    /// Vendor software identifiers this image also matches against, for devices where
    /// model strings alone are insufficient (Planner step 8).
    pub software_ids: Vec<String>,
    /// Firmware target this image updates, e.g. `BMC`, `BIOS`.
    pub target: String,
    /// Opaque firmware version string as reported by the device after a successful update.
    pub firmware_version: String,
    /// Parseable semantic version, used to pick `latest`/`earliest` among candidates.
    pub semantic_version: semver::Version,
    pub tags: Vec<String>,
    /// `s3://bucket/path` or `http(s)://...` artifact location.
    pub artifact_url: String,
    /// True if the device reboots itself after receiving the update (Verify Worker policy).
    pub self_reboot: bool,
    /// Redfish `ResetType` to POST when `self_reboot` is false.
    pub force_reset_type: Option<ResetKind>,
    pub wait_time_before_manual_reboot_seconds: u64,
    pub wait_time_after_reboot_seconds: u64,
    pub polling_speed_seconds: u64,
    /// Power states the device must be in before the update POST is issued. Empty = no gate.
    pub allowable_device_states: Vec<PowerState>,
}

impl Image {
    pub fn applies_to(&self, device_type: &str, manufacturer: &str, model: &str, target: &str) -> bool {
        self.device_type == device_type
            && self.manufacturer == manufacturer
            && self.target == target
            && (self.models.is_empty() || self.models.iter().any(|m| m == model))
    }

    pub fn matches_software_id(&self, software_id: &str) -> bool {
        self.software_ids.iter().any(|s| s == software_id)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
