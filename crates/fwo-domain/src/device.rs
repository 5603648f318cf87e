use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Redfish endpoint discovery status, as reported by the inventory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DiscoveryStatus {
    DiscoverOk,
    HttpsGetFailed,
    ChildVerificationFailed,
    NotYetDiscovered,
}

impl std::fmt::Display for DiscoveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiscoveryStatus::DiscoverOk => "DiscoverOK",
            DiscoveryStatus::HttpsGetFailed => "HTTPsGetFailed",
            DiscoveryStatus::ChildVerificationFailed => "ChildVerificationFailed",
            DiscoveryStatus::NotYetDiscovered => "NotYetDiscovered",
        };
        write!(f, "{}", s)
    }
}

/// Value-snapshot credentials attached to a device record or operation.
///
/// Operations hold a copy of this (never a shared reference) so restart-after-crash
/// works without re-querying the credential store mid-flight (see data model §3 Ownership).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCredentials {
    pub username: String,
    pub password: String,
}

/// What the Inventory Client knows about one component, assembled incrementally by
/// `enumerate` → `fillEndpoints` → `fillUpdateService` → `fillModelManufacturer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub xname: String,
    pub device_type: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub discovery_status: Option<DiscoveryStatus>,
    /// FQDN of the device's Redfish endpoint.
    pub fqdn: Option<String>,
    /// Redfish path to POST a reset action to.
    pub reset_uri: Option<String>,
    /// Redfish path to POST firmware images to.
    pub update_uri: Option<String>,
    /// Redfish path to enumerate firmware inventory targets.
    pub inventory_uri: Option<String>,
    pub credentials: DeviceCredentials,
    /// Errors attached to this specific device during a fan-out; never fails the batch.
    pub errors: Vec<String>,
}

impl DeviceRecord {
    pub fn new(xname: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            xname: xname.into(),
            device_type: device_type.into(),
            manufacturer: None,
            model: None,
            discovery_status: None,
            fqdn: None,
            reset_uri: None,
            update_uri: None,
            inventory_uri: None,
            credentials: DeviceCredentials::default(),
            errors: Vec::new(),
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// One `(xname, target, targetName, version)` tuple read from a device's inventory
/// URI during `enumerateTargets` (inventory client) or a firmware re-read (verify worker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetVersion {
    pub xname: String,
    pub target: String,
    pub target_name: String,
    pub version: String,
    pub software_id: Option<String>,
}

/// Arbitrary key/value outputs the inventory or Redfish layer may carry along a response,
/// used opaquely by the CLI/API for debugging without threading a bespoke struct everywhere.
pub type RawAttributes = HashMap<String, serde_json::Value>;
