use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::ActionParameters;
use crate::error::DomainError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTarget {
    pub name: String,
    pub observed_firmware_version: Option<String>,
    pub software_id: Option<String>,
    /// Image resolved to match this target's observed version at capture time.
    pub image_id: Option<Uuid>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDevice {
    pub xname: String,
    pub device_type: String,
    pub manufacturer: String,
    pub model: String,
    pub targets: Vec<SnapshotTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// User-supplied, unique.
    pub name: String,
    pub capture_time: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub ready: bool,
    pub parameters: ActionParameters,
    pub devices: Vec<SnapshotDevice>,
    pub related_action_ids: Vec<Uuid>,
    pub errors: Vec<String>,
}

impl Snapshot {
    pub fn new(name: impl Into<String>, parameters: ActionParameters, expiration_time: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            capture_time: Utc::now(),
            expiration_time,
            ready: false,
            parameters,
            devices: Vec::new(),
            related_action_ids: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expiration_time.map(|t| Utc::now() >= t).unwrap_or(false)
    }

    /// Devices become immutable once the snapshot is ready (§3 Snapshot invariant).
    pub fn finalize(&mut self, devices: Vec<SnapshotDevice>) -> Result<(), DomainError> {
        if self.ready {
            return Err(DomainError::InvalidFilter(format!(
                "snapshot '{}' is already ready; devices are immutable",
                self.name
            )));
        }
        self.devices = devices;
        self.ready = true;
        Ok(())
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }
}
