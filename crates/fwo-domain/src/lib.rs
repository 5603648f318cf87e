pub mod action;
pub mod device;
pub mod error;
pub mod image;
pub mod operation;
pub mod snapshot;

pub use action::{
    Action, ActionParameters, ActionState, Command, ImageFilter, InventoryHardwareFilter,
    StateComponentFilter, TargetFilter, VersionSelection,
};
pub use device::{DeviceRecord, DiscoveryStatus, TargetVersion};
pub use error::DomainError;
pub use image::Image;
pub use operation::{Operation, OperationState};
pub use snapshot::{Snapshot, SnapshotDevice, SnapshotTarget};
