mod validate;
pub mod error;

pub use error::ValidateError;
pub use validate::{
    validate_action_parameters, validate_image, validate_restore_confirmation,
    validate_snapshot_name,
};
