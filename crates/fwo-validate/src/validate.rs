use std::collections::HashSet;

use fwo_domain::{ActionParameters, Image};

use crate::error::ValidateError;

/// An HMS component ID: `x<digits>` followed by lowercase-letter/digit coordinate
/// segments, e.g. `x0c0s0b0n0`. Empty, uppercase, or otherwise malformed strings
/// are rejected the same way a duplicate is.
fn is_valid_xname(xname: &str) -> bool {
    let mut chars = xname.chars();
    if chars.next() != Some('x') {
        return false;
    }
    let rest = &xname[1..];
    match rest.chars().next() {
        Some(c) if c.is_ascii_digit() => {}
        _ => return false,
    }
    rest.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
}

/// Checks an incoming Action request body before a planning pass is ever attempted.
///
/// Checks:
/// 1. No empty, malformed, or duplicate xnames in the state-component filter
/// 2. `groups` and `partitions` cannot both carry more than one entry (ambiguous scope)
pub fn validate_action_parameters(params: &ActionParameters) -> Result<(), ValidateError> {
    let mut errors = Vec::new();

    let xnames = &params.state_component_filter.xnames;
    let mut seen = HashSet::new();
    let mut bad_xnames = Vec::new();
    for xname in xnames {
        let is_dup = !seen.insert(xname.as_str());
        if xname.trim().is_empty() || !is_valid_xname(xname) || is_dup {
            bad_xnames.push(xname.clone());
        }
    }
    if !bad_xnames.is_empty() {
        errors.push(ValidateError::InvalidXnames(bad_xnames));
    }

    let groups = params.state_component_filter.groups.len();
    let partitions = params.state_component_filter.partitions.len();
    if groups > 1 && partitions > 1 {
        errors.push(ValidateError::IncompatibleFilterCombo { groups, partitions });
    }

    into_result(errors)
}

/// Validates an image definition before it is accepted into the catalog.
pub fn validate_image(image: &Image) -> Result<(), ValidateError> {
    let mut errors = Vec::new();

    if image.device_type.trim().is_empty() {
        errors.push(ValidateError::ImageMissingField("device_type"));
    }
    if image.manufacturer.trim().is_empty() {
        errors.push(ValidateError::ImageMissingField("manufacturer"));
    }
    if image.target.trim().is_empty() {
        errors.push(ValidateError::ImageMissingField("target"));
    }
    if image.artifact_url.trim().is_empty() {
        errors.push(ValidateError::ImageMissingField("artifact_url"));
    }
    if image.firmware_version.trim().is_empty() {
        errors.push(ValidateError::ImageMissingField("firmware_version"));
    }

    into_result(errors)
}

/// `POST .../snapshots/{name}/restore` requires an explicit `confirm=true`, since it
/// rolls every matched device back to a prior firmware state.
pub fn validate_restore_confirmation(confirmed: bool) -> Result<(), ValidateError> {
    if confirmed {
        Ok(())
    } else {
        Err(ValidateError::MissingRestoreConfirmation)
    }
}

/// Snapshot names are user-chosen and must be unique among the names already on record.
pub fn validate_snapshot_name(name: &str, existing: &[String]) -> Result<(), ValidateError> {
    if existing.iter().any(|n| n == name) {
        Err(ValidateError::DuplicateSnapshotName(name.to_string()))
    } else {
        Ok(())
    }
}

fn into_result(mut errors: Vec<ValidateError>) -> Result<(), ValidateError> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidateError::Multiple(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwo_domain::StateComponentFilter;
    use uuid::Uuid;

    fn sample_image() -> Image {
        Image {
            id: Uuid::new_v4(),
            device_type: "NodeBMC".into(),
            manufacturer: "cray".into(),
            models: vec![],
            software_ids: vec![],
            target: "BMC".into(),
            firmware_version: "v1.0".into(),
            semantic_version: semver::Version::parse("1.0.0").unwrap(),
            tags: vec![],
            artifact_url: "s3://bucket/path".into(),
            self_reboot: false,
            force_reset_type: None,
            wait_time_before_manual_reboot_seconds: 0,
            wait_time_after_reboot_seconds: 0,
            polling_speed_seconds: 5,
            allowable_device_states: vec![],
        }
    }

    #[test]
    fn empty_parameters_are_valid() {
        assert!(validate_action_parameters(&ActionParameters::default()).is_ok());
    }

    #[test]
    fn duplicate_xname_is_rejected() {
        let mut params = ActionParameters::default();
        params.state_component_filter = StateComponentFilter {
            xnames: vec!["x0c0s0b0n0".into(), "x0c0s0b0n0".into()],
            ..Default::default()
        };
        assert!(matches!(
            validate_action_parameters(&params),
            Err(ValidateError::InvalidXnames(_))
        ));
    }

    #[test]
    fn malformed_xname_is_rejected() {
        let mut params = ActionParameters::default();
        params.state_component_filter = StateComponentFilter {
            xnames: vec!["badXname".into()],
            ..Default::default()
        };
        let err = validate_action_parameters(&params).unwrap_err();
        assert!(matches!(err, ValidateError::InvalidXnames(_)));
        assert!(err.to_string().contains("invalid/duplicate xnames"));
    }

    #[test]
    fn well_formed_xname_passes() {
        let mut params = ActionParameters::default();
        params.state_component_filter = StateComponentFilter {
            xnames: vec!["x0c0s0b0n0".into()],
            ..Default::default()
        };
        assert!(validate_action_parameters(&params).is_ok());
    }

    #[test]
    fn groups_and_partitions_together_is_rejected() {
        let mut params = ActionParameters::default();
        params.state_component_filter = StateComponentFilter {
            groups: vec!["g0".into(), "g1".into()],
            partitions: vec!["p0".into(), "p1".into()],
            ..Default::default()
        };
        assert!(matches!(
            validate_action_parameters(&params),
            Err(ValidateError::IncompatibleFilterCombo { .. })
        ));
    }

    #[test]
    fn valid_image_passes() {
        assert!(validate_image(&sample_image()).is_ok());
    }

    #[test]
    fn image_missing_artifact_url_is_rejected() {
        let mut image = sample_image();
        image.artifact_url.clear();
        assert!(matches!(
            validate_image(&image),
            Err(ValidateError::ImageMissingField("artifact_url"))
        ));
    }

    #[test]
    fn restore_requires_confirmation() {
        assert!(validate_restore_confirmation(true).is_ok());
        let err = validate_restore_confirmation(false).unwrap_err();
        assert!(matches!(err, ValidateError::MissingRestoreConfirmation));
        assert!(err.to_string().contains("missing required parameter"));
    }

    #[test]
    fn duplicate_snapshot_name_is_rejected() {
        let existing = vec!["s1".to_string()];
        assert!(validate_snapshot_name("s2", &existing).is_ok());
        assert!(matches!(
            validate_snapshot_name("s1", &existing),
            Err(ValidateError::DuplicateSnapshotName(_))
        ));
    }
}
