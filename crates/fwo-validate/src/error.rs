use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("invalid/duplicate xnames: {0:?}")]
    InvalidXnames(Vec<String>),

    #[error("filtering by {groups} group(s) and {partitions} partition(s) at once is not supported; pick one")]
    IncompatibleFilterCombo { groups: usize, partitions: usize },

    #[error("image is missing required field '{0}'")]
    ImageMissingField(&'static str),

    #[error("missing required parameter: restore confirmation")]
    MissingRestoreConfirmation,

    #[error("a snapshot named '{0}' already exists")]
    DuplicateSnapshotName(String),

    #[error("{0} validation errors")]
    Multiple(Vec<ValidateError>),
}
