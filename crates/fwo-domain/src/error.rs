use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid action id: {0}")]
    InvalidActionId(String),

    #[error("invalid operation id: {0}")]
    InvalidOperationId(String),

    #[error("action {action:?} cannot {event} from state {from:?}")]
    InvalidActionTransition {
        action: uuid::Uuid,
        event: &'static str,
        from: String,
    },

    #[error("operation {operation:?} cannot {event} from state {from:?}")]
    InvalidOperationTransition {
        operation: uuid::Uuid,
        event: &'static str,
        from: String,
    },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid semantic version '{0}'")]
    InvalidSemver(String),
}
