use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

// ── Filters ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateComponentFilter {
    #[serde(default)]
    pub xnames: Vec<String>,
    #[serde(default)]
    pub partitions: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub device_types: Vec<String>,
}

impl StateComponentFilter {
    pub fn is_empty(&self) -> bool {
        self.xnames.is_empty()
            && self.partitions.is_empty()
            && self.groups.is_empty()
            && self.device_types.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryHardwareFilter {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFilter {
    #[serde(default)]
    pub targets: Vec<String>,
}

impl TargetFilter {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Matches by target OR targetName (Planner step 3).
    pub fn matches(&self, target: &str, target_name: &str) -> bool {
        self.is_empty()
            || self.targets.iter().any(|t| t == target || t == target_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFilter {
    pub image_id: Option<Uuid>,
    #[serde(default)]
    pub override_image: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VersionSelection {
    Latest,
    Earliest,
    Explicit,
}

impl Default for VersionSelection {
    fn default() -> Self {
        VersionSelection::Latest
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub override_dryrun: bool,
    #[serde(default)]
    pub restore_not_possible_override: bool,
    #[serde(default)]
    pub overwrite_same_image: bool,
    pub time_limit_seconds: Option<u64>,
    #[serde(default)]
    pub version: VersionSelection,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub description: String,
}

fn default_tag() -> String {
    "default".to_string()
}

impl Default for Command {
    fn default() -> Self {
        Self {
            override_dryrun: false,
            restore_not_possible_override: false,
            overwrite_same_image: false,
            time_limit_seconds: None,
            version: VersionSelection::Latest,
            tag: default_tag(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionParameters {
    #[serde(default)]
    pub state_component_filter: StateComponentFilter,
    #[serde(default)]
    pub inventory_hardware_filter: InventoryHardwareFilter,
    #[serde(default)]
    pub target_filter: TargetFilter,
    #[serde(default)]
    pub image_filter: ImageFilter,
    #[serde(default)]
    pub command: Command,
}

// ── Action state machine ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionState {
    New,
    Configured,
    Blocked,
    Running,
    AbortSignaled,
    Aborted,
    Completed,
}

/// A name that doesn't match any known state coerces to `Aborted`, the nearest
/// terminal variant this enum has, instead of failing the whole record's deserialize.
impl<'de> Deserialize<'de> for ActionState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "new" => ActionState::New,
            "configured" => ActionState::Configured,
            "blocked" => ActionState::Blocked,
            "running" => ActionState::Running,
            "abortSignaled" => ActionState::AbortSignaled,
            "aborted" => ActionState::Aborted,
            "completed" => ActionState::Completed,
            other => {
                tracing::warn!(state = other, "unrecognized persisted action state, coercing to aborted");
                ActionState::Aborted
            }
        })
    }
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self).unwrap_or_default();
        write!(f, "{}", s.as_str().unwrap_or("unknown"))
    }
}

impl ActionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionState::Aborted | ActionState::Completed)
    }

    /// Planner step 12/13: zero candidate operations.
    pub fn complete_empty(self) -> Result<Self, DomainError> {
        self.expect(ActionState::New, "completeEmpty", ActionState::Completed)
    }

    /// Planner step 12: at least one candidate operation was produced.
    pub fn configure(self) -> Result<Self, DomainError> {
        self.expect(ActionState::New, "configure", ActionState::Configured)
    }

    /// Control loop `configured`: claimed the running token.
    pub fn start(self) -> Result<Self, DomainError> {
        self.expect(ActionState::Configured, "start", ActionState::Running)
    }

    /// Control loop `configured`: another action already holds the token.
    pub fn block(self) -> Result<Self, DomainError> {
        self.expect(ActionState::Configured, "block", ActionState::Blocked)
    }

    /// Control loop `blocked`: the blocking action(s) are now terminal.
    pub fn unblock(self) -> Result<Self, DomainError> {
        self.expect(ActionState::Blocked, "unblock", ActionState::Configured)
    }

    /// Control loop `running`: every operation has reached a terminal state.
    pub fn complete(self) -> Result<Self, DomainError> {
        self.expect(ActionState::Running, "complete", ActionState::Completed)
    }

    /// `DELETE .../instance`: signal the control loop to abort this action.
    pub fn signal_abort(self) -> Result<Self, DomainError> {
        match self {
            ActionState::New
            | ActionState::Configured
            | ActionState::Blocked
            | ActionState::Running => Ok(ActionState::AbortSignaled),
            from => Err(transition_err(None, "signalAbort", from)),
        }
    }

    /// Control loop `abortSignaled`: every operation has been aborted or already terminal.
    pub fn abort(self) -> Result<Self, DomainError> {
        self.expect(ActionState::AbortSignaled, "abort", ActionState::Aborted)
    }

    fn expect(self, required: ActionState, event: &'static str, next: ActionState) -> Result<Self, DomainError> {
        if self == required {
            Ok(next)
        } else {
            Err(transition_err(None, event, self))
        }
    }
}

fn transition_err(action: Option<Uuid>, event: &'static str, from: ActionState) -> DomainError {
    DomainError::InvalidActionTransition {
        action: action.unwrap_or_default(),
        event,
        from: from.to_string(),
    }
}

// ── Action ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub parameters: ActionParameters,
    pub state: ActionState,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub refresh_time: Option<DateTime<Utc>>,
    pub operation_ids: Vec<Uuid>,
    /// Other actions whose running token this action is waiting on.
    pub blocked_by: Vec<Uuid>,
    pub errors: Vec<String>,
}

impl Action {
    pub fn new(parameters: ActionParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            parameters,
            state: ActionState::New,
            start_time: Some(Utc::now()),
            end_time: None,
            refresh_time: Some(Utc::now()),
            operation_ids: Vec::new(),
            blocked_by: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Append an error message, deduplicated (§7 "deduplicated list of human-readable
    /// error strings aggregated across planning").
    pub fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }

    fn apply(&mut self, result: Result<ActionState, DomainError>) -> Result<(), DomainError> {
        let next = result.map_err(|e| match e {
            DomainError::InvalidActionTransition { event, from, .. } => {
                DomainError::InvalidActionTransition { action: self.id, event, from }
            }
            other => other,
        })?;
        self.state = next;
        Ok(())
    }

    pub fn transition_configure(&mut self) -> Result<(), DomainError> {
        self.apply(self.state.configure())
    }

    pub fn transition_complete_empty(&mut self) -> Result<(), DomainError> {
        let now = Utc::now();
        self.apply(self.state.complete_empty())?;
        self.end_time = Some(now);
        Ok(())
    }

    pub fn transition_start(&mut self) -> Result<(), DomainError> {
        self.apply(self.state.start())
    }

    pub fn transition_block(&mut self, blocked_by: Uuid) -> Result<(), DomainError> {
        self.apply(self.state.block())?;
        if !self.blocked_by.contains(&blocked_by) {
            self.blocked_by.push(blocked_by);
        }
        Ok(())
    }

    pub fn transition_unblock(&mut self) -> Result<(), DomainError> {
        self.apply(self.state.unblock())?;
        self.blocked_by.clear();
        Ok(())
    }

    pub fn transition_complete(&mut self) -> Result<(), DomainError> {
        self.apply(self.state.complete())?;
        self.end_time = Some(Utc::now());
        Ok(())
    }

    pub fn transition_signal_abort(&mut self) -> Result<(), DomainError> {
        self.apply(self.state.signal_abort())
    }

    pub fn transition_abort(&mut self) -> Result<(), DomainError> {
        self.apply(self.state.abort())?;
        self.end_time = Some(Utc::now());
        Ok(())
    }

    pub fn touch(&mut self) {
        self.refresh_time = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_action_starts_in_new_state() {
        let action = Action::new(ActionParameters::default());
        assert_eq!(action.state, ActionState::New);
        assert!(action.operation_ids.is_empty());
    }

    #[test]
    fn full_happy_path_lifecycle() {
        let mut action = Action::new(ActionParameters::default());
        action.transition_configure().unwrap();
        assert_eq!(action.state, ActionState::Configured);
        action.transition_start().unwrap();
        assert_eq!(action.state, ActionState::Running);
        action.transition_complete().unwrap();
        assert_eq!(action.state, ActionState::Completed);
        assert!(action.end_time.is_some());
    }

    #[test]
    fn block_then_unblock() {
        let mut action = Action::new(ActionParameters::default());
        action.transition_configure().unwrap();
        let blocker = Uuid::new_v4();
        action.transition_block(blocker).unwrap();
        assert_eq!(action.state, ActionState::Blocked);
        assert_eq!(action.blocked_by, vec![blocker]);
        action.transition_unblock().unwrap();
        assert_eq!(action.state, ActionState::Configured);
        assert!(action.blocked_by.is_empty());
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut action = Action::new(ActionParameters::default());
        assert!(action.transition_start().is_err());
        assert_eq!(action.state, ActionState::New);
    }

    #[test]
    fn abort_signal_then_abort() {
        let mut action = Action::new(ActionParameters::default());
        action.transition_configure().unwrap();
        action.transition_start().unwrap();
        action.transition_signal_abort().unwrap();
        assert_eq!(action.state, ActionState::AbortSignaled);
        action.transition_abort().unwrap();
        assert_eq!(action.state, ActionState::Aborted);
    }

    #[test]
    fn empty_planning_outcome_completes_directly() {
        let mut action = Action::new(ActionParameters::default());
        action.transition_complete_empty().unwrap();
        assert_eq!(action.state, ActionState::Completed);
    }

    #[test]
    fn dedup_errors() {
        let mut action = Action::new(ActionParameters::default());
        action.push_error("bad xname");
        action.push_error("bad xname");
        assert_eq!(action.errors.len(), 1);
    }

    #[test]
    fn target_filter_matches_by_target_or_name() {
        let filter = TargetFilter { targets: vec!["BMC".into()] };
        assert!(filter.matches("BMC", "Node0.BMC"));
        assert!(filter.matches("BIOS", "BMC"));
        assert!(!filter.matches("BIOS", "Node0.BIOS"));
    }

    #[test]
    fn empty_target_filter_matches_everything() {
        let filter = TargetFilter::default();
        assert!(filter.matches("BMC", "Node0.BMC"));
    }
}
