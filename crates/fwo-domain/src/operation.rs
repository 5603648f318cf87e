use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::device::DeviceCredentials;
use crate::error::DomainError;

// ── Operation state machine ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationState {
    Initial,
    Configured,
    Blocked,
    InProgress,
    NeedsVerified,
    Verifying,
    Succeeded,
    Failed,
    Aborted,
    NoOperation,
    NoSolution,
}

/// State machines are persisted as their name only, reattached to the fixed
/// transition table by name on load (§9). A name that doesn't match any known
/// state (corruption, a rollback past a renamed variant) coerces to `failed`
/// instead of failing the whole record's deserialize — never crash on it.
impl<'de> Deserialize<'de> for OperationState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "initial" => OperationState::Initial,
            "configured" => OperationState::Configured,
            "blocked" => OperationState::Blocked,
            "inProgress" => OperationState::InProgress,
            "needsVerified" => OperationState::NeedsVerified,
            "verifying" => OperationState::Verifying,
            "succeeded" => OperationState::Succeeded,
            "failed" => OperationState::Failed,
            "aborted" => OperationState::Aborted,
            "noOperation" => OperationState::NoOperation,
            "noSolution" => OperationState::NoSolution,
            other => {
                tracing::warn!(state = other, "unrecognized persisted operation state, coercing to failed");
                OperationState::Failed
            }
        })
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self).unwrap_or_default();
        write!(f, "{}", s.as_str().unwrap_or("unknown"))
    }
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Succeeded
                | OperationState::Failed
                | OperationState::Aborted
                | OperationState::NoOperation
                | OperationState::NoSolution
        )
    }

    pub fn configure(self) -> Result<Self, &'static str> {
        match self {
            OperationState::Initial => Ok(OperationState::Configured),
            _ => Err("configure"),
        }
    }

    pub fn no_solution(self) -> Result<Self, &'static str> {
        match self {
            OperationState::Initial | OperationState::InProgress => Ok(OperationState::NoSolution),
            _ => Err("noSolution"),
        }
    }

    pub fn no_operation(self) -> Result<Self, &'static str> {
        match self {
            OperationState::Initial => Ok(OperationState::NoOperation),
            _ => Err("noOperation"),
        }
    }

    pub fn block(self) -> Result<Self, &'static str> {
        match self {
            OperationState::Configured => Ok(OperationState::Blocked),
            _ => Err("block"),
        }
    }

    pub fn unblock(self) -> Result<Self, &'static str> {
        match self {
            OperationState::Blocked => Ok(OperationState::Configured),
            _ => Err("unblock"),
        }
    }

    /// Launch Worker entry: `configured → inProgress` (start) or `inProgress → inProgress`
    /// (restart).
    pub fn launch(self) -> Result<Self, &'static str> {
        match self {
            OperationState::Configured | OperationState::InProgress => Ok(OperationState::InProgress),
            _ => Err("launch"),
        }
    }

    pub fn needs_verified(self) -> Result<Self, &'static str> {
        match self {
            OperationState::InProgress => Ok(OperationState::NeedsVerified),
            _ => Err("needsVerified"),
        }
    }

    /// Verify Worker entry: `needsVerified → verifying` (verifying) or
    /// `verifying → verifying` (reverifying).
    pub fn verify(self) -> Result<Self, &'static str> {
        match self {
            OperationState::NeedsVerified | OperationState::Verifying => Ok(OperationState::Verifying),
            _ => Err("verify"),
        }
    }

    pub fn succeed(self) -> Result<Self, &'static str> {
        match self {
            OperationState::InProgress | OperationState::Verifying => Ok(OperationState::Succeeded),
            _ => Err("succeed"),
        }
    }

    pub fn fail(self) -> Result<Self, &'static str> {
        if self.is_terminal() {
            Err("fail")
        } else {
            Ok(OperationState::Failed)
        }
    }

    pub fn abort(self) -> Result<Self, &'static str> {
        if self.is_terminal() {
            Err("abort")
        } else {
            Ok(OperationState::Aborted)
        }
    }
}

// ── Operation ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub action_id: Uuid,
    pub xname: String,
    /// Target slot, e.g. `BMC`, `BIOS`, `Node0.BIOS`.
    pub target: String,
    pub target_name: String,
    pub device_type: String,
    pub manufacturer: String,
    pub model: String,
    pub software_id: Option<String>,
    pub from_image_id: Option<Uuid>,
    pub to_image_id: Option<Uuid>,
    pub from_firmware_version: Option<String>,
    pub device_fqdn: Option<String>,
    pub update_uri: Option<String>,
    pub inventory_uri: Option<String>,
    pub reset_uri: Option<String>,
    pub credentials: DeviceCredentials,
    /// Vendor-specific task/update link captured after the launch POST (HPE `taskLink`,
    /// Gigabyte `updateInfoLink`).
    pub task_link: Option<String>,
    pub update_info_link: Option<String>,
    pub state: OperationState,
    pub state_helper: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub refresh_time: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub blocked_by: Vec<Uuid>,
}

impl Operation {
    pub fn new(action_id: Uuid, xname: impl Into<String>, target: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            action_id,
            xname: xname.into(),
            target: target.into(),
            target_name: String::new(),
            device_type: String::new(),
            manufacturer: String::new(),
            model: String::new(),
            software_id: None,
            from_image_id: None,
            to_image_id: None,
            from_firmware_version: None,
            device_fqdn: None,
            update_uri: None,
            inventory_uri: None,
            reset_uri: None,
            credentials: DeviceCredentials::default(),
            task_link: None,
            update_info_link: None,
            state: OperationState::Initial,
            state_helper: String::new(),
            start_time: Some(now),
            end_time: None,
            refresh_time: Some(now),
            expiration_time: None,
            blocked_by: Vec::new(),
        }
    }

    /// `expirationTime = startTime + timeLimitSeconds`, or one year out if unset (§5 Timeouts).
    pub fn set_expiration(&mut self, time_limit_seconds: Option<u64>) {
        let start = self.start_time.unwrap_or_else(Utc::now);
        self.expiration_time = Some(match time_limit_seconds {
            Some(secs) => start + Duration::seconds(secs as i64),
            None => start + Duration::days(365),
        });
    }

    pub fn is_expired(&self) -> bool {
        self.expiration_time.map(|t| Utc::now() >= t).unwrap_or(false)
    }

    /// Every write of an operation sets `refreshTime` to now — the crash-recovery heartbeat.
    pub fn persist_touch(&mut self) {
        self.refresh_time = Some(Utc::now());
    }

    pub fn is_stale(&self, idle: Duration) -> bool {
        match self.refresh_time {
            Some(t) => Utc::now() - t > idle,
            None => true,
        }
    }

    fn apply(&mut self, result: Result<OperationState, &'static str>) -> Result<(), DomainError> {
        let next = result.map_err(|event| DomainError::InvalidOperationTransition {
            operation: self.id,
            event,
            from: self.state.to_string(),
        })?;
        self.state = next;
        self.persist_touch();
        Ok(())
    }

    pub fn transition_configure(&mut self) -> Result<(), DomainError> {
        self.apply(self.state.configure())
    }

    pub fn transition_no_solution(&mut self, helper: impl Into<String>) -> Result<(), DomainError> {
        self.apply(self.state.no_solution())?;
        self.state_helper = helper.into();
        self.end_time = Some(Utc::now());
        Ok(())
    }

    pub fn transition_no_operation(&mut self) -> Result<(), DomainError> {
        self.apply(self.state.no_operation())?;
        self.state_helper = "toImageID equals fromImageID".into();
        self.end_time = Some(Utc::now());
        Ok(())
    }

    pub fn transition_block(&mut self, blocker: Uuid) -> Result<(), DomainError> {
        self.apply(self.state.block())?;
        if !self.blocked_by.contains(&blocker) {
            self.blocked_by.push(blocker);
        }
        Ok(())
    }

    pub fn transition_unblock(&mut self) -> Result<(), DomainError> {
        self.apply(self.state.unblock())?;
        self.blocked_by.clear();
        Ok(())
    }

    pub fn transition_launch(&mut self) -> Result<(), DomainError> {
        self.apply(self.state.launch())
    }

    pub fn transition_needs_verified(&mut self, helper: impl Into<String>) -> Result<(), DomainError> {
        self.apply(self.state.needs_verified())?;
        self.state_helper = helper.into();
        Ok(())
    }

    pub fn transition_verify(&mut self) -> Result<(), DomainError> {
        self.apply(self.state.verify())
    }

    pub fn transition_succeed(&mut self, helper: impl Into<String>) -> Result<(), DomainError> {
        self.apply(self.state.succeed())?;
        self.state_helper = helper.into();
        self.end_time = Some(Utc::now());
        Ok(())
    }

    pub fn transition_fail(&mut self, helper: impl Into<String>) -> Result<(), DomainError> {
        self.apply(self.state.fail())?;
        self.state_helper = helper.into();
        self.end_time = Some(Utc::now());
        Ok(())
    }

    pub fn transition_abort(&mut self) -> Result<(), DomainError> {
        self.apply(self.state.abort())?;
        self.end_time = Some(Utc::now());
        Ok(())
    }

    /// Force the operation into `failed` regardless of current state, used when a worker
    /// sees an event that is invalid at the current state (§7 "Worker internal errors").
    /// The only state this refuses is an already-terminal one — a terminal state is never
    /// rewritten (§8 invariant).
    pub fn force_fail(&mut self, helper: impl Into<String>) -> Result<(), DomainError> {
        if self.state.is_terminal() {
            return Err(DomainError::InvalidOperationTransition {
                operation: self.id,
                event: "forceFail",
                from: self.state.to_string(),
            });
        }
        self.state = OperationState::Failed;
        self.state_helper = helper.into();
        self.end_time = Some(Utc::now());
        self.persist_touch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op() -> Operation {
        Operation::new(Uuid::new_v4(), "x0c0s1b0", "BMC")
    }

    #[test]
    fn happy_path_launch_then_verify() {
        let mut o = op();
        o.transition_configure().unwrap();
        o.transition_launch().unwrap();
        assert_eq!(o.state, OperationState::InProgress);
        o.transition_needs_verified("update complete, needs verification").unwrap();
        o.transition_verify().unwrap();
        assert_eq!(o.state, OperationState::Verifying);
        o.transition_succeed("firmware verified").unwrap();
        assert_eq!(o.state, OperationState::Succeeded);
        assert!(o.end_time.is_some());
    }

    #[test]
    fn dry_run_succeeds_without_verify() {
        let mut o = op();
        o.transition_configure().unwrap();
        o.transition_launch().unwrap();
        o.transition_succeed("dry run candidate image noted").unwrap();
        assert_eq!(o.state, OperationState::Succeeded);
    }

    #[test]
    fn restart_launch_stays_in_progress() {
        let mut o = op();
        o.transition_configure().unwrap();
        o.transition_launch().unwrap();
        o.transition_launch().unwrap(); // restart
        assert_eq!(o.state, OperationState::InProgress);
    }

    #[test]
    fn reverify_stays_in_verifying() {
        let mut o = op();
        o.transition_configure().unwrap();
        o.transition_launch().unwrap();
        o.transition_needs_verified("x").unwrap();
        o.transition_verify().unwrap();
        o.transition_verify().unwrap(); // reverify
        assert_eq!(o.state, OperationState::Verifying);
    }

    #[test]
    fn no_solution_from_initial_when_unresolved() {
        let mut o = op();
        o.transition_no_solution("no compatible image").unwrap();
        assert_eq!(o.state, OperationState::NoSolution);
        assert!(o.end_time.is_some());
    }

    #[test]
    fn no_operation_when_same_image() {
        let mut o = op();
        o.transition_no_operation().unwrap();
        assert_eq!(o.state, OperationState::NoOperation);
    }

    #[test]
    fn terminal_state_never_rewritten() {
        let mut o = op();
        o.transition_no_operation().unwrap();
        assert!(o.transition_configure().is_err());
        assert!(o.force_fail("late error").is_err());
        assert_eq!(o.state, OperationState::NoOperation);
    }

    #[test]
    fn abort_allowed_from_any_nonterminal_state() {
        let mut o = op();
        o.transition_abort().unwrap();
        assert_eq!(o.state, OperationState::Aborted);
    }

    #[test]
    fn force_fail_on_invalid_event() {
        let mut o = op();
        o.force_fail("invalid state transition").unwrap();
        assert_eq!(o.state, OperationState::Failed);
    }

    #[test]
    fn expiration_defaults_to_one_year() {
        let mut o = op();
        o.set_expiration(None);
        assert!(!o.is_expired());
        assert!(o.expiration_time.unwrap() > Utc::now() + Duration::days(300));
    }

    #[test]
    fn expiration_respects_time_limit() {
        let mut o = op();
        o.start_time = Some(Utc::now() - Duration::seconds(120));
        o.set_expiration(Some(60));
        assert!(o.is_expired());
    }
}
