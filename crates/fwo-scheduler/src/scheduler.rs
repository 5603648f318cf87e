use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use fwo_domain::{Action, ActionState, Operation, OperationState};
use fwo_planner::refresh_operation_blocks;
use fwo_store::StateStore;
use fwo_workers::{do_launch, do_verify, quit_channel, QuitSender, WorkerContext};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::SchedulerError;

const TICK_INTERVAL: StdDuration = StdDuration::from_secs(5);
const HOUSEKEEPING_EVERY_N_TICKS: u64 = 500;
const STALE_AFTER: chrono::Duration = chrono::Duration::minutes(10);

/// The control loop (§4.5): one cooperative scheduler task, ticking every 5s, that
/// drives actions and their operations through their state machines and spawns/reaps
/// Launch/Verify workers.
pub struct Scheduler {
    store: Arc<dyn StateStore>,
    worker_ctx: WorkerContext,
    quit_registry: AsyncMutex<HashMap<Uuid, QuitSender>>,
    tick_count: AtomicU64,
    days_to_keep_actions: Option<u64>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn StateStore>, worker_ctx: WorkerContext, days_to_keep_actions: Option<u64>) -> Self {
        Self {
            store,
            worker_ctx,
            quit_registry: AsyncMutex::new(HashMap::new()),
            tick_count: AtomicU64::new(0),
            days_to_keep_actions,
        }
    }

    /// Runs the control loop forever at the fixed tick interval. The first tick
    /// bypasses the 10-minute staleness check for `inProgress`/`verifying` operations
    /// (§5 Crash recovery).
    pub async fn run(self: Arc<Self>) {
        let mut restart = true;
        loop {
            if let Err(err) = self.tick(restart).await {
                error!(error = %err, "scheduler tick failed, retrying next tick");
            }
            restart = false;
            sleep(TICK_INTERVAL).await;
        }
    }

    pub async fn tick(&self, restart: bool) -> Result<(), SchedulerError> {
        let n = self.tick_count.fetch_add(1, Ordering::Relaxed) + 1;
        if n % HOUSEKEEPING_EVERY_N_TICKS == 0 {
            self.housekeeping().await?;
        }

        let mut actions: Vec<Action> = self
            .store
            .list_actions()
            .await?
            .into_iter()
            .filter(|a| !matches!(a.state, ActionState::New | ActionState::Completed | ActionState::Aborted))
            .collect();
        actions.sort_by_key(|a| a.id);

        let mut last_running_action: Option<Uuid> = None;
        for action in &mut actions {
            match action.state {
                ActionState::AbortSignaled => self.handle_abort_signaled(action).await?,
                ActionState::Running => self.handle_running(action, &mut last_running_action, restart).await?,
                ActionState::Configured => self.handle_configured(action, &mut last_running_action)?,
                ActionState::Blocked => self.handle_blocked(action).await?,
                ActionState::New | ActionState::Completed | ActionState::Aborted => unreachable!(),
            }
            self.store.put_action(action).await?;
        }
        Ok(())
    }

    async fn housekeeping(&self) -> Result<(), SchedulerError> {
        let now = Utc::now();
        for snapshot in self.store.list_snapshots().await? {
            if snapshot.is_expired() {
                debug!(name = %snapshot.name, "deleting expired snapshot");
                self.store.delete_snapshot(&snapshot.name).await?;
            }
        }
        if let Some(days) = self.days_to_keep_actions {
            let cutoff = now - chrono::Duration::days(days as i64);
            for action in self.store.list_actions().await? {
                let old_enough = action.end_time.map(|t| t < cutoff).unwrap_or(false);
                if action.state.is_terminal() && old_enough {
                    debug!(action_id = %action.id, "deleting retained action past retention window");
                    self.store.delete_action(action.id).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_abort_signaled(&self, action: &mut Action) -> Result<(), SchedulerError> {
        let mut operations = self.store.list_operations_for_action(action.id).await?;
        {
            let mut registry = self.quit_registry.lock().await;
            for op in &mut operations {
                if op.state.is_terminal() {
                    continue;
                }
                if let Some(sender) = registry.remove(&op.id) {
                    let _ = sender.try_send(());
                } else {
                    op.transition_abort()?;
                    self.store.put_operation(op).await?;
                }
                self.release_lock_best_effort(op).await;
            }
        }
        action.transition_abort()?;
        Ok(())
    }

    async fn handle_running(
        &self,
        action: &mut Action,
        last_running_action: &mut Option<Uuid>,
        restart: bool,
    ) -> Result<(), SchedulerError> {
        if last_running_action.is_none() {
            *last_running_action = Some(action.id);
        }

        let mut operations = self.store.list_operations_for_action(action.id).await?;
        for op in operations.iter().filter(|o| !o.state.is_terminal()) {
            self.maybe_spawn_worker(op, restart).await?;
        }

        let before: HashMap<Uuid, OperationState> = operations.iter().map(|o| (o.id, o.state)).collect();
        refresh_operation_blocks(&mut operations)?;
        for op in operations.iter().filter(|o| before.get(&o.id) != Some(&o.state)) {
            self.store.put_operation(op).await?;
        }

        if operations.iter().all(|o| o.state.is_terminal()) {
            action.transition_complete()?;
            if *last_running_action == Some(action.id) {
                *last_running_action = None;
            }
        }
        Ok(())
    }

    fn handle_configured(&self, action: &mut Action, last_running_action: &mut Option<Uuid>) -> Result<(), SchedulerError> {
        if last_running_action.is_none() {
            action.transition_start()?;
            *last_running_action = Some(action.id);
        } else {
            let blocker = last_running_action.expect("checked above");
            action.transition_block(blocker)?;
        }
        Ok(())
    }

    async fn handle_blocked(&self, action: &mut Action) -> Result<(), SchedulerError> {
        let mut all_clear = true;
        for blocker_id in action.blocked_by.clone() {
            match self.store.get_action(blocker_id).await? {
                Some(blocker) if blocker.state.is_terminal() => {}
                _ => {
                    all_clear = false;
                    break;
                }
            }
        }
        if all_clear {
            action.transition_unblock()?;
        }
        Ok(())
    }

    /// Spawns `doLaunch`/`doVerify` for an operation that has no live worker registered,
    /// or restarts one whose `refreshTime` is stale (or on the scheduler's first tick
    /// after a restart).
    async fn maybe_spawn_worker(&self, op: &Operation, restart: bool) -> Result<(), SchedulerError> {
        let mut registry = self.quit_registry.lock().await;
        let already_running = registry.contains_key(&op.id);
        let stale = op.is_stale(STALE_AFTER);

        let should_start = match op.state {
            OperationState::Configured | OperationState::NeedsVerified => !already_running,
            OperationState::InProgress | OperationState::Verifying => !already_running && (stale || restart),
            _ => false,
        };
        if !should_start {
            return Ok(());
        }

        let (tx, rx) = quit_channel();
        registry.insert(op.id, tx);
        drop(registry);

        let ctx = self.worker_ctx.clone();
        let operation = op.clone();

        match op.state {
            OperationState::Configured | OperationState::InProgress => {
                let to_image = self.load_image(operation.to_image_id).await?;
                let command = self.load_command(operation.action_id).await?;
                tokio::spawn(async move {
                    if let Err(err) = do_launch(ctx, operation, to_image, command, rx).await {
                        error!(error = %err, "doLaunch ended with an error");
                    }
                });
            }
            OperationState::NeedsVerified | OperationState::Verifying => {
                let to_image = self.load_image(operation.to_image_id).await?;
                let from_version = operation.from_firmware_version.clone();
                tokio::spawn(async move {
                    if let Err(err) = do_verify(ctx, operation, to_image, from_version, rx).await {
                        error!(error = %err, "doVerify ended with an error");
                    }
                });
            }
            _ => {}
        }
        Ok(())
    }

    async fn load_image(&self, id: Option<Uuid>) -> Result<fwo_domain::Image, SchedulerError> {
        match id {
            Some(id) => self.store.get_image(id).await?.ok_or_else(|| {
                SchedulerError::Domain(fwo_domain::DomainError::InvalidFilter(format!("image {id} not found")))
            }),
            None => Err(SchedulerError::Domain(fwo_domain::DomainError::InvalidFilter(
                "operation has no toImageID".to_string(),
            ))),
        }
    }

    async fn load_command(&self, action_id: Uuid) -> Result<fwo_domain::Command, SchedulerError> {
        let action = self
            .store
            .get_action(action_id)
            .await?
            .ok_or_else(|| SchedulerError::Domain(fwo_domain::DomainError::InvalidActionId(action_id.to_string())))?;
        Ok(action.parameters.command)
    }

    async fn release_lock_best_effort(&self, operation: &Operation) {
        if let Err(err) = self.worker_ctx.inventory.unlock(std::slice::from_ref(&operation.xname)).await {
            warn!(operation_id = %operation.id, error = %err, "failed to release lock during abort");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwo_domain::{Action, ActionParameters};
    use fwo_inventory::InventoryClient;
    use fwo_store::MemoryStore;
    use fwo_transport::RedfishTransport;

    fn scheduler() -> Scheduler {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let inventory = Arc::new(InventoryClient::new(
            "http://sms.invalid",
            Arc::new(RedfishTransport::new_insecure().unwrap()),
            false,
        ));
        let ctx = WorkerContext::new(store.clone(), inventory, None);
        Scheduler::new(store, ctx, Some(30))
    }

    #[tokio::test]
    async fn configured_action_claims_running_token_when_free() {
        let sched = scheduler();
        let mut action = Action::new(ActionParameters::default());
        action.transition_configure().unwrap();
        sched.store.put_action(&action).await.unwrap();

        sched.tick(true).await.unwrap();

        let stored = sched.store.get_action(action.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ActionState::Running);
    }

    #[tokio::test]
    async fn second_configured_action_blocks_behind_running_one() {
        let sched = scheduler();
        let mut running = Action::new(ActionParameters::default());
        running.transition_configure().unwrap();
        running.transition_start().unwrap();
        sched.store.put_action(&running).await.unwrap();

        let mut waiting = Action::new(ActionParameters::default());
        waiting.transition_configure().unwrap();
        sched.store.put_action(&waiting).await.unwrap();

        sched.tick(true).await.unwrap();

        let stored = sched.store.get_action(waiting.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ActionState::Blocked);
        assert_eq!(stored.blocked_by, vec![running.id]);
    }

    #[tokio::test]
    async fn empty_action_completes_on_next_tick() {
        let sched = scheduler();
        let mut action = Action::new(ActionParameters::default());
        action.transition_configure().unwrap();
        action.transition_start().unwrap();
        sched.store.put_action(&action).await.unwrap();

        sched.tick(true).await.unwrap();

        let stored = sched.store.get_action(action.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ActionState::Completed);
    }
}
