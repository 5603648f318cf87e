use std::time::{Duration, Instant};

use fwo_domain::{Command, Image, Operation};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::context::WorkerContext;
use crate::error::WorkerError;
use crate::power::probe_power_state;
use crate::vendor::dispatch_update;
use crate::QuitReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    FilePresence,
    Lock,
    PowerState,
    RestoreGate,
    Dispatch,
}

/// `doLaunch` (§4.6): drives one operation from `configured`/`inProgress` through to
/// `needsVerified`, `noSolution`, `succeeded` (dry run), or `failed`.
pub async fn do_launch(
    ctx: WorkerContext,
    mut operation: Operation,
    to_image: Image,
    command: Command,
    mut quit: QuitReceiver,
) -> Result<Operation, WorkerError> {
    if operation.transition_launch().is_err() {
        warn!(operation_id = %operation.id, "doLaunch entered from an invalid state");
        return Ok(operation);
    }
    ctx.store.put_operation(&operation).await?;

    let mut stage = Stage::FilePresence;
    let mut last_power_probe: Option<Instant> = None;
    let resolved_url = ctx.resolve_artifact_url(&to_image.artifact_url);

    loop {
        tokio::select! {
            biased;
            _ = quit.recv() => {
                operation.transition_abort()?;
                release_lock(&ctx, &operation).await;
                ctx.store.put_operation(&operation).await?;
                return Ok(operation);
            }
            _ = sleep(Duration::from_secs(1)) => {}
        }

        if operation.is_expired() {
            operation.transition_fail("time expired")?;
            release_lock(&ctx, &operation).await;
            ctx.store.put_operation(&operation).await?;
            return Ok(operation);
        }

        match stage {
            Stage::FilePresence => {
                match ctx.http.head(&resolved_url).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        stage = Stage::Lock;
                        ctx.store.put_operation(&operation).await?;
                    }
                    _ => warn!(operation_id = %operation.id, url = %resolved_url, "artifact HEAD check failed, retrying"),
                }
            }
            Stage::Lock => match ctx.inventory.lock(std::slice::from_ref(&operation.xname)).await {
                Ok(()) => {
                    stage = Stage::PowerState;
                    ctx.store.put_operation(&operation).await?;
                }
                Err(err) => warn!(operation_id = %operation.id, error = %err, "lock acquisition failed, retrying"),
            },
            Stage::PowerState => {
                if to_image.allowable_device_states.is_empty() {
                    stage = Stage::RestoreGate;
                    continue;
                }
                let due = last_power_probe
                    .map(|t| t.elapsed() >= Duration::from_secs(to_image.polling_speed_seconds))
                    .unwrap_or(true);
                if due {
                    last_power_probe = Some(Instant::now());
                    match probe_power_state(&ctx, &operation).await {
                        Ok(state) if to_image.allowable_device_states.iter().any(|s| s == &state) => {
                            stage = Stage::RestoreGate;
                            ctx.store.put_operation(&operation).await?;
                        }
                        Ok(state) => info!(operation_id = %operation.id, %state, "power state not yet allowable"),
                        Err(err) => warn!(operation_id = %operation.id, error = %err, "power state probe failed"),
                    }
                }
            }
            Stage::RestoreGate => {
                if operation.from_image_id.is_none() && !command.restore_not_possible_override {
                    operation.transition_no_solution("cannot perform the update")?;
                    release_lock(&ctx, &operation).await;
                    ctx.store.put_operation(&operation).await?;
                    return Ok(operation);
                }
                stage = Stage::Dispatch;
            }
            Stage::Dispatch => {
                if !command.override_dryrun {
                    operation.transition_succeed(format!(
                        "dry run candidate image noted: {}",
                        to_image.firmware_version
                    ))?;
                    ctx.store.put_operation(&operation).await?;
                    return Ok(operation);
                }

                match dispatch_update(&ctx, &operation, &to_image, &resolved_url).await {
                    Ok(outcome) => {
                        operation.task_link = outcome.task_link;
                        operation.update_info_link = outcome.update_info_link;
                        operation.transition_needs_verified("update complete, needs verification")?;
                        ctx.store.put_operation(&operation).await?;
                        return Ok(operation);
                    }
                    Err(err) => {
                        operation.transition_fail(err.to_string())?;
                        release_lock(&ctx, &operation).await;
                        ctx.store.put_operation(&operation).await?;
                        return Ok(operation);
                    }
                }
            }
        }
    }
}

async fn release_lock(ctx: &WorkerContext, operation: &Operation) {
    if let Err(err) = ctx.inventory.unlock(std::slice::from_ref(&operation.xname)).await {
        warn!(operation_id = %operation.id, error = %err, "failed to release lock");
    }
}
