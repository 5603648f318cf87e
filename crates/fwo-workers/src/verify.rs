use std::time::Duration;

use fwo_domain::{Image, Operation};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::context::WorkerContext;
use crate::error::WorkerError;
use crate::power::probe_power_state;
use crate::QuitReceiver;

const ALLOWED_TRIES: u32 = 20;
const DEFAULT_TIME_TO_WAIT: Duration = Duration::from_secs(120);

#[derive(Deserialize)]
struct TargetMembersResponse {
    #[serde(rename = "Members", default)]
    members: Vec<TargetMember>,
}

#[derive(Deserialize)]
struct TargetMember {
    target: String,
    version: String,
}

#[derive(Deserialize)]
struct GigabyteUpdateStatus {
    #[serde(rename = "State")]
    state: String,
}

#[derive(Deserialize)]
struct HpeTaskStatus {
    #[serde(rename = "TaskState")]
    task_state: String,
    #[serde(rename = "TaskStatus")]
    task_status: String,
}

/// `doVerify` (§4.7): confirms a device actually applied the firmware it was sent.
pub async fn do_verify(
    ctx: WorkerContext,
    mut operation: Operation,
    to_image: Image,
    from_firmware_version: Option<String>,
    mut quit: QuitReceiver,
) -> Result<Operation, WorkerError> {
    if operation.transition_verify().is_err() {
        warn!(operation_id = %operation.id, "doVerify entered from an invalid state");
        return Ok(operation);
    }
    ctx.store.put_operation(&operation).await?;

    if to_image.self_reboot {
        if !wait_or_quit(&mut quit, DEFAULT_TIME_TO_WAIT).await {
            return finish_aborted(&ctx, operation).await;
        }
    } else {
        if !wait_or_quit(&mut quit, Duration::from_secs(to_image.wait_time_before_manual_reboot_seconds)).await {
            return finish_aborted(&ctx, operation).await;
        }
        if let Err(err) = ctx.inventory.lock(std::slice::from_ref(&operation.xname)).await {
            warn!(operation_id = %operation.id, error = %err, "re-lock before reboot failed");
        }
        if let (Some(reset_uri), Some(reset_type)) = (&operation.reset_uri, &to_image.force_reset_type) {
            let body = json!({ "ResetType": reset_type });
            if let Err(err) = ctx.http.post(reset_uri).json(&body).send().await {
                warn!(operation_id = %operation.id, error = %err, "reset POST failed");
            }
        }
        operation.state_helper = "reboot command issued".into();
        operation.persist_touch();
        ctx.store.put_operation(&operation).await?;

        if !wait_or_quit(&mut quit, Duration::from_secs(to_image.wait_time_after_reboot_seconds)).await {
            return finish_aborted(&ctx, operation).await;
        }
        loop {
            if !wait_or_quit(&mut quit, Duration::from_secs(to_image.polling_speed_seconds)).await {
                return finish_aborted(&ctx, operation).await;
            }
            match probe_power_state(&ctx, &operation).await {
                Ok(state) if state == "On" => break,
                Ok(state) => info!(operation_id = %operation.id, %state, "waiting for device to come back on"),
                Err(err) => warn!(operation_id = %operation.id, error = %err, "power probe failed during reboot wait"),
            }
        }
    }

    for attempt in 0..ALLOWED_TRIES {
        if !wait_or_quit(&mut quit, Duration::from_secs(to_image.polling_speed_seconds)).await {
            return finish_aborted(&ctx, operation).await;
        }
        if operation.is_expired() {
            operation.transition_fail("time expired")?;
            release_lock(&ctx, &operation).await;
            ctx.store.put_operation(&operation).await?;
            return Ok(operation);
        }

        if let Some(update_info_link) = operation.update_info_link.clone() {
            match poll_gigabyte(&ctx, &update_info_link).await {
                Ok(Some(true)) => return finish_succeeded(&ctx, operation).await,
                Ok(Some(false)) => return finish_failed(&ctx, operation, "gigabyte update reported a terminal failure").await,
                Ok(None) => {}
                Err(err) => warn!(operation_id = %operation.id, error = %err, "gigabyte status poll failed"),
            }
            continue;
        }

        if let Some(task_link) = operation.task_link.clone() {
            match poll_hpe(&ctx, &task_link).await {
                Ok(Some(true)) => return finish_succeeded(&ctx, operation).await,
                Ok(Some(false)) => return finish_failed(&ctx, operation, "hpe task reported a terminal failure").await,
                Ok(None) => {}
                Err(err) => warn!(operation_id = %operation.id, error = %err, "hpe task poll failed"),
            }
            continue;
        }

        match read_current_version(&ctx, &operation).await {
            Ok(version) if version == to_image.firmware_version => {
                return finish_succeeded(&ctx, operation).await;
            }
            Ok(version) if from_firmware_version.as_deref() == Some(version.as_str()) => {
                info!(operation_id = %operation.id, attempt, "firmware version unchanged so far");
            }
            Ok(version) => {
                operation.transition_fail(format!("unexpected firmware version '{version}' after update"))?;
                release_lock(&ctx, &operation).await;
                ctx.store.put_operation(&operation).await?;
                return Ok(operation);
            }
            Err(err) => warn!(operation_id = %operation.id, error = %err, "firmware version re-read failed"),
        }
    }

    finish_failed(&ctx, operation, "Firmware update failed verification").await
}

/// Waits up to `duration`, aborting early (returns `false`) if the quit channel fires.
async fn wait_or_quit(quit: &mut QuitReceiver, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = quit.recv() => false,
        _ = sleep(duration) => true,
    }
}

async fn finish_aborted(ctx: &WorkerContext, mut operation: Operation) -> Result<Operation, WorkerError> {
    operation.transition_abort()?;
    release_lock(ctx, &operation).await;
    ctx.store.put_operation(&operation).await?;
    Ok(operation)
}

async fn finish_succeeded(ctx: &WorkerContext, mut operation: Operation) -> Result<Operation, WorkerError> {
    operation.transition_succeed("firmware verified")?;
    release_lock(ctx, &operation).await;
    ctx.store.put_operation(&operation).await?;
    Ok(operation)
}

async fn finish_failed(ctx: &WorkerContext, mut operation: Operation, helper: &str) -> Result<Operation, WorkerError> {
    operation.transition_fail(helper)?;
    release_lock(ctx, &operation).await;
    ctx.store.put_operation(&operation).await?;
    Ok(operation)
}

async fn release_lock(ctx: &WorkerContext, operation: &Operation) {
    if let Err(err) = ctx.inventory.unlock(std::slice::from_ref(&operation.xname)).await {
        warn!(operation_id = %operation.id, error = %err, "failed to release lock");
    }
}

async fn read_current_version(ctx: &WorkerContext, operation: &Operation) -> Result<String, WorkerError> {
    let inventory_uri = operation
        .inventory_uri
        .as_deref()
        .ok_or_else(|| WorkerError::MalformedResponse("no inventory URI on operation".to_string()))?;
    let resp: TargetMembersResponse = ctx.http.get(inventory_uri).send().await?.json().await.map_err(|e| WorkerError::MalformedResponse(e.to_string()))?;
    resp.members
        .into_iter()
        .find(|m| m.target == operation.target)
        .map(|m| m.version)
        .ok_or_else(|| WorkerError::MalformedResponse(format!("target '{}' not present in inventory response", operation.target)))
}

/// `Some(true)` = succeeded, `Some(false)` = terminal failure, `None` = still in progress.
async fn poll_gigabyte(ctx: &WorkerContext, update_info_link: &str) -> Result<Option<bool>, WorkerError> {
    let status: GigabyteUpdateStatus = ctx.http.get(update_info_link).send().await?.json().await.map_err(|e| WorkerError::MalformedResponse(e.to_string()))?;
    Ok(match status.state.as_str() {
        "Completed" => Some(true),
        "Failed" | "Cancelled" | "Exception" => Some(false),
        _ => None,
    })
}

async fn poll_hpe(ctx: &WorkerContext, task_link: &str) -> Result<Option<bool>, WorkerError> {
    let status: HpeTaskStatus = ctx.http.get(task_link).send().await?.json().await.map_err(|e| WorkerError::MalformedResponse(e.to_string()))?;
    Ok(match status.task_state.as_str() {
        "Completed" if status.task_status == "OK" => Some(true),
        "Completed" | "Killed" | "Exception" | "Cancelled" => Some(false),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwo_domain::OperationState;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> WorkerContext {
        WorkerContext::new(
            std::sync::Arc::new(fwo_store::MemoryStore::new()),
            std::sync::Arc::new(fwo_inventory::InventoryClient::new(
                "http://sms.invalid",
                std::sync::Arc::new(fwo_transport::RedfishTransport::new_insecure().unwrap()),
                false,
            )),
            None,
        )
    }

    fn sample_image() -> Image {
        Image {
            id: Uuid::new_v4(),
            device_type: "NodeBMC".into(),
            manufacturer: "cray".into(),
            models: vec![],
            software_ids: vec![],
            target: "BMC".into(),
            firmware_version: "v2".into(),
            semantic_version: semver::Version::parse("2.0.0").unwrap(),
            tags: vec!["default".into()],
            artifact_url: "https://nexus.local/fw.bin".into(),
            self_reboot: true,
            force_reset_type: None,
            wait_time_before_manual_reboot_seconds: 0,
            wait_time_after_reboot_seconds: 0,
            polling_speed_seconds: 1,
            allowable_device_states: vec![],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_when_version_matches_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/inventory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Members": [{"target": "BMC", "version": "v2"}]
            })))
            .mount(&server)
            .await;

        let mut op = Operation::new(Uuid::new_v4(), "x0c0s0b0", "BMC");
        op.transition_configure().unwrap();
        op.transition_launch().unwrap();
        op.transition_needs_verified("update complete").unwrap();
        op.inventory_uri = Some(format!("{}/inventory", server.uri()));

        let (_tx, rx) = mpsc::channel(1);
        let result = do_verify(ctx(), op, sample_image(), Some("v1".into()), rx).await.unwrap();
        assert_eq!(result.state, OperationState::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_on_unexpected_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/inventory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Members": [{"target": "BMC", "version": "v99"}]
            })))
            .mount(&server)
            .await;

        let mut op = Operation::new(Uuid::new_v4(), "x0c0s0b0", "BMC");
        op.transition_configure().unwrap();
        op.transition_launch().unwrap();
        op.transition_needs_verified("update complete").unwrap();
        op.inventory_uri = Some(format!("{}/inventory", server.uri()));

        let (_tx, rx) = mpsc::channel(1);
        let result = do_verify(ctx(), op, sample_image(), Some("v1".into()), rx).await.unwrap();
        assert_eq!(result.state, OperationState::Failed);
    }
}
