use fwo_domain::{Image, Operation};
use reqwest::multipart;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::context::WorkerContext;
use crate::error::WorkerError;

/// Side effects of a vendor-specific update POST that the Verify Worker needs later.
#[derive(Debug, Default)]
pub struct VendorOutcome {
    pub task_link: Option<String>,
    pub update_info_link: Option<String>,
}

/// Launch Worker Stage 5, "Else" branch: dispatch the vendor-specific Redfish POST.
/// A ≥400 status or transport error is the caller's job to translate into `→ failed`.
pub async fn dispatch_update(
    ctx: &WorkerContext,
    op: &Operation,
    image: &Image,
    artifact_url: &str,
) -> Result<VendorOutcome, WorkerError> {
    let update_uri = op.update_uri.as_deref().unwrap_or_default();
    match op.manufacturer.to_lowercase().as_str() {
        "cray" => dispatch_cray(ctx, op, update_uri, artifact_url).await,
        "gigabyte" => dispatch_gigabyte(ctx, update_uri, artifact_url).await,
        "hpe" => dispatch_hpe(ctx, update_uri, artifact_url).await,
        "intel" => dispatch_intel(ctx, op, artifact_url).await,
        other => Err(WorkerError::UnsupportedManufacturer(other.to_string())),
    }
    .map(|outcome| {
        let _ = image;
        outcome
    })
}

async fn dispatch_cray(
    ctx: &WorkerContext,
    op: &Operation,
    update_uri: &str,
    artifact_url: &str,
) -> Result<VendorOutcome, WorkerError> {
    let target_ref = format!("{}/{}", op.inventory_uri.as_deref().unwrap_or_default(), op.target);
    let body = json!({
        "ImageURI": artifact_url,
        "TransferProtocol": "HTTP",
        "Targets": [target_ref],
    });
    let resp = ctx.http.post(update_uri).basic_auth(&op.credentials.username, Some(&op.credentials.password)).json(&body).send().await?;
    raise_for_status(resp).await?;
    Ok(VendorOutcome::default())
}

async fn dispatch_gigabyte(ctx: &WorkerContext, update_uri: &str, artifact_url: &str) -> Result<VendorOutcome, WorkerError> {
    let resolved = resolve_host_to_ip(artifact_url).await;
    let body = json!({
        "ImageURI": resolved,
        "TransferProtocol": "HTTP",
        "UpdateComponent": "UpdateComponentALL",
    });
    let resp = ctx.http.post(update_uri).json(&body).send().await?;
    raise_for_status(resp).await?;
    Ok(VendorOutcome {
        task_link: None,
        update_info_link: Some("/redfish/v1/UpdateService".to_string()),
    })
}

async fn dispatch_hpe(ctx: &WorkerContext, update_uri: &str, artifact_url: &str) -> Result<VendorOutcome, WorkerError> {
    #[derive(Deserialize)]
    struct HpeResponse {
        #[serde(rename = "TaskMonitor")]
        task_monitor: Option<String>,
        #[serde(rename = "taskLink")]
        task_link: Option<String>,
    }
    let body = json!({ "ImageURI": artifact_url });
    let resp = ctx.http.post(update_uri).json(&body).send().await?;
    let resp = raise_for_status(resp).await?;
    let parsed: HpeResponse = resp
        .json()
        .await
        .map_err(|e| WorkerError::MalformedResponse(e.to_string()))?;
    let task_link = parsed.task_monitor.or(parsed.task_link);
    Ok(VendorOutcome { task_link, update_info_link: None })
}

async fn dispatch_intel(ctx: &WorkerContext, op: &Operation, artifact_url: &str) -> Result<VendorOutcome, WorkerError> {
    let bytes = ctx.http.get(artifact_url).send().await?.bytes().await?;
    let action_uri = format!(
        "{}/{}/Actions/Oem/Intel.Oem.Update{}",
        op.inventory_uri.as_deref().unwrap_or_default(),
        op.target,
        op.target
    );
    let form = multipart::Form::new().part("upload", multipart::Part::bytes(bytes.to_vec()));
    let resp = ctx.http.post(&action_uri).multipart(form).send().await?;
    raise_for_status(resp).await?;
    Ok(VendorOutcome::default())
}

async fn raise_for_status(resp: reqwest::Response) -> Result<reqwest::Response, WorkerError> {
    if resp.status().as_u16() >= 400 {
        debug!(status = %resp.status(), "vendor update POST rejected");
        Err(WorkerError::MalformedResponse(format!("device returned status {}", resp.status())))
    } else {
        Ok(resp)
    }
}

/// Gigabyte devices do not resolve DNS themselves; substitute the artifact host with
/// an already-resolved IP address before handing it the ImageURI.
async fn resolve_host_to_ip(artifact_url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(artifact_url) else {
        return artifact_url.to_string();
    };
    let Some(host) = parsed.host_str() else {
        return artifact_url.to_string();
    };
    let port = parsed.port_or_known_default().unwrap_or(80);
    match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => {
                let mut rewritten = parsed.clone();
                let _ = rewritten.set_host(Some(&addr.ip().to_string()));
                rewritten.to_string()
            }
            None => artifact_url.to_string(),
        },
        Err(_) => artifact_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwo_domain::Operation;
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
            artifact_url: "https://nexus.local/bmc-v2.bin".into(),
            self_reboot: false,
            force_reset_type: None,
            wait_time_before_manual_reboot_seconds: 0,
            wait_time_after_reboot_seconds: 0,
            polling_speed_seconds: 5,
            allowable_device_states: vec![],
        }
    }

    #[tokio::test]
    async fn cray_dispatch_posts_targets_array() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/redfish/v1/UpdateService"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let mut op = Operation::new(Uuid::new_v4(), "x0c0s0b0", "BMC");
        op.manufacturer = "cray".into();
        op.update_uri = Some(format!("{}/redfish/v1/UpdateService", server.uri()));
        op.inventory_uri = Some(format!("{}/redfish/v1/UpdateService/FirmwareInventory", server.uri()));

        let outcome = dispatch_update(&ctx(), &op, &sample_image(), &sample_image().artifact_url).await.unwrap();
        assert!(outcome.task_link.is_none());
    }

    #[tokio::test]
    async fn unsupported_manufacturer_is_rejected() {
        let mut op = Operation::new(Uuid::new_v4(), "x0c0s0b0", "BMC");
        op.manufacturer = "dell".into();
        let err = dispatch_update(&ctx(), &op, &sample_image(), "https://nexus.local/x.bin").await.unwrap_err();
        assert!(matches!(err, WorkerError::UnsupportedManufacturer(_)));
    }

    #[tokio::test]
    async fn error_status_surfaces_as_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/redfish/v1/UpdateService"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut op = Operation::new(Uuid::new_v4(), "x0c0s0b0", "BMC");
        op.manufacturer = "cray".into();
        op.update_uri = Some(format!("{}/redfish/v1/UpdateService", server.uri()));

        let err = dispatch_update(&ctx(), &op, &sample_image(), "https://nexus.local/x.bin").await.unwrap_err();
        assert!(matches!(err, WorkerError::MalformedResponse(_)));
    }
}
