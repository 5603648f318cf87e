use std::collections::HashMap;
use std::sync::Arc;

use fwo_domain::{DeviceRecord, DiscoveryStatus, StateComponentFilter, TargetVersion};
use fwo_transport::{RedfishTransport, TaskTemplate};
use reqwest::Method;
use serde::Deserialize;
use tracing::warn;

use crate::error::InventoryError;

/// First vendor-specific chassis path that returns a usable `Model` field wins and
/// defines the device's manufacturer label. Order matches the probe list in
/// `internal/hsm/state_manager.go`.
const VENDOR_PROBES: &[(&str, &str)] = &[
    ("cray", "/redfish/v1/Chassis/Enclosure"),
    ("gigabyte", "/redfish/v1/Chassis/Self"),
    ("hpe", "/redfish/v1/Chassis/1"),
    ("intel", "/redfish/v1/Chassis/RackMount"),
];

#[derive(Debug, Deserialize)]
struct ChassisProbeResponse {
    #[serde(rename = "Model")]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TargetMembersResponse {
    #[serde(rename = "Members", default)]
    members: Vec<TargetMember>,
}

#[derive(Debug, Deserialize)]
struct TargetMember {
    target: String,
    #[serde(rename = "targetName")]
    target_name: String,
    version: String,
    #[serde(rename = "softwareId")]
    software_id: Option<String>,
}

/// HSM-style client: enumerates components, resolves model/manufacturer and
/// update/inventory URIs, acquires/releases per-component reservations, restores
/// credentials (§4.2).
pub struct InventoryClient {
    http: reqwest::Client,
    sms_server: String,
    transport: Arc<RedfishTransport>,
    vault_enabled: bool,
}

impl InventoryClient {
    pub fn new(sms_server: impl Into<String>, transport: Arc<RedfishTransport>, vault_enabled: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            sms_server: sms_server.into(),
            transport,
            vault_enabled,
        }
    }

    /// `enumerate(filters) → map[xname → DeviceRecord]`. Empty filters mean "all".
    pub async fn enumerate(
        &self,
        filter: &StateComponentFilter,
    ) -> Result<HashMap<String, DeviceRecord>, InventoryError> {
        let url = format!("{}/State/Components/Query", self.sms_server);
        let body = serde_json::json!({
            "xnames": filter.xnames,
            "partitions": filter.partitions,
            "groups": filter.groups,
            "deviceTypes": filter.device_types,
        });

        #[derive(Deserialize)]
        struct ComponentQueryResponse {
            #[serde(default)]
            components: Vec<ComponentEntry>,
        }
        #[derive(Deserialize)]
        struct ComponentEntry {
            id: String,
            #[serde(rename = "type")]
            device_type: String,
        }

        let resp: ComponentQueryResponse = self.http.post(&url).json(&body).send().await?.json().await?;

        Ok(resp
            .components
            .into_iter()
            .map(|c| (c.id.clone(), DeviceRecord::new(c.id, c.device_type)))
            .collect())
    }

    /// `fillEndpoints(devices)`. Devices whose discovery status isn't `DiscoverOK`
    /// are retained with an attached error, never dropped silently.
    pub async fn fill_endpoints(&self, devices: &mut HashMap<String, DeviceRecord>) {
        #[derive(Deserialize)]
        struct RedfishEndpoint {
            #[serde(rename = "FQDN")]
            fqdn: Option<String>,
            #[serde(rename = "DiscoveryInfo")]
            discovery_info: Option<DiscoveryInfo>,
        }
        #[derive(Deserialize)]
        struct DiscoveryInfo {
            #[serde(rename = "LastDiscoveryStatus")]
            last_discovery_status: String,
        }

        for (xname, device) in devices.iter_mut() {
            let url = format!("{}/Inventory/RedfishEndpoints/{xname}", self.sms_server);
            match self.http.get(&url).send().await {
                Ok(resp) => match resp.json::<RedfishEndpoint>().await {
                    Ok(endpoint) => {
                        device.fqdn = endpoint.fqdn;
                        let status = endpoint
                            .discovery_info
                            .map(|d| parse_discovery_status(&d.last_discovery_status))
                            .unwrap_or(DiscoveryStatus::NotYetDiscovered);
                        if status != DiscoveryStatus::DiscoverOk {
                            device.push_error(format!("{xname} discovery status: {status}"));
                        }
                        device.discovery_status = Some(status);
                    }
                    Err(err) => device.push_error(format!("malformed redfish endpoint response: {err}")),
                },
                Err(err) => device.push_error(format!("failed to fetch redfish endpoint: {err}")),
            }
        }
    }

    /// `fillUpdateService(devices)`: discover `updateURI` and `inventoryURI`.
    pub async fn fill_update_service(&self, devices: &mut HashMap<String, DeviceRecord>) {
        for (xname, device) in devices.iter_mut() {
            let Some(fqdn) = device.fqdn.clone() else {
                device.push_error("no FQDN resolved, cannot derive update/inventory URIs".to_string());
                continue;
            };
            device.update_uri = Some(format!("https://{fqdn}/redfish/v1/UpdateService"));
            device.inventory_uri = Some(format!(
                "https://{fqdn}/redfish/v1/UpdateService/FirmwareInventory"
            ));
            let _ = xname;
        }
    }

    /// `fillModelManufacturer(devices)`: probe vendor chassis paths in order; the
    /// first that yields a `Model` wins.
    pub async fn fill_model_manufacturer(&self, devices: &mut HashMap<String, DeviceRecord>) {
        for (xname, device) in devices.iter_mut() {
            let Some(fqdn) = device.fqdn.clone() else {
                continue;
            };
            for (manufacturer, path) in VENDOR_PROBES {
                let template = TaskTemplate {
                    method: Method::GET,
                    url: format!("https://{fqdn}{path}"),
                    body: None,
                    credentials: device.credentials.clone(),
                };
                let tasks = self.transport.create_task_list(template, 1);
                let mut rx = self.transport.launch(tasks).await;
                if let Some(completed) = rx.recv().await {
                    if let Ok(value) = completed.result {
                        if let Ok(probe) = serde_json::from_value::<ChassisProbeResponse>(value) {
                            if let Some(model) = probe.model {
                                device.model = Some(model);
                                device.manufacturer = Some((*manufacturer).to_string());
                                break;
                            }
                        }
                    }
                }
            }
            if device.manufacturer.is_none() {
                warn!(xname, "no vendor chassis probe returned a usable model");
            }
        }
    }

    /// `enumerateTargets(devices) → [(xname, target, targetName, version)]`.
    pub async fn enumerate_targets(
        &self,
        devices: &HashMap<String, DeviceRecord>,
    ) -> Vec<TargetVersion> {
        let mut out = Vec::new();
        for (xname, device) in devices {
            let Some(inventory_uri) = &device.inventory_uri else {
                continue;
            };
            let template = TaskTemplate {
                method: Method::GET,
                url: inventory_uri.clone(),
                body: None,
                credentials: device.credentials.clone(),
            };
            let tasks = self.transport.create_task_list(template, 1);
            let mut rx = self.transport.launch(tasks).await;
            if let Some(completed) = rx.recv().await {
                match completed.result {
                    Ok(value) => match serde_json::from_value::<TargetMembersResponse>(value) {
                        Ok(parsed) => {
                            for member in parsed.members {
                                out.push(TargetVersion {
                                    xname: xname.clone(),
                                    target: member.target,
                                    target_name: member.target_name,
                                    version: member.version,
                                    software_id: member.software_id,
                                });
                            }
                        }
                        Err(err) => warn!(xname, error = %err, "malformed firmware inventory response"),
                    },
                    Err(err) => warn!(xname, error = %err, "failed to enumerate targets"),
                }
            }
        }
        out
    }

    /// `restoreCredentials(device)`: re-read username/password from the credentials
    /// store if enabled.
    pub async fn restore_credentials(&self, device: &mut DeviceRecord) -> Result<(), InventoryError> {
        if !self.vault_enabled {
            return Ok(());
        }
        let url = format!("{}/Credentials/{}", self.sms_server, device.xname);
        #[derive(Deserialize)]
        struct CredentialResponse {
            username: String,
            password: String,
        }
        let creds: CredentialResponse = self.http.get(&url).send().await?.json().await?;
        device.credentials.username = creds.username;
        device.credentials.password = creds.password;
        Ok(())
    }

    /// `lock(xnames)`: acquire per-component reservations. Idempotent.
    pub async fn lock(&self, xnames: &[String]) -> Result<(), InventoryError> {
        if xnames.is_empty() {
            return Ok(());
        }
        let url = format!("{}/Reservations/Acquire", self.sms_server);
        self.http
            .post(&url)
            .json(&serde_json::json!({ "xnames": xnames }))
            .send()
            .await?;
        Ok(())
    }

    /// `unlock(xnames)`: release per-component reservations. Idempotent.
    pub async fn unlock(&self, xnames: &[String]) -> Result<(), InventoryError> {
        if xnames.is_empty() {
            return Ok(());
        }
        let url = format!("{}/Reservations/Release", self.sms_server);
        self.http
            .post(&url)
            .json(&serde_json::json!({ "xnames": xnames }))
            .send()
            .await?;
        Ok(())
    }

    /// `ping()`: lightweight reachability check against the inventory service, for
    /// `/service/status/details`.
    pub async fn ping(&self) -> Result<(), InventoryError> {
        let url = format!("{}/service/values/class", self.sms_server);
        self.http.get(&url).send().await?;
        Ok(())
    }
}

fn parse_discovery_status(raw: &str) -> DiscoveryStatus {
    match raw {
        "DiscoverOK" => DiscoveryStatus::DiscoverOk,
        "HTTPsGetFailed" => DiscoveryStatus::HttpsGetFailed,
        "ChildVerificationFailed" => DiscoveryStatus::ChildVerificationFailed,
        _ => DiscoveryStatus::NotYetDiscovered,
    }
}
