use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use fwo_domain::{
    Action, ActionParameters, ActionState, Image, Operation, OperationState, Snapshot,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

fn parse_uuid(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("invalid UUID: {raw}")))
}

fn with_location(status: StatusCode, location: String, body: Value) -> Response {
    let mut resp = (status, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&location) {
        resp.headers_mut().insert(header::LOCATION, value);
    }
    resp
}

// ── Service status ─────────────────────────────────────────────────────────────

pub async fn index() -> impl IntoResponse {
    (StatusCode::OK, "firmware update orchestrator\n")
}

pub async fn service_status() -> Json<Value> {
    Json(json!({ "serviceStatus": "running" }))
}

pub async fn service_version() -> Json<Value> {
    Json(json!({ "serviceVersion": env!("CARGO_PKG_VERSION") }))
}

pub async fn service_status_details(State(state): State<AppState>) -> Response {
    let storage = match state.store.ping(Uuid::new_v4()).await {
        Ok(()) => "connected",
        Err(_) => "not connected",
    };
    let inventory = match state.inventory.ping().await {
        Ok(()) => "connected",
        Err(_) => "not connected",
    };
    let transport_ready = state.transport.is_ready().await;

    let overall_ok = storage == "connected" && inventory == "connected" && transport_ready;
    let body = json!({
        "serviceStatus": "running",
        "serviceVersion": env!("CARGO_PKG_VERSION"),
        "storageStatus": storage,
        "inventoryStatus": inventory,
        "rfTransportStatus": if transport_ready { "ready" } else { "not ready" },
    });

    let status = if overall_ok { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
    (status, Json(body)).into_response()
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .store
        .ping(Uuid::new_v4())
        .await
        .map_err(|e| ApiError::service_unavailable(e.to_string()))?;
    Ok(StatusCode::OK)
}

// ── Actions ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ActionSummary {
    #[serde(rename = "actionID")]
    action_id: Uuid,
    state: ActionState,
    #[serde(rename = "startTime")]
    start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endTime")]
    end_time: Option<DateTime<Utc>>,
    #[serde(rename = "operationCount")]
    operation_count: usize,
    errors: Vec<String>,
}

impl From<&Action> for ActionSummary {
    fn from(a: &Action) -> Self {
        ActionSummary {
            action_id: a.id,
            state: a.state,
            start_time: a.start_time,
            end_time: a.end_time,
            operation_count: a.operation_ids.len(),
            errors: a.errors.clone(),
        }
    }
}

/// Operation detail with credentials stripped out — never echoed back over the API.
#[derive(Debug, Serialize)]
struct OperationView {
    id: Uuid,
    #[serde(rename = "actionID")]
    action_id: Uuid,
    xname: String,
    target: String,
    #[serde(rename = "targetName")]
    target_name: String,
    #[serde(rename = "deviceType")]
    device_type: String,
    manufacturer: String,
    model: String,
    #[serde(rename = "fromImageID")]
    from_image_id: Option<Uuid>,
    #[serde(rename = "toImageID")]
    to_image_id: Option<Uuid>,
    state: OperationState,
    #[serde(rename = "stateHelper")]
    state_helper: String,
    #[serde(rename = "startTime")]
    start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endTime")]
    end_time: Option<DateTime<Utc>>,
    #[serde(rename = "refreshTime")]
    refresh_time: Option<DateTime<Utc>>,
    #[serde(rename = "blockedBy")]
    blocked_by: Vec<Uuid>,
}

impl From<&Operation> for OperationView {
    fn from(o: &Operation) -> Self {
        OperationView {
            id: o.id,
            action_id: o.action_id,
            xname: o.xname.clone(),
            target: o.target.clone(),
            target_name: o.target_name.clone(),
            device_type: o.device_type.clone(),
            manufacturer: o.manufacturer.clone(),
            model: o.model.clone(),
            from_image_id: o.from_image_id,
            to_image_id: o.to_image_id,
            state: o.state,
            state_helper: o.state_helper.clone(),
            start_time: o.start_time,
            end_time: o.end_time,
            refresh_time: o.refresh_time,
            blocked_by: o.blocked_by.clone(),
        }
    }
}

pub async fn list_actions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let actions = state.store.list_actions().await?;
    let summaries: Vec<ActionSummary> = actions.iter().map(ActionSummary::from).collect();
    Ok(Json(json!(summaries)))
}

pub async fn create_action(
    State(state): State<AppState>,
    Json(parameters): Json<ActionParameters>,
) -> Result<Response, ApiError> {
    fwo_validate::validate_action_parameters(&parameters)?;

    let action = Action::new(parameters);
    let action_id = action.id;
    let override_dryrun = action.parameters.command.override_dryrun;
    state.store.put_action(&action).await?;

    let planner = state.planner.clone();
    let store = state.store.clone();
    tokio::spawn(async move {
        let Ok(Some(mut action)) = store.get_action(action_id).await else {
            tracing::error!(%action_id, "planned action vanished before planning could run");
            return;
        };
        if let Err(err) = planner.plan(&mut action).await {
            tracing::error!(%action_id, error = %err, "planning failed");
        }
    });

    let body = json!({ "actionID": action_id, "overrideDryrun": override_dryrun });
    Ok(with_location(StatusCode::ACCEPTED, format!("../actions/{action_id}"), body))
}

pub async fn get_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_uuid(&id)?;
    let action = state
        .store
        .get_action(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("action '{id}' not found")))?;
    let operations = state.store.list_operations_for_action(id).await?;
    let op_summaries: Vec<Value> = operations
        .iter()
        .map(|o| json!({ "id": o.id, "xname": o.xname, "target": o.target, "state": o.state }))
        .collect();

    Ok(Json(json!({
        "actionID": action.id,
        "state": action.state,
        "startTime": action.start_time,
        "endTime": action.end_time,
        "parameters": action.parameters,
        "errors": action.errors,
        "operations": op_summaries,
    })))
}

pub async fn get_action_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_uuid(&id)?;
    state
        .store
        .get_action(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("action '{id}' not found")))?;
    let operations = state.store.list_operations_for_action(id).await?;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for op in &operations {
        *counts.entry(op.state.to_string()).or_default() += 1;
    }

    Ok(Json(json!({ "actionID": id, "total": operations.len(), "byState": counts })))
}

pub async fn get_action_operations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_uuid(&id)?;
    state
        .store
        .get_action(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("action '{id}' not found")))?;
    let operations = state.store.list_operations_for_action(id).await?;
    let views: Vec<OperationView> = operations.iter().map(OperationView::from).collect();
    Ok(Json(json!(views)))
}

pub async fn delete_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_uuid(&id)?;
    let action = state
        .store
        .get_action(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("action '{id}' not found")))?;

    if matches!(action.state, ActionState::Running | ActionState::AbortSignaled) {
        return Err(ApiError::bad_request(format!(
            "action '{id}' is {} and cannot be deleted; abort it first",
            action.state
        )));
    }

    for op_id in &action.operation_ids {
        state.store.delete_operation(*op_id).await?;
    }
    state.store.delete_action(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn abort_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_uuid(&id)?;
    let mut action = state
        .store
        .get_action(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("action '{id}' not found")))?;

    if action.state.is_terminal() {
        return Ok(StatusCode::OK);
    }

    action.transition_signal_abort()?;
    state.store.put_action(&action).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_uuid(&id)?;
    let operation = state
        .store
        .get_operation(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("operation '{id}' not found")))?;
    Ok(Json(json!(OperationView::from(&operation))))
}

pub async fn get_action_operation(
    State(state): State<AppState>,
    Path((action_id, op_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let action_id = parse_uuid(&action_id)?;
    let op_id = parse_uuid(&op_id)?;
    let operation = state
        .store
        .get_operation(op_id)
        .await?
        .filter(|o| o.action_id == action_id)
        .ok_or_else(|| ApiError::not_found(format!("operation '{op_id}' not found on action '{action_id}'")))?;
    Ok(Json(json!(OperationView::from(&operation))))
}

// ── Images ─────────────────────────────────────────────────────────────────────

pub async fn list_images(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let images = state.store.list_images().await?;
    Ok(Json(json!(images)))
}

pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_uuid(&id)?;
    let image = state
        .store
        .get_image(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("image '{id}' not found")))?;
    Ok(Json(json!(image)))
}

pub async fn create_image(
    State(state): State<AppState>,
    Json(mut image): Json<Image>,
) -> Result<Response, ApiError> {
    image.id = Uuid::new_v4();
    fwo_validate::validate_image(&image)?;
    state.store.put_image(&image).await?;
    Ok(with_location(StatusCode::CREATED, format!("../images/{}", image.id), json!(image)))
}

pub async fn replace_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut image): Json<Image>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_uuid(&id)?;
    image.id = id;
    fwo_validate::validate_image(&image)?;
    state.store.put_image(&image).await?;
    Ok(Json(json!(image)))
}

pub async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_uuid(&id)?;
    state
        .store
        .get_image(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("image '{id}' not found")))?;
    state.store.delete_image(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Snapshots ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateSnapshotBody {
    pub name: String,
    #[serde(default)]
    pub parameters: ActionParameters,
    #[serde(default)]
    pub expiration_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SnapshotSummary {
    name: String,
    #[serde(rename = "captureTime")]
    capture_time: DateTime<Utc>,
    ready: bool,
    #[serde(rename = "expirationTime")]
    expiration_time: Option<DateTime<Utc>>,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(s: &Snapshot) -> Self {
        SnapshotSummary {
            name: s.name.clone(),
            capture_time: s.capture_time,
            ready: s.ready,
            expiration_time: s.expiration_time,
        }
    }
}

pub async fn list_snapshots(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let snapshots = state.store.list_snapshots().await?;
    let summaries: Vec<SnapshotSummary> = snapshots.iter().map(SnapshotSummary::from).collect();
    Ok(Json(json!(summaries)))
}

pub async fn create_snapshot(
    State(state): State<AppState>,
    Json(body): Json<CreateSnapshotBody>,
) -> Result<Response, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("snapshot name must not be empty"));
    }
    let expiration_time = body.expiration_seconds.map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));
    let name = body.name.clone();
    state.snapshots.create(body.name, body.parameters, expiration_time).await?;
    Ok(with_location(StatusCode::CREATED, format!("../snapshots/{name}"), json!({ "name": name })))
}

pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state
        .store
        .get_snapshot(&name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("snapshot '{name}' not found")))?;
    Ok(Json(json!(snapshot)))
}

#[derive(Debug, Deserialize)]
pub struct RestoreQuery {
    pub confirm: Option<String>,
    #[serde(default, rename = "overrideDryrun")]
    pub override_dryrun: bool,
    #[serde(default, rename = "timeLimit")]
    pub time_limit: Option<u64>,
}

pub async fn restore_snapshot(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RestoreQuery>,
) -> Result<Response, ApiError> {
    let confirmed = query.confirm.as_deref() == Some("yes");
    fwo_validate::validate_restore_confirmation(confirmed)?;

    let action_id = state
        .snapshots
        .restore(&name, query.override_dryrun, query.time_limit)
        .await?;

    let body = json!({ "actionID": action_id });
    Ok(with_location(StatusCode::ACCEPTED, format!("../../actions/{action_id}"), body))
}

pub async fn delete_snapshot(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.snapshots.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
