use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// RFC 7807 `application/problem+json` body for every `>= 400` response (§6 "Error body").
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, detail: detail.into() }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, detail: detail.into() }
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        ApiError { status: StatusCode::CONFLICT, detail: detail.into() }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, detail: detail.into() }
    }

    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        ApiError { status: StatusCode::SERVICE_UNAVAILABLE, detail: detail.into() }
    }

    fn title(status: StatusCode) -> &'static str {
        match status {
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::CONFLICT => "Conflict",
            StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
            _ => "Internal Server Error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": self.status.as_u16(),
            "title": Self::title(self.status),
            "detail": self.detail,
        }));
        (self.status, [("content-type", "application/problem+json")], body).into_response()
    }
}

impl From<fwo_domain::DomainError> for ApiError {
    fn from(e: fwo_domain::DomainError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

impl From<fwo_store::StoreError> for ApiError {
    fn from(e: fwo_store::StoreError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<fwo_planner::PlannerError> for ApiError {
    fn from(e: fwo_planner::PlannerError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<fwo_inventory::InventoryError> for ApiError {
    fn from(e: fwo_inventory::InventoryError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<fwo_snapshot::SnapshotError> for ApiError {
    fn from(e: fwo_snapshot::SnapshotError) -> Self {
        match e {
            fwo_snapshot::SnapshotError::Conflict(name) => {
                ApiError::conflict(format!("snapshot '{name}' already exists"))
            }
            fwo_snapshot::SnapshotError::NotFound(name) => {
                ApiError::not_found(format!("snapshot '{name}' not found"))
            }
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<fwo_validate::ValidateError> for ApiError {
    fn from(e: fwo_validate::ValidateError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}
