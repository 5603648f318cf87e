use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use fwo_inventory::InventoryClient;
use fwo_planner::Planner;
use fwo_snapshot::SnapshotEngine;
use fwo_store::StateStore;
use fwo_transport::RedfishTransport;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_app(
    store: Arc<dyn StateStore>,
    inventory: Arc<InventoryClient>,
    transport: Arc<RedfishTransport>,
    planner: Arc<Planner>,
    snapshots: Arc<SnapshotEngine>,
) -> Router {
    let state = AppState {
        store,
        inventory,
        transport,
        planner,
        snapshots,
        started_at: chrono::Utc::now(),
    };

    Router::new()
        .route("/", get(handlers::index))
        .route("/ready", get(handlers::ready))
        .route("/service/status", get(handlers::service_status))
        .route("/service/version", get(handlers::service_version))
        .route("/service/status/details", get(handlers::service_status_details))
        .route("/actions", get(handlers::list_actions).post(handlers::create_action))
        .route(
            "/actions/:id",
            get(handlers::get_action).delete(handlers::delete_action),
        )
        .route("/actions/:id/status", get(handlers::get_action_status))
        .route("/actions/:id/operations", get(handlers::get_action_operations))
        .route("/actions/:id/operations/:opid", get(handlers::get_action_operation))
        .route("/actions/:id/instance", axum::routing::delete(handlers::abort_action))
        .route("/operations/:id", get(handlers::get_operation))
        .route("/images", get(handlers::list_images).post(handlers::create_image))
        .route(
            "/images/:id",
            get(handlers::get_image)
                .put(handlers::replace_image)
                .delete(handlers::delete_image),
        )
        .route("/snapshots", get(handlers::list_snapshots).post(handlers::create_snapshot))
        .route(
            "/snapshots/:name",
            get(handlers::get_snapshot).delete(handlers::delete_snapshot),
        )
        .route("/snapshots/:name/restore", post(handlers::restore_snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use fwo_store::MemoryStore;
    use tower::util::ServiceExt;

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn test_app() -> Router {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let transport = Arc::new(RedfishTransport::new_insecure().unwrap());
        let inventory = Arc::new(InventoryClient::new("http://sms.local", transport.clone(), false));
        let planner = Arc::new(Planner::new(store.clone(), inventory.clone(), vec![]));
        let snapshots = Arc::new(SnapshotEngine::new(store.clone(), inventory.clone(), vec![]));
        build_app(store, inventory, transport, planner, snapshots)
    }

    #[tokio::test]
    async fn index_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_returns_200_on_memory_store() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn service_version_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/service/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn actions_empty_list() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/actions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn action_not_found_returns_404() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/actions/00000000-0000-0000-0000-000000000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn action_bad_uuid_returns_400() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/actions/not-a-uuid").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_action_with_duplicate_xname_returns_400() {
        let app = test_app();
        let body = serde_json::json!({
            "state_component_filter": { "xnames": ["x0c0s1b0", "x0c0s1b0"] }
        });
        let resp = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/actions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(resp).await.contains("invalid/duplicate xnames"));
    }

    #[tokio::test]
    async fn create_action_with_malformed_xname_returns_400() {
        let app = test_app();
        let body = serde_json::json!({
            "state_component_filter": { "xnames": ["badXname"] }
        });
        let resp = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/actions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(resp).await.contains("invalid/duplicate xnames"));
    }

    #[tokio::test]
    async fn create_action_returns_202_with_location() {
        let app = test_app();
        let body = serde_json::json!({});
        let resp = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/actions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(resp.headers().contains_key(header::LOCATION));
    }

    #[tokio::test]
    async fn restore_without_confirm_returns_400() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/snapshots/missing/restore")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(resp).await.contains("missing required parameter"));
    }

    #[tokio::test]
    async fn snapshot_not_found_returns_404() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/snapshots/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn images_empty_list() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/images").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
