//! HTTP routes for the signaling service.
//!
//! Defines the Axum router and application state.

use crate::actors::{RoomInfo, RoomOptions};
use crate::config::IdentitySource;
use crate::errors::HubError;
use crate::hub::SignalingHub;
use crate::observability::{health_router, HealthState};
use crate::transport::websocket::into_transport;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use common::types::{RoomId, UserId};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use signaling_protocol::{ProtocolError, MAX_MESSAGE_SIZE};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, warn};

/// Hard cap enforced by the WebSocket layer. Frames between
/// `MAX_MESSAGE_SIZE` and this cap reach the codec and get a
/// `malformed_message` reply instead of a dropped connection.
const WS_MESSAGE_LIMIT: usize = 2 * MAX_MESSAGE_SIZE;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: SignalingHub,

    /// Where connection identities come from.
    pub identity_source: IdentitySource,

    /// Header carrying the identity when `identity_source` is `Injected`.
    pub identity_header: String,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/ws` - WebSocket upgrade into the hub
/// - `/health`, `/ready` - liveness and readiness probes
/// - `/metrics` - Prometheus metrics endpoint (when a recorder is installed)
/// - `/api/v1/rooms` - pre-register a room
/// - `/api/v1/rooms/:room_id` - read-only room summary
/// - TraceLayer for request logging
/// - 30 second request timeout on the HTTP routes
pub fn build_routes(
    state: Arc<AppState>,
    health_state: Arc<HealthState>,
    metrics_handle: Option<PrometheusHandle>,
) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/rooms", post(create_room))
        .route("/api/v1/rooms/:room_id", get(get_room))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(Arc::clone(&state));

    // The upgrade stays outside the timeout; sessions outlive any request.
    let ws_routes = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state);

    let mut app = ws_routes
        .merge(api_routes)
        .merge(health_router(health_state));

    if let Some(handle) = metrics_handle {
        let metrics_routes = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(handle);
        app = app.merge(metrics_routes);
    }

    app.layer(TraceLayer::new_for_http())
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// Upgrade to a WebSocket and hand the connection to the hub.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    if !state.hub.is_accepting() {
        return HubError::Draining.into_response();
    }

    let Some(ws) = ws else {
        return (StatusCode::BAD_REQUEST, "WebSocket upgrade required").into_response();
    };

    let injected_identity = match state.identity_source {
        IdentitySource::SelfAsserted => None,
        IdentitySource::Injected => match injected_identity(&headers, &state.identity_header) {
            Some(user_id) => Some(user_id),
            None => {
                warn!(
                    target: "sig.http",
                    header = %state.identity_header,
                    "Rejected upgrade without a valid identity header"
                );
                return (StatusCode::UNAUTHORIZED, "Missing or invalid identity").into_response();
            }
        },
    };

    let hub = state.hub.clone();
    ws.max_message_size(WS_MESSAGE_LIMIT)
        .on_upgrade(move |socket| async move {
            hub.serve_connection(into_transport(socket), injected_identity)
                .await;
        })
}

fn injected_identity(headers: &HeaderMap, header: &str) -> Option<UserId> {
    let value = headers.get(header)?.to_str().ok()?;
    let user_id = UserId::from(value);
    user_id.is_valid().then_some(user_id)
}

/// Request body for `POST /api/v1/rooms`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateRoomRequest {
    pub room_id: RoomId,
    #[serde(default)]
    pub max_participants: Option<usize>,
    #[serde(default)]
    pub chat_enabled: Option<bool>,
}

/// Room summary returned by the room routes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub room_id: RoomId,
    pub member_count: usize,
    pub created_at: DateTime<Utc>,
    pub max_participants: Option<usize>,
    pub chat_enabled: bool,
}

impl From<RoomInfo> for RoomResponse {
    fn from(info: RoomInfo) -> Self {
        Self {
            room_id: info.room_id,
            member_count: info.member_count,
            created_at: info.created_at,
            max_participants: info.options.max_participants,
            chat_enabled: info.options.chat_enabled,
        }
    }
}

/// `POST /api/v1/rooms`
async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomResponse>), HubError> {
    if request.max_participants == Some(0) {
        return Err(HubError::Protocol(ProtocolError::InvalidPayload {
            message_type: "create_room",
            reason: "maxParticipants must be at least 1".to_string(),
        }));
    }

    let defaults = RoomOptions::default();
    let options = RoomOptions {
        max_participants: request.max_participants,
        chat_enabled: request.chat_enabled.unwrap_or(defaults.chat_enabled),
    };

    let info = state.hub.create_room(request.room_id, options).await?;
    debug!(target: "sig.http", room_id = %info.room_id, "Room pre-registered");

    Ok((StatusCode::CREATED, Json(info.into())))
}

/// `GET /api/v1/rooms/:room_id`
async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomResponse>, HubError> {
    let room_id = RoomId::from(room_id);
    match state.hub.room_info(room_id.clone()).await? {
        Some(info) => Ok(Json(info.into())),
        None => Err(HubError::RoomNotFound(room_id)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(identity_source: IdentitySource) -> (Router, SignalingHub) {
        let hub = SignalingHub::new(HubConfig::default());
        let state = Arc::new(AppState {
            hub: hub.clone(),
            identity_source,
            identity_header: "x-user-id".to_string(),
        });
        let health = Arc::new(HealthState::new());
        health.set_ready();
        (build_routes(state, health, None), hub)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_unknown_room_is_404() {
        let (app, _hub) = app(IdentitySource::SelfAsserted);

        let response = app
            .oneshot(
                Request::get("/api/v1/rooms/nowhere")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "room_not_found");
    }

    #[tokio::test]
    async fn test_create_then_get_room() {
        let (app, _hub) = app(IdentitySource::SelfAsserted);

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/v1/rooms")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"roomId":"standup","maxParticipants":4,"chatEnabled":false}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["roomId"], "standup");
        assert_eq!(body["memberCount"], 0);
        assert_eq!(body["maxParticipants"], 4);
        assert_eq!(body["chatEnabled"], false);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/rooms/standup")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::post("/api/v1/rooms")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"roomId":"standup"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "room_exists");
    }

    #[tokio::test]
    async fn test_create_room_rejects_bad_input() {
        let (app, _hub) = app(IdentitySource::SelfAsserted);

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/v1/rooms")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"roomId":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::post("/api/v1/rooms")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"roomId":"a","maxParticipants":0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let (app, _hub) = app(IdentitySource::SelfAsserted);

        let response = app
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ws_rejected_while_draining() {
        let (app, hub) = app(IdentitySource::SelfAsserted);
        hub.shutdown(Duration::from_secs(1)).await.unwrap();

        let response = app
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_injected_identity_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(injected_identity(&headers, "x-user-id"), None);

        headers.insert("x-user-id", " ".parse().unwrap());
        assert_eq!(injected_identity(&headers, "x-user-id"), None);

        headers.insert("x-user-id", "Alice".parse().unwrap());
        assert_eq!(
            injected_identity(&headers, "x-user-id"),
            Some(UserId::from("Alice"))
        );
    }

    #[tokio::test]
    async fn test_health_routes_merged() {
        let (app, _hub) = app(IdentitySource::SelfAsserted);

        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
