use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use domain::{Session, SessionId, SessionSummary};

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Deserialize)]
struct CreateGamePayload {
    name: String,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: String,
}

/// 升级参数；旧客户端使用 `gameId`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsQuery {
    session_id: Option<String>,
    game_id: Option<String>,
}

impl WsQuery {
    fn session(self) -> Option<SessionId> {
        self.session_id.or(self.game_id).map(SessionId::from)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/games", get(list_games).post(create_game))
        .route("/games/{id}", get(get_game).delete(delete_game))
        .route("/ws", get(websocket_upgrade))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// 未配置来源时允许任意来源
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn create_game(
    State(state): State<AppState>,
    Json(payload): Json<CreateGamePayload>,
) -> Result<(StatusCode, Json<SessionSummary>), ApiError> {
    let summary = state.sessions.create(payload.name).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn list_games(State(state): State<AppState>) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    Ok(Json(state.sessions.list().await?))
}

async fn get_game(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let session = state.sessions.get(&SessionId::from(id)).await?;
    Ok(Json(session))
}

async fn delete_game(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageBody>, ApiError> {
    state.sessions.delete(&SessionId::from(id.clone())).await?;
    Ok(Json(MessageBody {
        message: format!("Game with ID {} deleted", id),
    }))
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let connection = WebSocketConnection::new(state, query.session());
    ws.on_upgrade(move |socket| connection.run(socket))
}
