//! HTTP route definitions

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::app::AppState;
use crate::game::PlayerId;
use crate::payments::deposit_webhook_handler;
use crate::store::StoreError;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.client_origin))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/user/:player_id", get(user_handler))
        .route("/api/add-games/:player_id", post(add_games_handler))
        .route("/payments/deposit", post(deposit_webhook_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CLIENT_ORIGIN is `*` or a comma-separated list of origins
fn allowed_origins(client_origin: &str) -> AllowOrigin {
    if client_origin.trim() == "*" {
        return AllowOrigin::any();
    }
    let origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    AllowOrigin::list(origins)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    running_matches: usize,
    connected_players: usize,
    queue_size: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_size = state.matchmaking.queue_size().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.registry.active_matches(),
        running_matches: state.registry.running_matches().len(),
        connected_players: state.sessions.connected_players(),
        queue_size,
    })
}

// ============================================================================
// User endpoints
// ============================================================================

#[derive(Serialize)]
struct UserResponse {
    player_id: PlayerId,
    username: String,
    games_balance: i64,
    winnings: f64,
    total_earned: f64,
    created_at: Option<DateTime<Utc>>,
    debug_mode: bool,
}

async fn user_handler(
    State(state): State<AppState>,
    Path(player_id): Path<PlayerId>,
) -> Result<Json<UserResponse>, AppError> {
    let record = state
        .users
        .get(player_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {}", player_id)))?;

    Ok(Json(UserResponse {
        player_id: record.player_id,
        username: record.username,
        games_balance: record.games_balance,
        winnings: record.winnings,
        total_earned: record.total_earned,
        created_at: record.created_at,
        debug_mode: state.config.debug_mode,
    }))
}

#[derive(Deserialize)]
struct AddGamesQuery {
    #[serde(default = "default_top_up")]
    amount: i64,
}

fn default_top_up() -> i64 {
    10
}

#[derive(Serialize)]
struct AddGamesResponse {
    success: bool,
    games_balance: i64,
}

/// Free top-up, available in debug mode only
async fn add_games_handler(
    State(state): State<AppState>,
    Path(player_id): Path<PlayerId>,
    Query(query): Query<AddGamesQuery>,
) -> Result<Json<AddGamesResponse>, AppError> {
    if !state.config.debug_mode {
        return Err(AppError::Forbidden);
    }
    if query.amount <= 0 {
        return Err(AppError::BadRequest("amount must be positive".to_string()));
    }

    let record = state.users.credit_games(player_id, query.amount).await?;
    info!(player_id, amount = query.amount, "Debug top-up");
    state.sessions.send(player_id, state.user_data(&record));

    Ok(Json(AddGamesResponse {
        success: true,
        games_balance: record.games_balance,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Store(_) => StatusCode::BAD_GATEWAY,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, Json(body)).into_response()
    }
}
