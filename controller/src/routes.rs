use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use climate_common::{HistoryEntry, SensorReading, SettingsUpdate};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::state::{AppState, ApplyError};

const DEFAULT_HISTORY_COUNT: usize = 10;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    #[serde(alias = "size")]
    count: Option<i64>,
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/settings",
            get(handle_get_settings).put(handle_put_settings),
        )
        .route("/sensor-data", post(handle_post_sensor_data))
        .route("/graph", get(handle_get_history))
        .route("/history", get(handle_get_history))
        .route("/status", get(handle_get_status))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn handle_get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.current_settings().await)
}

async fn handle_put_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> impl IntoResponse {
    match state.apply_settings(&update, Utc::now()).await {
        Ok(settings) => Json(settings).into_response(),
        Err(ApplyError::Invalid(err)) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        Err(err) => {
            warn!("{err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist settings")
        }
    }
}

async fn handle_post_sensor_data(
    State(state): State<AppState>,
    Json(reading): Json<SensorReading>,
) -> impl IntoResponse {
    if !reading.temperature.is_finite() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    }
    Json(state.ingest(reading, Utc::now()).await).into_response()
}

async fn handle_get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let capacity = state.history_capacity().await;
    let count = match validate_count(query.count, capacity) {
        Ok(count) => count,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };

    let entries: Vec<HistoryEntry> = state
        .recent(count)
        .await
        .iter()
        .map(HistoryEntry::from)
        .collect();
    Json(entries).into_response()
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status(Utc::now()).await)
}

/// History `count` must be within `1..=capacity`; absent means the default.
fn validate_count(count: Option<i64>, capacity: usize) -> Result<usize, String> {
    let Some(count) = count else {
        return Ok(DEFAULT_HISTORY_COUNT.min(capacity));
    };
    match usize::try_from(count) {
        Ok(count) if (1..=capacity).contains(&count) => Ok(count),
        _ => Err(format!("count must be between 1 and {capacity}")),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
