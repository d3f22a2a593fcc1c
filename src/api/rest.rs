// =============================================================================
// Status API Endpoints — Axum 0.7
// =============================================================================
//
// Read-only views of one engine under `/api/v1/`.  Every handler works from
// snapshots, so a request never holds an engine lock while serialising.
//
// CORS is configured permissively; the API exposes no control operations.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::engine::CandleEngine;
use crate::indicators::IndicatorError;
use crate::types::Series;

// =============================================================================
// Router construction
// =============================================================================

/// Build the status router with CORS middleware and the shared engine.
pub fn router(engine: Arc<CandleEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/candles", get(candles))
        .route("/api/v1/period", get(period))
        .route("/api/v1/indicators", get(indicators))
        .layer(cors)
        .with_state(engine)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    periods_closed: u64,
    server_time: i64,
}

async fn health(State(engine): State<Arc<CandleEngine>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        periods_closed: engine.periods_closed(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// History & open period
// =============================================================================

async fn candles(State(engine): State<Arc<CandleEngine>>) -> impl IntoResponse {
    Json(engine.snapshot())
}

async fn period(State(engine): State<Arc<CandleEngine>>) -> impl IntoResponse {
    Json(engine.period_snapshot())
}

// =============================================================================
// Indicators
// =============================================================================

#[derive(Deserialize)]
struct IndicatorQuery {
    length: Option<usize>,
}

#[derive(Serialize)]
struct IndicatorResponse {
    length: usize,
    sma: f64,
    ema: f64,
    wma: f64,
}

async fn indicators(
    State(engine): State<Arc<CandleEngine>>,
    Query(query): Query<IndicatorQuery>,
) -> Response {
    let length = query.length.unwrap_or(engine.config().log_ema_length);
    let history = engine.snapshot();

    let computed = (|| -> Result<IndicatorResponse, IndicatorError> {
        Ok(IndicatorResponse {
            length,
            sma: history.sma(Series::Close, length, 0)?,
            ema: history.ema(Series::Close, length)?,
            wma: history.wma(Series::Close, length)?,
        })
    })();

    match computed {
        Ok(resp) => Json(resp).into_response(),
        Err(e @ IndicatorError::InsufficientHistory { .. }) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e @ IndicatorError::ZeroLength) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
