//! API Service - Read-only status API over the mining warehouse
//!
//! Endpoints:
//! - GET /health - Database reachability
//! - GET /counts - Row counts for every staging, dimension and fact table
//! - GET /quality - Live quality report (not written to disk)
//! - GET /job-runs - Latest pipeline stage runs

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use etl::store::Table;
use etl::validate::quality_report;
use etl::{EtlError, PgWarehouse, Settings, Warehouse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ============================================================================
// State
// ============================================================================

struct AppState<W> {
    warehouse: W,
    null_threshold: u64,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct CountsResponse {
    counts: BTreeMap<&'static str, u64>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize)]
struct JobRunsQuery {
    limit: Option<i64>,
}

// ============================================================================
// Handlers
// ============================================================================

fn internal_error(e: EtlError) -> Response {
    error!(error = %e, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

async fn health_handler<W: Warehouse>(State(state): State<Arc<AppState<W>>>) -> impl IntoResponse {
    match state.warehouse.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                ok: true,
                version: env!("CARGO_PKG_VERSION"),
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                ok: false,
                version: env!("CARGO_PKG_VERSION"),
                error: Some(e.to_string()),
            }),
        ),
    }
}

async fn counts_handler<W: Warehouse>(State(state): State<Arc<AppState<W>>>) -> Response {
    let mut counts = BTreeMap::new();
    for table in Table::all() {
        match state.warehouse.row_count(table).await {
            Ok(n) => {
                counts.insert(table.name(), n);
            }
            Err(e) => return internal_error(e),
        }
    }
    Json(CountsResponse { counts }).into_response()
}

async fn quality_handler<W: Warehouse>(State(state): State<Arc<AppState<W>>>) -> Response {
    match quality_report(&state.warehouse, state.null_threshold).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn job_runs_handler<W: Warehouse>(
    State(state): State<Arc<AppState<W>>>,
    Query(params): Query<JobRunsQuery>,
) -> Response {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);

    match state.warehouse.recent_job_runs(limit).await {
        Ok(runs) => Json(serde_json::json!({ "job_runs": runs })).into_response(),
        Err(e) => internal_error(e),
    }
}

fn router<W: Warehouse + 'static>(warehouse: W, null_threshold: u64) -> Router {
    let state = Arc::new(AppState {
        warehouse,
        null_threshold,
    });

    // CORS for dashboards
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler::<W>))
        .route("/counts", get(counts_handler::<W>))
        .route("/quality", get(quality_handler::<W>))
        .route("/job-runs", get(job_runs_handler::<W>))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env().context("Invalid configuration")?;
    let db_url = settings.require_db_url()?;
    let bind = std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    let warehouse = PgWarehouse::connect(db_url, settings.db_max_connections, settings.insert_chunk_size)
        .await
        .context("Failed to connect to database")?;
    info!("Database connected");

    let app = router(warehouse, settings.null_threshold);

    info!(%bind, "API listening");
    info!("Endpoints: GET /health, /counts, /quality, /job-runs?limit=");

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
