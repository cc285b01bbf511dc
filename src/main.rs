//! FIR Intake - complaint narrative to structured incident report server.

mod error;
mod extractor;
mod format;
mod llm;
mod pipeline;
mod schema;
mod signals;
mod summary;
mod validator;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use error::{PipelineError, ValidationError};
use llm::OpenRouterClient;
use pipeline::{Pipeline, ProcessOutcome};
use schema::{FieldDef, Schema};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator::Delta;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fir_intake=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load the field schema
    let schema_path =
        std::env::var("FIR_SCHEMA_PATH").unwrap_or_else(|_| "schemas/fir.json".to_string());
    let schema = Arc::new(Schema::load(std::path::Path::new(&schema_path))?);

    // Initialize the completion client
    let client = OpenRouterClient::from_env()?;
    info!("Completion client initialized");

    let state = AppState {
        pipeline: Arc::new(Pipeline::new(schema, Arc::new(client))),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/schema", get(get_schema))
        .route("/process", post(process_complaint))
        .route("/process/:id/reconcile", post(reconcile))
        .route("/process/:id/report", get(get_report))
        .route("/process/:id/export", get(export_report))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    info!("Server listening on http://0.0.0.0:3000");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Expose the loaded field schema.
async fn get_schema(State(state): State<AppState>) -> Json<Vec<FieldDef>> {
    Json(state.pipeline.schema().fields().to_vec())
}

#[derive(serde::Deserialize)]
struct ProcessRequest {
    text: String,
}

/// Run extraction over a complaint narrative.
async fn process_complaint(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessOutcome>, (StatusCode, String)> {
    if request.text.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "empty complaint text".to_string()));
    }
    Ok(Json(state.pipeline.process(&request.text).await))
}

#[derive(serde::Deserialize)]
struct ReconcileRequest {
    values: Delta,
    #[serde(default, rename = "override")]
    override_existing: bool,
}

/// Merge user-supplied values for missing mandatory fields.
async fn reconcile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<ProcessOutcome>, Response> {
    state
        .pipeline
        .reconcile(&id, &request.values, request.override_existing)
        .await
        .map(Json)
        .map_err(pipeline_error_response)
}

/// Display form of a finalized report.
async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<format::DisplayReport>, Response> {
    state
        .pipeline
        .report(&id)
        .map(Json)
        .map_err(pipeline_error_response)
}

#[derive(serde::Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

/// Download a finalized report as JSON or a plain-text report.
async fn export_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, Response> {
    let format = query.format.as_deref().unwrap_or("json");
    let (bytes, content_type) = state
        .pipeline
        .export(&id, format)
        .map_err(pipeline_error_response)?;

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

// ============================================================================
// Error mapping
// ============================================================================

fn pipeline_error_response(error: PipelineError) -> Response {
    let (status, body) = match &error {
        PipelineError::UnknownId(_) => (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": error.to_string() }),
        ),
        PipelineError::AlreadyFinalized | PipelineError::NotFinalized => (
            StatusCode::CONFLICT,
            serde_json::json!({ "error": error.to_string() }),
        ),
        PipelineError::InvalidValues(errors) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({
                "error": "invalid values",
                "fields": errors.iter().map(validation_error_json).collect::<Vec<_>>(),
            }),
        ),
        PipelineError::Export(_) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": error.to_string() }),
        ),
    };
    (status, Json(body)).into_response()
}

fn validation_error_json(error: &ValidationError) -> serde_json::Value {
    match error {
        ValidationError::InvalidValue { path, reason } => {
            serde_json::json!({ "path": path, "reason": reason })
        }
        ValidationError::MissingMandatory(paths) => {
            serde_json::json!({ "paths": paths, "reason": "missing mandatory fields" })
        }
    }
}
