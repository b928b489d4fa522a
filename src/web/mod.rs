//! HTTP surface of the import pipeline.
//!
//! Thin handlers delegating to the service layer; errors are mapped to
//! status codes centrally via `IntoResponse` on `AppError`.

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::database::Database;
use crate::errors::AppError;
use crate::pipeline::{IntakeService, ProcessingEngine, ValidationService};
use crate::services::ImportJobService;

pub mod api;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub database: Arc<Database>,
    pub intake: Arc<IntakeService>,
    pub validation: Arc<ValidationService>,
    pub processing: Arc<ProcessingEngine>,
    pub jobs: Arc<ImportJobService>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::InvalidState { .. } => StatusCode::CONFLICT,
            AppError::TransientIo { .. }
            | AppError::Database(_)
            | AppError::Serialization(_)
            | AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr =
            format!("{}:{}", state.config.web.host, state.config.web.port).parse()?;
        let app = Self::create_router(state);
        Ok(Self { app, addr })
    }

    pub fn create_router(state: AppState) -> Router {
        // Body limit sits above the configurable per-file cap; the intake
        // service enforces the real limit with a proper error body.
        let max_upload = 256 * 1024 * 1024;
        Router::new()
            .route("/health", get(api::health))
            .nest("/api/v1/import", Self::import_routes())
            .layer(DefaultBodyLimit::max(max_upload))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    fn import_routes() -> Router<AppState> {
        Router::new()
            .route("/upload", post(api::upload))
            .route("/jobs", get(api::list_jobs))
            .route("/jobs/bulk-delete", post(api::bulk_delete_jobs))
            .route("/jobs/:id", get(api::get_job).delete(api::delete_job))
            .route("/jobs/:id/validate", post(api::validate_job))
            .route("/jobs/:id/process", post(api::process_job))
            .route("/jobs/:id/progress", get(api::job_progress))
            .route("/jobs/:id/errors", get(api::job_errors))
            .route("/jobs/:id/preview", get(api::job_preview))
            .route("/jobs/:id/export", get(api::export_job_errors))
            .route("/jobs/:id/cancel", put(api::cancel_job))
            .route("/jobs/:id/retry", put(api::retry_job))
            .route("/cleanup", post(api::cleanup_jobs))
            .route("/statistics", get(api::statistics))
            .route("/template", get(api::template))
            .route("/rules", get(api::list_rules).post(api::create_rule))
            .route(
                "/rules/:id",
                get(api::get_rule)
                    .put(api::update_rule)
                    .delete(api::delete_rule),
            )
            .route(
                "/mappings",
                get(api::list_mappings).post(api::create_mapping),
            )
            .route(
                "/mappings/:id",
                get(api::get_mapping)
                    .put(api::update_mapping)
                    .delete(api::delete_mapping),
            )
            .route(
                "/configuration",
                get(api::get_configuration).put(api::update_configuration),
            )
    }

    pub async fn serve(self) -> Result<()> {
        info!("Web server listening on {}", self.addr);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }
}
