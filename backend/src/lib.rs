use axum::{routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};

pub mod automations;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod store;

pub use error::{ApiError, ApiResult, AppError};

use automations::AutomationRunner;
use store::AutomationStore;


pub struct AppState {
    pub runner: Arc<AutomationRunner>,
    pub store: Arc<dyn AutomationStore>,
    /// Cancelled on shutdown; in-flight runs stop at their next pacing wait.
    pub shutdown: CancellationToken,
}

pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Ekklesia Automations API v0.1.0" }))
        .route("/health", get(handlers::health_check))
        .route("/health/detailed", get(handlers::detailed_health_check))
        .nest("/api/v1/automations", handlers::automation_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}
