//! Survey statistics job server library
//!
//! This library provides the components of the survey statistics service:
//! configuration, the worker pool coordinator, the job and result stores,
//! and the HTTP handlers wired into an axum router.

// Core modules
pub mod config;
pub mod coordinator;
pub mod handlers;
pub mod job_store;
pub mod metrics;
pub mod results;
pub mod worker;

// Re-export commonly used types
pub use config::ServerConfig;
pub use coordinator::{JobLookup, PoolCoordinator};
pub use job_store::{JobStatus, JobStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: std::sync::Arc<PoolCoordinator>,
    pub config: std::sync::Arc<ServerConfig>,
}

/// Create the main application router
pub fn create_router(state: AppState) -> axum::Router {
    use crate::handlers::*;
    use axum::routing::{get, post};
    use tower::ServiceBuilder;
    use tower_http::{cors::CorsLayer, trace::TraceLayer};

    axum::Router::new()
        // Landing pages
        .route("/", get(index_handler))
        .route("/index", get(index_handler))
        // Task submission endpoints, one per aggregation kind
        .route("/api/states_mean", post(states_mean_handler))
        .route("/api/state_mean", post(state_mean_handler))
        .route("/api/best5", post(best5_handler))
        .route("/api/worst5", post(worst5_handler))
        .route("/api/global_mean", post(global_mean_handler))
        .route("/api/diff_from_mean", post(diff_from_mean_handler))
        .route("/api/state_diff_from_mean", post(state_diff_from_mean_handler))
        .route("/api/mean_by_category", post(mean_by_category_handler))
        .route(
            "/api/state_mean_by_category",
            post(state_mean_by_category_handler),
        )
        // Job status and control endpoints
        .route("/api/get_results/:job_id", get(get_results_handler))
        .route("/api/jobs", get(jobs_handler))
        .route("/api/num_jobs", get(num_jobs_handler))
        .route("/api/graceful_shutdown", get(graceful_shutdown_handler))
        // Health and monitoring endpoints
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Apply middleware layers in order (bottom to top)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
