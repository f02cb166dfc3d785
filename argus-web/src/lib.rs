// Argus web - HTTP control surface for the log-observability agent.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use argus_core::Agent;

pub mod error_handling;
pub mod handlers;
pub mod routes;

use error_handling::{handle_404, trace_request};

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
}

pub fn create_app(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .nest("/api", routes::api_routes())
        .fallback(handle_404)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(trace_request))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(AppState { agent })
}
