use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::handlers::health::health;

pub fn router() -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .layer(TraceLayer::new_for_http())
}
