use axum::{http::StatusCode, response::IntoResponse, Json};

use crate::models::health::HealthStatus;

/// Process liveness only. Does not look at the database.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthStatus { status: "ok" }))
}
