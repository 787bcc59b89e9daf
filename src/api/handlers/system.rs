use super::AppState;
use crate::api::models::HealthResponse;
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;

/// Handler for GET /health
///
/// Reports 503 when the store does not answer a trivial query.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = state
        .db
        .execute(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
        .await;

    let (status, database) = match database {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!(error = %e, "Health check database probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };

    (
        status,
        Json(HealthResponse {
            status: if status == StatusCode::OK { "ok" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: database.to_string(),
            timestamp: Utc::now().timestamp(),
        }),
    )
}
