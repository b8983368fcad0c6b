pub mod health;
pub mod reports;

use axum::Router;
use axum::routing::{get, post};

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api", get(health::api_info))
        .route("/api/latest-report", get(reports::latest_report))
        .route("/api/reports/history", get(reports::reports_history))
        .route("/api/reports/{week_key}", get(reports::get_report))
        .route("/api/generate", post(reports::generate_report))
        .route("/api/export/{format}", get(reports::export_report))
        .with_state(state)
}
