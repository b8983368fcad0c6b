use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde_json::{Value, json};

use crate::AppState;
use crate::scheduler::SchedulerState;

const API_VERSION: &str = "2.0";

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let scheduler_state = state.service.state().await;

    Json(json!({
        "status": "healthy",
        "service": "weekly-report-service",
        "timestamp": Utc::now(),
        "reports_count": state.service.store().len().await,
        "generating": scheduler_state == SchedulerState::Generating,
        "timer_running": state.service.scheduler().timer_running().await,
        "api_version": API_VERSION,
    }))
}

pub async fn api_info() -> Json<Value> {
    Json(json!({
        "name": "Weekly Economic Reports API",
        "version": API_VERSION,
        "description": "REST API for weekly economic reports",
        "endpoints": {
            "GET /api/latest-report": "Latest report",
            "GET /api/reports/history": "Report history, newest first",
            "GET /api/reports/{week_key}": "Report for one week (YYYY-Www)",
            "POST /api/generate": "Generate a report now",
            "GET /api/export/json": "Download the latest report as JSON",
            "GET /health": "Service status",
            "GET /api": "This document",
        },
    }))
}
