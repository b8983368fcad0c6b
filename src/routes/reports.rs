use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::store::Snapshot;
use crate::week::is_canonical_week_key;

#[derive(Debug, Serialize)]
pub struct HistorySummary {
    pub week: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub total_reports: usize,
    pub weeks: Vec<String>,
    pub reports_summary: Vec<HistorySummary>,
}

async fn latest_or_not_found(state: &AppState) -> AppResult<Snapshot> {
    state.service.latest().await.ok_or_else(|| {
        AppError::NotFound("No reports generated yet, POST /api/generate first".into())
    })
}

pub async fn latest_report(State(state): State<AppState>) -> AppResult<Json<Snapshot>> {
    Ok(Json(latest_or_not_found(&state).await?))
}

pub async fn reports_history(State(state): State<AppState>) -> Json<HistoryResponse> {
    let history = state.service.history().await;

    let reports_summary: Vec<HistorySummary> = history
        .into_iter()
        .map(|entry| HistorySummary {
            url: format!("/api/reports/{}", entry.week_key),
            week: entry.week_key,
            timestamp: entry.created_at,
        })
        .collect();

    Json(HistoryResponse {
        total_reports: reports_summary.len(),
        weeks: reports_summary.iter().map(|s| s.week.clone()).collect(),
        reports_summary,
    })
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(week_key): Path<String>,
) -> AppResult<Json<Snapshot>> {
    if !is_canonical_week_key(&week_key) {
        return Err(AppError::Validation(format!(
            "invalid week key {week_key:?}, use YYYY-Www"
        )));
    }

    let snapshot = state
        .service
        .get(&week_key)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Report {week_key} not found")))?;

    Ok(Json(snapshot))
}

pub async fn generate_report(
    State(state): State<AppState>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let snapshot = state.service.generate().await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "message": "Report generated successfully",
            "report": snapshot,
        })),
    ))
}

pub async fn export_report(
    State(state): State<AppState>,
    Path(format): Path<String>,
) -> AppResult<impl IntoResponse> {
    if format != "json" {
        return Err(AppError::Validation(format!(
            "format {format:?} not supported, use: json"
        )));
    }

    let snapshot = latest_or_not_found(&state).await?;
    let disposition = format!(
        "attachment; filename=\"report-{}.json\"",
        snapshot.week_key
    );

    Ok((
        [(header::CONTENT_DISPOSITION, disposition)],
        Json(snapshot.payload),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    use crate::error::ProductionError;
    use crate::routes::router;
    use crate::scheduler::SchedulerOptions;
    use crate::service::ReportService;
    use crate::store::{MemoryBackend, SnapshotStore};
    use crate::test_support::{CountingProducer, payload};

    fn app_with(producer: CountingProducer) -> (Router, Arc<ReportService>) {
        let store = Arc::new(SnapshotStore::open(Arc::new(MemoryBackend::new())));
        let service = Arc::new(ReportService::new(
            store,
            Arc::new(producer),
            SchedulerOptions {
                generation_timeout: Duration::from_millis(200),
                ..SchedulerOptions::default()
            },
        ));
        let app = router(AppState {
            service: service.clone(),
        });
        (app, service)
    }

    async fn seed(service: &ReportService, week_key: &str, message: &str) {
        service
            .store()
            .put(Snapshot {
                week_key: week_key.to_string(),
                created_at: Utc.with_ymd_and_hms(2025, 10, 6, 8, 0, 0).unwrap(),
                payload: payload(message),
            })
            .await
            .unwrap();
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_latest_report_empty_store() {
        let (app, _) = app_with(CountingProducer::ok(payload("ok")));
        let (status, body) = send(app, "GET", "/api/latest-report").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_generate_then_read_back() {
        let (app, _) = app_with(CountingProducer::ok(payload("ok")));

        let (status, body) = send(app.clone(), "POST", "/api/generate").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "success");
        let week_key = body["report"]["week_key"].as_str().unwrap().to_string();

        let (status, latest) = send(app.clone(), "GET", "/api/latest-report").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(latest["week_key"], week_key.as_str());
        assert_eq!(latest["payload"]["message"], "ok");

        let (status, by_key) = send(app, "GET", &format!("/api/reports/{week_key}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(by_key, latest);
    }

    #[tokio::test]
    async fn test_history_lists_newest_first() {
        let (app, service) = app_with(CountingProducer::ok(payload("ok")));
        seed(&service, "2024-W52", "old").await;
        seed(&service, "2025-W40", "new").await;

        let (status, body) = send(app, "GET", "/api/reports/history").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_reports"], 2);
        assert_eq!(body["weeks"], json!(["2025-W40", "2024-W52"]));
        assert_eq!(body["reports_summary"][0]["url"], "/api/reports/2025-W40");
        assert_eq!(body["reports_summary"][1]["timestamp"], "2025-10-06T08:00:00Z");
    }

    #[tokio::test]
    async fn test_get_report_missing_and_malformed_key() {
        let (app, _) = app_with(CountingProducer::ok(payload("ok")));

        let (status, _) = send(app.clone(), "GET", "/api/reports/2025-W40").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(app, "GET", "/api/reports/latest").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
    }

    #[tokio::test]
    async fn test_generate_busy_is_conflict() {
        let (app, _) = app_with(
            CountingProducer::ok(payload("ok")).with_delay(Duration::from_millis(150)),
        );

        let (first, second) = tokio::join!(send(app.clone(), "POST", "/api/generate"), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            send(app.clone(), "POST", "/api/generate").await
        });

        assert_eq!(first.0, StatusCode::CREATED);
        assert_eq!(second.0, StatusCode::CONFLICT);
        assert_eq!(second.1["kind"], "busy");
    }

    #[tokio::test]
    async fn test_generate_timeout_is_gateway_timeout() {
        let (app, service) =
            app_with(CountingProducer::ok(payload("late")).with_delay(Duration::from_secs(5)));

        let (status, body) = send(app, "POST", "/api/generate").await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["kind"], "timeout");
        assert!(service.latest().await.is_none());
    }

    #[tokio::test]
    async fn test_generate_production_error_carries_cause() {
        let (app, _) = app_with(CountingProducer::failing(ProductionError::NoContent));

        let (status, body) = send(app, "POST", "/api/generate").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["kind"], "production_error");
        assert_eq!(body["cause"], "no_content");
    }

    #[tokio::test]
    async fn test_export_json_and_unsupported_format() {
        let (app, service) = app_with(CountingProducer::ok(payload("ok")));

        let (status, _) = send(app.clone(), "GET", "/api/export/json").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        seed(&service, "2025-W40", "exported").await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/export/json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"report-2025-W40.json\""
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"message": "exported"}));

        let (status, _) = send(app, "GET", "/api/export/pdf").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_count() {
        let (app, service) = app_with(CountingProducer::ok(payload("ok")));
        seed(&service, "2025-W40", "x").await;

        let (status, body) = send(app, "GET", "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["reports_count"], 1);
        assert_eq!(body["generating"], false);
        assert_eq!(body["timer_running"], false);
    }
}
