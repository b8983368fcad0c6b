use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use opentelemetry::trace::TraceContextExt;
use serde_json::json;
use thiserror::Error;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Durable storage failure. Recoverable on read, reported on write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("failed to read snapshots: {0}")]
    Read(String),

    #[error("failed to write snapshots: {0}")]
    Write(String),

    #[error("failed to encode snapshots: {0}")]
    Encode(String),

    #[error("failed to decode snapshots: {0}")]
    Decode(String),

    #[error("storage path is unusable: {0}")]
    InvalidPath(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProductionError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream {feed} responded with status {status}")]
    Upstream { feed: String, status: u16 },

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no content available from any source")]
    NoContent,
}

impl ProductionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProductionError::Network(_) => "network_error",
            ProductionError::Upstream { .. } => "upstream_error",
            ProductionError::Quota(_) => "quota_exceeded",
            ProductionError::Malformed(_) => "malformed_response",
            ProductionError::NoContent => "no_content",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("a report generation is already in progress")]
    Busy,

    #[error("report generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("report production failed: {0}")]
    Production(#[from] ProductionError),

    #[error("report generation aborted: {0}")]
    Aborted(String),
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Busy => "busy",
            GenerationError::Timeout(_) => "timeout",
            GenerationError::Production(_) => "production_error",
            GenerationError::Aborted(_) => "aborted",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Generation(GenerationError::Busy) => StatusCode::CONFLICT,
            AppError::Generation(GenerationError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Generation(GenerationError::Production(_)) => StatusCode::BAD_GATEWAY,
            AppError::Generation(GenerationError::Aborted(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::Generation(e) => e.kind(),
        }
    }
}

fn get_trace_id() -> Option<String> {
    let span = Span::current();
    let context = span.context();
    let span_ref = context.span();
    let span_context = span_ref.span_context();

    if span_context.is_valid() {
        Some(span_context.trace_id().to_string())
    } else {
        None
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        let error_message = match &self {
            AppError::Validation(msg) | AppError::NotFound(msg) => msg.clone(),
            AppError::Generation(GenerationError::Busy) => self.to_string(),
            AppError::Generation(e) => {
                tracing::error!(error = %e, kind, "Report generation failed");
                e.to_string()
            }
        };

        let mut body = json!({
            "error": error_message,
            "kind": kind,
            "status": status.as_u16(),
        });
        if let AppError::Generation(GenerationError::Production(cause)) = &self {
            body["cause"] = json!(cause.kind());
        }
        if let Some(trace_id) = get_trace_id() {
            body["trace_id"] = json!(trace_id);
        }

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
