use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use super::ReportProducer;
use crate::error::ProductionError;
use crate::store::ReportPayload;
use crate::telemetry::metrics::PRODUCER_SOURCE_FAILURES;
use crate::week::{ReportWindow, week_label};

const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Object keys searched, in order, for the item list of a wrapped response.
const ITEM_KEYS: [&str; 4] = ["items", "articles", "entries", "results"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy)]
pub struct FeedOptions {
    pub item_limit: usize,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            item_limit: 10,
            request_timeout: Duration::from_secs(15),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Polls JSON news endpoints and groups their items into report sections.
pub struct FeedProducer {
    client: Client,
    sources: Vec<SourceConfig>,
    options: FeedOptions,
}

impl FeedProducer {
    pub fn new(sources: Vec<SourceConfig>, options: FeedOptions) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            sources,
            options,
        })
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    async fn fetch_once(&self, source: &SourceConfig) -> Result<Vec<Value>, ProductionError> {
        let response = self
            .client
            .get(&source.url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ProductionError::Network(format!("{}: {e}", source.name)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProductionError::Quota(format!(
                "{} rate limited the request",
                source.name
            )));
        }
        if !status.is_success() {
            return Err(ProductionError::Upstream {
                feed: source.name.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProductionError::Network(format!("{}: {e}", source.name)))?;
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| ProductionError::Malformed(format!("{}: {e}", source.name)))?;

        extract_items(value, self.options.item_limit)
            .map_err(|reason| ProductionError::Malformed(format!("{}: {reason}", source.name)))
    }

    #[tracing::instrument(
        name = "producer.fetch_source",
        skip(self, source),
        fields(source.name = %source.name, source.url = %source.url, source.items)
    )]
    async fn fetch_source(&self, source: &SourceConfig) -> Result<Vec<Value>, ProductionError> {
        let max_retries = self.options.max_retries.max(1);
        let mut attempt = 0;

        loop {
            match self.fetch_once(source).await {
                Ok(items) => {
                    tracing::Span::current().record("source.items", items.len());
                    return Ok(items);
                }
                Err(err) if attempt + 1 < max_retries && is_retryable(&err) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries,
                        error = %err,
                        "Source fetch failed, retrying"
                    );

                    let base = backoff_delay(self.options.retry_base_delay, attempt);
                    // up to 25% jitter
                    let jitter_ms = fastrand::u64(0..=base.as_millis() as u64 / 4);
                    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;

                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Exponential backoff from `base`, capped at `MAX_BACKOFF`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(2u32.saturating_pow(attempt))
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}

fn is_retryable(err: &ProductionError) -> bool {
    match err {
        ProductionError::Network(_) | ProductionError::Quota(_) => true,
        ProductionError::Upstream { status, .. } => *status >= 500,
        ProductionError::Malformed(_) | ProductionError::NoContent => false,
    }
}

/// Items from a bare JSON array, or from the first known list field of an object.
fn extract_items(value: Value, limit: usize) -> Result<Vec<Value>, String> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => ITEM_KEYS
            .iter()
            .find_map(|key| match object.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| format!("no item list under any of {ITEM_KEYS:?}"))?,
        other => return Err(format!("expected an array or object, got {}", type_name(&other))),
    };

    Ok(items.into_iter().take(limit).collect())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait::async_trait]
impl ReportProducer for FeedProducer {
    #[tracing::instrument(name = "producer.produce", skip(self), fields(sources = self.sources.len()))]
    async fn produce(&self) -> Result<ReportPayload, ProductionError> {
        if self.sources.is_empty() {
            return Err(ProductionError::NoContent);
        }

        let mut sections = serde_json::Map::new();
        let mut failed_sources = Vec::new();
        let mut first_error = None;
        let mut total_items = 0;

        for source in &self.sources {
            match self.fetch_source(source).await {
                Ok(items) => {
                    total_items += items.len();
                    sections.insert(
                        source.name.clone(),
                        json!({
                            "source": source.url,
                            "count": items.len(),
                            "items": items,
                        }),
                    );
                }
                Err(err) => {
                    PRODUCER_SOURCE_FAILURES.add(
                        1,
                        &[
                            KeyValue::new("source", source.name.clone()),
                            KeyValue::new("error.type", err.kind()),
                        ],
                    );
                    tracing::warn!(source = %source.name, error = %err, "Source failed, skipping");
                    failed_sources.push(json!({
                        "source": source.name,
                        "kind": err.kind(),
                        "error": err.to_string(),
                    }));
                    first_error.get_or_insert(err);
                }
            }
        }

        if sections.is_empty() {
            return Err(first_error.unwrap_or(ProductionError::NoContent));
        }
        if total_items == 0 {
            return Err(ProductionError::NoContent);
        }

        let now = Utc::now();
        let window = ReportWindow::ending_at(now);

        let mut payload = ReportPayload::new();
        payload.insert(
            "metadata".into(),
            json!({
                "title": "Weekly Economic Report",
                "week_number": week_label(now),
                "week_start": window.week_start,
                "week_end": window.week_end,
                "generated_at": now,
                "sources": self.sources.len(),
                "items": total_items,
                "failed_sources": failed_sources,
            }),
        );
        payload.insert("sections".into(), Value::Object(sections));

        Ok(payload)
    }

    fn name(&self) -> &str {
        "feeds"
    }
}
