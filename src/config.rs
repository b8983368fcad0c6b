use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::producer::SourceConfig;
use crate::scheduler::{BusyPolicy, Schedule};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub storage_file: PathBuf,
    pub sources: Vec<SourceConfig>,
    pub source_item_limit: usize,
    pub source_request_timeout: Duration,
    pub source_max_retries: u32,
    pub generation_timeout: Duration,
    pub busy_policy: BusyPolicy,
    pub schedule_enabled: bool,
    pub schedule: Schedule,
    pub schedule_poll_interval: Duration,
    pub otel_service_name: String,
    pub otel_exporter_endpoint: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let schedule = Schedule::from_parts(
            &env::var("SCHEDULE_CADENCE").unwrap_or_else(|_| "weekly".to_string()),
            &env::var("SCHEDULE_WEEKDAY").unwrap_or_else(|_| "mon".to_string()),
            &env::var("SCHEDULE_TIME").unwrap_or_else(|_| "08:00".to_string()),
        )
        .expect("SCHEDULE_CADENCE, SCHEDULE_WEEKDAY and SCHEDULE_TIME must describe a valid schedule");

        Self {
            port: env::var("APP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("APP_PORT must be a number"),
            environment: env::var("SCOUT_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            storage_file: env::var("REPORTS_STORAGE_FILE")
                .unwrap_or_else(|_| "reports.json".to_string())
                .into(),
            sources: parse_sources(&env::var("REPORT_SOURCES").unwrap_or_default()),
            source_item_limit: env::var("SOURCE_ITEM_LIMIT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .expect("SOURCE_ITEM_LIMIT must be a number"),
            source_request_timeout: Duration::from_secs(
                env::var("SOURCE_REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()
                    .expect("SOURCE_REQUEST_TIMEOUT_SECS must be a number"),
            ),
            source_max_retries: env::var("SOURCE_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .expect("SOURCE_MAX_RETRIES must be a number"),
            generation_timeout: Duration::from_secs(
                env::var("GENERATION_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()
                    .expect("GENERATION_TIMEOUT_SECS must be a number"),
            ),
            busy_policy: env::var("BUSY_POLICY")
                .unwrap_or_else(|_| "reject".to_string())
                .parse()
                .expect("BUSY_POLICY must be 'reject' or 'wait'"),
            schedule_enabled: env::var("SCHEDULE_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .expect("SCHEDULE_ENABLED must be true or false"),
            schedule,
            schedule_poll_interval: Duration::from_secs(
                env::var("SCHEDULE_POLL_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .expect("SCHEDULE_POLL_SECS must be a number"),
            ),
            otel_service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "weekly-report-service".to_string()),
            otel_exporter_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Parses `name=url` pairs separated by commas. A bare URL is named after itself.
pub fn parse_sources(raw: &str) -> Vec<SourceConfig> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, url)) if !name.contains("://") => SourceConfig {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            },
            _ => SourceConfig {
                name: entry.to_string(),
                url: entry.to_string(),
            },
        })
        .collect()
}
