pub mod config;
pub mod error;
pub mod producer;
pub mod routes;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod week;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;

use std::sync::Arc;

use service::ReportService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReportService>,
}
