pub mod feeds;

pub use feeds::{FeedOptions, FeedProducer, SourceConfig};

use crate::error::ProductionError;
use crate::store::ReportPayload;

/// Assembles the content of one report from upstream sources.
#[async_trait::async_trait]
pub trait ReportProducer: Send + Sync {
    async fn produce(&self) -> Result<ReportPayload, ProductionError>;
    fn name(&self) -> &str;
}

/// Returns the same payload on every call.
pub struct StaticProducer {
    payload: ReportPayload,
}

impl StaticProducer {
    pub fn new(payload: ReportPayload) -> Self {
        Self { payload }
    }
}

#[async_trait::async_trait]
impl ReportProducer for StaticProducer {
    async fn produce(&self) -> Result<ReportPayload, ProductionError> {
        Ok(self.payload.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}
