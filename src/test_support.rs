use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::error::ProductionError;
use crate::producer::ReportProducer;
use crate::scheduler::Clock;
use crate::store::ReportPayload;

pub fn payload(message: &str) -> ReportPayload {
    let mut payload = ReportPayload::new();
    payload.insert("message".into(), json!(message));
    payload
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer stub that counts calls and can be slowed down or made to fail.
pub struct CountingProducer {
    result: Result<ReportPayload, ProductionError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingProducer {
    pub fn ok(payload: ReportPayload) -> Self {
        Self {
            result: Ok(payload),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: ProductionError) -> Self {
        Self {
            result: Err(error),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ReportProducer for CountingProducer {
    async fn produce(&self) -> Result<ReportPayload, ProductionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }

    fn name(&self) -> &str {
        "counting"
    }
}
