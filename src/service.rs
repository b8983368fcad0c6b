use std::sync::Arc;

use crate::producer::ReportProducer;
use crate::scheduler::{
    GenerationOutcome, ReportScheduler, Schedule, SchedulerOptions, SchedulerState,
};
use crate::store::{HistoryEntry, Snapshot, SnapshotStore};

/// Owns the snapshot store and the scheduler writing to it.
pub struct ReportService {
    store: Arc<SnapshotStore>,
    scheduler: Arc<ReportScheduler>,
}

impl ReportService {
    pub fn new(
        store: Arc<SnapshotStore>,
        producer: Arc<dyn ReportProducer>,
        options: SchedulerOptions,
    ) -> Self {
        let scheduler = Arc::new(ReportScheduler::new(store.clone(), producer, options));
        Self::from_parts(store, scheduler)
    }

    pub fn from_parts(store: Arc<SnapshotStore>, scheduler: Arc<ReportScheduler>) -> Self {
        Self { store, scheduler }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<ReportScheduler> {
        &self.scheduler
    }

    pub async fn latest(&self) -> Option<Snapshot> {
        self.store.latest().await
    }

    pub async fn get(&self, week_key: &str) -> Option<Snapshot> {
        self.store.get(week_key).await
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.store.history().await
    }

    pub async fn generate(&self) -> GenerationOutcome {
        self.scheduler.trigger_now().await
    }

    pub async fn state(&self) -> SchedulerState {
        self.scheduler.state().await
    }

    pub async fn start_schedule(&self, schedule: Schedule) {
        self.scheduler.start_timer(schedule).await;
    }

    pub async fn stop_schedule(&self) -> bool {
        self.scheduler.stop_timer().await
    }
}
