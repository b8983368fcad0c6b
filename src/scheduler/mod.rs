pub mod schedule;

pub use schedule::{Cadence, Clock, Schedule, ScheduleError, SystemClock};

use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::error::GenerationError;
use crate::producer::ReportProducer;
use crate::store::{Snapshot, SnapshotStore};
use crate::telemetry::metrics::{
    REPORT_GENERATION_COUNT, REPORT_GENERATION_DURATION, REPORT_GENERATION_REJECTED,
};
use crate::week::week_key_for;

pub type GenerationOutcome = Result<Snapshot, GenerationError>;

/// What a trigger does when a generation is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusyPolicy {
    /// Fail immediately with `GenerationError::Busy`.
    #[default]
    Reject,
    /// Wait for the running generation and share its outcome.
    Wait,
}

impl FromStr for BusyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(BusyPolicy::Reject),
            "wait" => Ok(BusyPolicy::Wait),
            other => Err(format!("unknown busy policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Generating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Manual,
    Timer,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Timer => "timer",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub busy_policy: BusyPolicy,
    pub generation_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            busy_policy: BusyPolicy::Reject,
            generation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(60),
        }
    }
}

struct TimerHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl TimerHandle {
    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "Report timer task ended abnormally");
        }
    }
}

/// Runs report generations one at a time, on demand or on a schedule.
///
/// The in-flight slot holds a receiver for the outcome of the running
/// generation; `None` means idle. Only the task that filled the slot clears it.
pub struct ReportScheduler {
    store: Arc<SnapshotStore>,
    producer: Arc<dyn ReportProducer>,
    clock: Arc<dyn Clock>,
    options: SchedulerOptions,
    in_flight: Mutex<Option<watch::Receiver<Option<GenerationOutcome>>>>,
    timer: Mutex<Option<TimerHandle>>,
}

impl ReportScheduler {
    pub fn new(
        store: Arc<SnapshotStore>,
        producer: Arc<dyn ReportProducer>,
        mut options: SchedulerOptions,
    ) -> Self {
        if options.poll_interval.is_zero() {
            let fallback = SchedulerOptions::default().poll_interval;
            tracing::warn!(
                poll_secs = fallback.as_secs(),
                "Timer poll interval must be non-zero, using default"
            );
            options.poll_interval = fallback;
        }

        Self {
            store,
            producer,
            clock: Arc::new(SystemClock),
            options,
            in_flight: Mutex::new(None),
            timer: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn state(&self) -> SchedulerState {
        if self.in_flight.lock().await.is_some() {
            SchedulerState::Generating
        } else {
            SchedulerState::Idle
        }
    }

    /// Generates a report now and commits it under the current week key.
    ///
    /// The producer runs on its own task, so dropping the returned future does
    /// not cancel a generation that has started.
    pub async fn trigger_now(self: &Arc<Self>) -> GenerationOutcome {
        self.trigger(Trigger::Manual).await
    }

    async fn trigger(self: &Arc<Self>, trigger: Trigger) -> GenerationOutcome {
        let mut outcome_rx = {
            let mut in_flight = self.in_flight.lock().await;

            match in_flight.clone() {
                Some(running) => match self.options.busy_policy {
                    BusyPolicy::Reject => {
                        REPORT_GENERATION_REJECTED
                            .add(1, &[KeyValue::new("trigger", trigger.as_str())]);
                        tracing::info!(
                            trigger = trigger.as_str(),
                            "Report generation already in progress, rejecting"
                        );
                        return Err(GenerationError::Busy);
                    }
                    BusyPolicy::Wait => {
                        tracing::info!(
                            trigger = trigger.as_str(),
                            "Report generation already in progress, waiting for it"
                        );
                        running
                    }
                },
                None => {
                    let (outcome_tx, outcome_rx) = watch::channel(None);
                    *in_flight = Some(outcome_rx.clone());

                    let scheduler = Arc::clone(self);
                    tokio::spawn(scheduler.run_generation(outcome_tx, trigger));
                    outcome_rx
                }
            }
        };

        let finished = match outcome_rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        finished.unwrap_or_else(|| {
            Err(GenerationError::Aborted(
                "generation task ended without a result".into(),
            ))
        })
    }

    async fn run_generation(
        self: Arc<Self>,
        outcome_tx: watch::Sender<Option<GenerationOutcome>>,
        trigger: Trigger,
    ) {
        let worker = Arc::clone(&self);
        let outcome = match tokio::spawn(async move { worker.generate(trigger).await }).await {
            Ok(outcome) => outcome,
            Err(e) => Err(GenerationError::Aborted(e.to_string())),
        };

        self.in_flight.lock().await.take();
        outcome_tx.send_replace(Some(outcome));
    }

    #[tracing::instrument(
        name = "report.generate",
        skip_all,
        fields(
            report.trigger = trigger.as_str(),
            report.producer = self.producer.name(),
            report.week_key,
            report.duration_ms,
        )
    )]
    async fn generate(&self, trigger: Trigger) -> GenerationOutcome {
        let start = Instant::now();
        let span = tracing::Span::current();

        tracing::info!("Generating weekly report");

        let produced =
            tokio::time::timeout(self.options.generation_timeout, self.producer.produce()).await;

        let outcome = match produced {
            Err(_) => Err(GenerationError::Timeout(self.options.generation_timeout)),
            Ok(Err(e)) => Err(GenerationError::Production(e)),
            Ok(Ok(payload)) => {
                let created_at = self.clock.now();
                let snapshot = Snapshot {
                    week_key: week_key_for(created_at),
                    created_at,
                    payload,
                };
                span.record("report.week_key", snapshot.week_key.as_str());

                if let Err(e) = self.store.put(snapshot.clone()).await {
                    tracing::warn!(
                        error = %e,
                        week_key = %snapshot.week_key,
                        "Report kept in memory only, durable flush failed"
                    );
                }
                Ok(snapshot)
            }
        };

        let duration = start.elapsed();
        let outcome_label = match &outcome {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        let attrs = [
            KeyValue::new("trigger", trigger.as_str()),
            KeyValue::new("outcome", outcome_label),
        ];
        REPORT_GENERATION_DURATION.record(duration.as_secs_f64(), &attrs);
        REPORT_GENERATION_COUNT.add(1, &attrs);
        span.record("report.duration_ms", duration.as_millis() as u64);

        match &outcome {
            Ok(snapshot) => tracing::info!(
                week_key = %snapshot.week_key,
                duration_ms = duration.as_millis() as u64,
                "Report stored"
            ),
            Err(e) => tracing::error!(
                error = %e,
                kind = e.kind(),
                duration_ms = duration.as_millis() as u64,
                "Report generation failed"
            ),
        }

        outcome
    }

    /// Starts firing generations on `schedule`, replacing any running timer.
    ///
    /// The clock is checked every `poll_interval`; a firing instant found in the
    /// past triggers once and the timer moves on to the next instant after now.
    pub async fn start_timer(self: &Arc<Self>, schedule: Schedule) {
        let mut timer = self.timer.lock().await;
        if let Some(previous) = timer.take() {
            previous.stop().await;
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let poll_interval = self.options.poll_interval;
        let mut next_due = schedule.next_after(self.clock.now());

        tracing::info!(
            schedule = %schedule,
            next_run = %next_due,
            poll_secs = poll_interval.as_secs_f64(),
            "Report timer started"
        );

        let join = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(poll_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let Some(scheduler) = scheduler.upgrade() else {
                                break;
                            };

                            let now = scheduler.clock.now();
                            if now < next_due {
                                continue;
                            }

                            next_due = schedule.next_after(now);
                            tracing::info!(next_run = %next_due, "Scheduled report generation due");

                            tokio::spawn(async move {
                                if let Err(GenerationError::Busy) =
                                    scheduler.trigger(Trigger::Timer).await
                                {
                                    tracing::info!("Skipped scheduled generation, one was already running");
                                }
                            });
                        }
                        _ = shutdown_rx.recv() => {
                            tracing::info!("Report timer stopped");
                            break;
                        }
                    }
                }
            }
            .instrument(tracing::info_span!("report.timer")),
        );

        *timer = Some(TimerHandle { shutdown_tx, join });
    }

    /// Halts future firings. A generation already running is left to finish.
    /// Returns whether a timer was running.
    pub async fn stop_timer(&self) -> bool {
        let handle = self.timer.lock().await.take();
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn timer_running(&self) -> bool {
        self.timer.lock().await.is_some()
    }
}
