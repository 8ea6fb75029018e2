//! # Probe Scheduler
//!
//! Owns the cron trigger and the single-instance gate: at most one
//! inspection runs at a time and overlapping triggers coalesce. Manual runs
//! go through `execute_once`, which the scheduled trigger also uses. Every
//! phase of a run is published on the event bus and lands in a bounded
//! history ring.

use chrono::Utc;
use cron::Schedule;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::events::ProbeBroadcaster;
use crate::executor::ProbeExecutor;
use crate::types::{ExecutionRecord, ExecutionStatus, ProbeError, ProbeEvent};

const MAX_HISTORY: usize = 100;

pub struct ProbeScheduler {
    executor: Arc<ProbeExecutor>,
    events: Arc<ProbeBroadcaster>,
    schedule: Schedule,
    schedule_expr: String,
    run_timeout: Duration,
    paused: AtomicBool,
    run_in_progress: AtomicBool,
    service_running: AtomicBool,
    history: Mutex<VecDeque<ExecutionRecord>>,
    current: Mutex<Option<ExecutionRecord>>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProbeScheduler {
    pub fn new(
        executor: Arc<ProbeExecutor>,
        events: Arc<ProbeBroadcaster>,
        schedule_expr: &str,
        run_timeout: Duration,
    ) -> Result<Self, ProbeError> {
        let schedule = parse_cron(schedule_expr)?;

        Ok(Self {
            executor,
            events,
            schedule,
            schedule_expr: schedule_expr.to_string(),
            run_timeout,
            paused: AtomicBool::new(false),
            run_in_progress: AtomicBool::new(false),
            service_running: AtomicBool::new(false),
            history: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the cron loop.
    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            warn!("probe scheduler already running");
            return;
        }

        self.service_running.store(true, Ordering::SeqCst);
        let scheduler = Arc::clone(self);

        *handle = Some(tokio::spawn(async move {
            info!("probe scheduler started with cron: {}", scheduler.schedule_expr);

            loop {
                let Some(next_fire) = scheduler.schedule.upcoming(Utc).next() else {
                    warn!("cron schedule has no future fire times, scheduler idle");
                    scheduler.shutdown.cancelled().await;
                    break;
                };

                let wait = (next_fire - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::from_secs(0));

                tokio::select! {
                    _ = scheduler.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {
                        if scheduler.paused.load(Ordering::SeqCst) {
                            continue;
                        }
                        match scheduler.execute_once(false).await {
                            Ok(execution_id) => {
                                info!("scheduled inspection triggered: {}", execution_id);
                            }
                            // A still-running inspection swallows the tick
                            Err(ProbeError::AlreadyRunning) => {
                                warn!("scheduled inspection skipped: previous run still in progress");
                            }
                            Err(err) => error!("scheduled inspection failed to start: {}", err),
                        }
                    }
                }
            }

            info!("probe scheduler stopped");
        }));
    }

    /// Stop the cron loop; an in-flight inspection finishes on its own.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.service_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Kick off one inspection. Fails with `AlreadyRunning` unless forced.
    pub async fn execute_once(self: &Arc<Self>, force: bool) -> Result<String, ProbeError> {
        if self.run_in_progress.load(Ordering::SeqCst) && !force {
            return Err(ProbeError::AlreadyRunning);
        }
        self.run_in_progress.store(true, Ordering::SeqCst);

        let execution_id = Uuid::new_v4().to_string();
        info!("starting inspection execution: {}", execution_id);

        let record = ExecutionRecord::started(execution_id.clone());
        *self.current.lock().await = Some(record);

        self.events.publish(&ProbeEvent::InspectionStarted {
            execution_id: execution_id.clone(),
        });

        let scheduler = Arc::clone(self);
        let id = execution_id.clone();
        tokio::spawn(async move {
            scheduler.run_and_record(id).await;
        });

        Ok(execution_id)
    }

    async fn run_and_record(self: Arc<Self>, execution_id: String) {
        let mut record = ExecutionRecord::started(execution_id.clone());

        match tokio::time::timeout(self.run_timeout, self.executor.execute()).await {
            Ok(Ok(report)) => {
                if let Err(err) = self.executor.ship(&report).await {
                    error!("failed to queue report for delivery: {}", err);
                }
                record.finish(ExecutionStatus::Completed, Some(report.clone()), None);
                self.events.publish(&ProbeEvent::InspectionCompleted {
                    execution_id: execution_id.clone(),
                    status: ExecutionStatus::Completed,
                    report: Box::new(report),
                });
            }
            Ok(Err(err)) => {
                error!("inspection {} failed: {}", execution_id, err);
                record.finish(ExecutionStatus::Failed, None, Some(err.to_string()));
                self.events.publish(&ProbeEvent::InspectionFailed {
                    execution_id: execution_id.clone(),
                    error: err.to_string(),
                });
            }
            Err(_) => {
                let message = format!(
                    "inspection timed out after {}s",
                    self.run_timeout.as_secs()
                );
                error!("{}", message);
                record.finish(ExecutionStatus::Timeout, None, Some(message.clone()));
                self.events.publish(&ProbeEvent::InspectionFailed {
                    execution_id: execution_id.clone(),
                    error: message,
                });
            }
        }

        info!(
            "inspection {} finished with status: {:?}",
            execution_id, record.status
        );

        let mut history = self.history.lock().await;
        history.push_back(record);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
        drop(history);

        *self.current.lock().await = None;
        self.run_in_progress.store(false, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("scheduled inspections paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("scheduled inspections resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.service_running.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> serde_json::Value {
        let next_inspection = if self.paused.load(Ordering::SeqCst) {
            None
        } else {
            self.schedule.upcoming(Utc).next()
        };

        let history = self.history.lock().await;
        let last_inspection = history.back().map(|record| record.summary());
        let total_executions = history.len();
        drop(history);

        let current = self.current.lock().await;
        let current_execution = current.as_ref().map(|record| record.summary());

        serde_json::json!({
            "scheduler_status": if self.is_running() { "running" } else { "stopped" },
            "paused": self.is_paused(),
            "schedule": self.schedule_expr,
            "next_inspection": next_inspection,
            "last_inspection": last_inspection,
            "current_execution": current_execution,
            "total_executions": total_executions,
        })
    }

    /// Newest-first summaries from the history ring.
    pub async fn recent_reports(&self, limit: usize) -> Vec<serde_json::Value> {
        let history = self.history.lock().await;
        history
            .iter()
            .rev()
            .take(limit)
            .map(|record| record.summary())
            .collect()
    }

    pub async fn get_report(&self, execution_id: &str) -> Option<ExecutionRecord> {
        let history = self.history.lock().await;
        history
            .iter()
            .rev()
            .find(|record| record.execution_id == execution_id)
            .cloned()
    }
}

/// Parse a cron expression, accepting the standard five-field form by
/// prepending a seconds column.
fn parse_cron(expression: &str) -> Result<Schedule, ProbeError> {
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };

    Schedule::from_str(&normalized).map_err(|err| ProbeError::InvalidSchedule {
        expression: expression.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixer::AutoFixer;
    use crate::metrics::StaticMetrics;
    use cortex_common::models::SystemMetrics;
    use cortex_common::queue::LocalQueue;
    use cortex_common::settings::Settings;
    use cortex_common::IntentRecorder;

    async fn scheduler() -> Arc<ProbeScheduler> {
        let mut settings = Settings::default();
        settings.agent.id = "agent-sched".to_string();

        let executor = Arc::new(ProbeExecutor::new(
            settings,
            Arc::new(StaticMetrics(SystemMetrics::default())),
            AutoFixer::empty(),
            Arc::new(IntentRecorder::disabled()),
            Arc::new(LocalQueue::open_in_memory(3, 100).await.unwrap()),
        ));

        Arc::new(
            ProbeScheduler::new(
                executor,
                Arc::new(ProbeBroadcaster::new()),
                "0 * * * *",
                Duration::from_secs(30),
            )
            .unwrap(),
        )
    }

    #[test]
    fn five_field_cron_expressions_are_accepted() {
        assert!(parse_cron("0 * * * *").is_ok());
        assert!(parse_cron("*/5 * * * *").is_ok());
        // Six fields pass through untouched
        assert!(parse_cron("0 0 * * * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
    }

    #[tokio::test]
    async fn execute_once_runs_and_lands_in_history() {
        let scheduler = scheduler().await;
        let execution_id = scheduler.execute_once(false).await.unwrap();

        // Let the spawned run finish
        for _ in 0..50 {
            if scheduler.get_report(&execution_id).await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let record = scheduler.get_report(&execution_id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(record.report.is_some());

        let recent = scheduler.recent_reports(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0]["execution_id"], execution_id.as_str());
    }

    #[tokio::test]
    async fn overlapping_manual_runs_are_rejected_unless_forced() {
        let scheduler = scheduler().await;
        scheduler.run_in_progress.store(true, Ordering::SeqCst);

        let err = scheduler.execute_once(false).await.unwrap_err();
        assert!(matches!(err, ProbeError::AlreadyRunning));

        // Forced runs bypass the gate
        assert!(scheduler.execute_once(true).await.is_ok());
    }

    #[tokio::test]
    async fn pause_suppresses_next_fire_time_in_status() {
        let scheduler = scheduler().await;

        scheduler.pause();
        let status = scheduler.status().await;
        assert_eq!(status["paused"], true);
        assert!(status["next_inspection"].is_null());

        scheduler.resume();
        let status = scheduler.status().await;
        assert_eq!(status["paused"], false);
        assert!(status["next_inspection"].is_string());
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let scheduler = scheduler().await;
        let mut rx = {
            // Subscribe through the scheduler's bus
            scheduler.events.subscribe()
        };

        scheduler.execute_once(false).await.unwrap();

        let started: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(started["type"], "inspection_started");

        let finished: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(finished["type"], "inspection_completed");
    }

    #[tokio::test]
    async fn start_and_stop_round_trip() {
        let scheduler = scheduler().await;
        scheduler.start().await;
        assert!(scheduler.is_running());
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }
}
