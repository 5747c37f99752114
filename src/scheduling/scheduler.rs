//! Sweep scheduler.
//!
//! Each sweep is an explicit, independently invokable function behind the
//! [`SweepExecutor`] trait; the scheduler only decides *when* to call it. Due
//! sweeps execute sequentially in registration order, so registering the
//! backup sweep before the deletion sweep guarantees their relative order
//! even if both become due in the same tick.

use super::cron::Schedule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info};

/// A periodic sweep the scheduler can drive.
#[async_trait]
pub trait SweepExecutor: Send + Sync {
    /// Run the sweep to completion; the message is logged and recorded.
    async fn execute(&self) -> Result<String, String>;

    /// Stable sweep name.
    fn name(&self) -> &str;
}

/// Per-sweep run statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    pub last_error: Option<String>,
}

impl SweepStats {
    fn record(&mut self, at: DateTime<Utc>, outcome: &Result<String, String>) {
        self.total_runs += 1;
        self.last_run = Some(at);
        match outcome {
            Ok(message) => {
                self.successful_runs += 1;
                self.last_message = Some(message.clone());
            }
            Err(error) => {
                self.failed_runs += 1;
                self.last_error = Some(error.clone());
            }
        }
    }
}

/// Externally visible state of one registered sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepStatus {
    pub name: String,
    pub schedule: String,
    pub next_run: Option<DateTime<Utc>>,
    pub stats: SweepStats,
}

struct RegisteredSweep {
    schedule: Schedule,
    executor: Arc<dyn SweepExecutor>,
    next_run: Option<DateTime<Utc>>,
    stats: SweepStats,
}

/// The sweep scheduler.
pub struct SweepScheduler {
    sweeps: RwLock<Vec<RegisteredSweep>>,
    check_interval: Duration,
}

impl SweepScheduler {
    /// Creates a scheduler that checks for due sweeps every 30 seconds.
    pub fn new() -> Self {
        Self::with_check_interval(Duration::from_secs(30))
    }

    /// Creates a scheduler with an explicit check interval.
    pub fn with_check_interval(check_interval: Duration) -> Self {
        Self {
            sweeps: RwLock::new(Vec::new()),
            check_interval,
        }
    }

    /// Registers a sweep. Registration order is execution order for sweeps
    /// due in the same tick.
    pub async fn register(&self, schedule: Schedule, executor: Arc<dyn SweepExecutor>) {
        let next_run = schedule.next_run(&Utc::now());
        info!(
            sweep = executor.name(),
            schedule = %schedule.expr,
            next_run = ?next_run,
            "Registered sweep"
        );

        self.sweeps.write().await.push(RegisteredSweep {
            schedule,
            executor,
            next_run,
            stats: SweepStats::default(),
        });
    }

    /// Runs one sweep immediately, outside its schedule.
    pub async fn trigger(&self, name: &str) -> Result<String, String> {
        let executor = {
            let sweeps = self.sweeps.read().await;
            sweeps
                .iter()
                .find(|s| s.executor.name() == name)
                .map(|s| Arc::clone(&s.executor))
                .ok_or_else(|| format!("No sweep named '{}'", name))?
        };

        let outcome = executor.execute().await;
        self.record_outcome(name, &outcome).await;
        outcome
    }

    /// Status of every registered sweep.
    pub async fn snapshot(&self) -> Vec<SweepStatus> {
        let sweeps = self.sweeps.read().await;
        sweeps
            .iter()
            .map(|s| SweepStatus {
                name: s.executor.name().to_string(),
                schedule: s.schedule.expr.clone(),
                next_run: s.next_run,
                stats: s.stats.clone(),
            })
            .collect()
    }

    /// The scheduler loop. Returns when `shutdown` fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Sweep scheduler started");
        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_due_sweeps(Utc::now()).await;
                }
                _ = shutdown.recv() => {
                    info!("Sweep scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Executes every sweep whose fire time has passed, in registration
    /// order, one at a time.
    pub async fn run_due_sweeps(&self, now: DateTime<Utc>) {
        let due: Vec<(usize, Arc<dyn SweepExecutor>)> = {
            let mut sweeps = self.sweeps.write().await;
            sweeps
                .iter_mut()
                .enumerate()
                .filter(|(_, s)| s.next_run.map(|at| at <= now).unwrap_or(false))
                .map(|(index, s)| {
                    s.next_run = s.schedule.next_run(&now);
                    (index, Arc::clone(&s.executor))
                })
                .collect()
        };

        for (index, executor) in due {
            let name = executor.name().to_string();
            info!(sweep = %name, "Starting scheduled sweep");

            let outcome = executor.execute().await;
            match &outcome {
                Ok(message) => info!(sweep = %name, message = %message, "Sweep finished"),
                Err(e) => error!(sweep = %name, error = %e, "Sweep failed"),
            }

            let mut sweeps = self.sweeps.write().await;
            if let Some(sweep) = sweeps.get_mut(index) {
                sweep.stats.record(Utc::now(), &outcome);
            }
        }
    }

    async fn record_outcome(&self, name: &str, outcome: &Result<String, String>) {
        let mut sweeps = self.sweeps.write().await;
        if let Some(sweep) = sweeps.iter_mut().find(|s| s.executor.name() == name) {
            sweep.stats.record(Utc::now(), outcome);
        }
    }
}

impl Default for SweepScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        name: &'static str,
        runs: AtomicUsize,
        fail: bool,
        order_log: Arc<RwLock<Vec<&'static str>>>,
    }

    impl CountingExecutor {
        fn new(name: &'static str, order_log: Arc<RwLock<Vec<&'static str>>>) -> Self {
            Self {
                name,
                runs: AtomicUsize::new(0),
                fail: false,
                order_log,
            }
        }
    }

    #[async_trait]
    impl SweepExecutor for CountingExecutor {
        async fn execute(&self) -> Result<String, String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.order_log.write().await.push(self.name);
            if self.fail {
                Err("sweep broke".to_string())
            } else {
                Ok("done".to_string())
            }
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    #[tokio::test]
    async fn test_trigger_runs_and_records() {
        let scheduler = SweepScheduler::new();
        let log = Arc::new(RwLock::new(Vec::new()));
        scheduler
            .register(
                Schedule::parse("0 2 * * *").unwrap(),
                Arc::new(CountingExecutor::new("backup-sweep", Arc::clone(&log))),
            )
            .await;

        assert_eq!(scheduler.trigger("backup-sweep").await.unwrap(), "done");
        assert!(scheduler.trigger("unknown").await.is_err());

        let status = &scheduler.snapshot().await[0];
        assert_eq!(status.stats.total_runs, 1);
        assert_eq!(status.stats.successful_runs, 1);
        assert_eq!(status.stats.last_message.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_due_sweeps_run_in_registration_order() {
        let scheduler = SweepScheduler::new();
        let log = Arc::new(RwLock::new(Vec::new()));

        scheduler
            .register(
                Schedule::parse("* * * * *").unwrap(),
                Arc::new(CountingExecutor::new("backup-sweep", Arc::clone(&log))),
            )
            .await;
        scheduler
            .register(
                Schedule::parse("* * * * *").unwrap(),
                Arc::new(CountingExecutor::new("deletion-sweep", Arc::clone(&log))),
            )
            .await;

        // Both are due one minute past registration.
        scheduler
            .run_due_sweeps(Utc::now() + chrono::Duration::minutes(2))
            .await;

        assert_eq!(*log.read().await, vec!["backup-sweep", "deletion-sweep"]);
    }

    #[tokio::test]
    async fn test_sweep_not_due_does_not_run() {
        let scheduler = SweepScheduler::new();
        let log = Arc::new(RwLock::new(Vec::new()));
        scheduler
            .register(
                Schedule::parse("0 2 * * *").unwrap(),
                Arc::new(CountingExecutor::new("backup-sweep", Arc::clone(&log))),
            )
            .await;

        scheduler.run_due_sweeps(Utc::now()).await;
        assert!(log.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let scheduler = SweepScheduler::new();
        let log = Arc::new(RwLock::new(Vec::new()));
        let mut executor = CountingExecutor::new("integrity-sweep", Arc::clone(&log));
        executor.fail = true;
        scheduler
            .register(Schedule::parse("0 4 * * 0").unwrap(), Arc::new(executor))
            .await;

        assert!(scheduler.trigger("integrity-sweep").await.is_err());
        let status = &scheduler.snapshot().await[0];
        assert_eq!(status.stats.failed_runs, 1);
        assert_eq!(status.stats.last_error.as_deref(), Some("sweep broke"));
    }

    #[tokio::test]
    async fn test_next_run_advances_after_firing() {
        let scheduler = SweepScheduler::new();
        let log = Arc::new(RwLock::new(Vec::new()));
        scheduler
            .register(
                Schedule::parse("* * * * *").unwrap(),
                Arc::new(CountingExecutor::new("backup-sweep", Arc::clone(&log))),
            )
            .await;

        let before = scheduler.snapshot().await[0].next_run.unwrap();
        let fire_at = before + chrono::Duration::minutes(5);
        scheduler.run_due_sweeps(fire_at).await;

        let after = scheduler.snapshot().await[0].next_run.unwrap();
        assert!(after > fire_at);
    }
}
