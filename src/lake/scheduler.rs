//! Maintenance scheduler
//!
//! Drives maintenance cycles on a fixed interval with a single-flight
//! guarantee: a tick that lands while a cycle is still running is dropped
//! silently. `stop` clears the timer and waits for any in-flight cycle.

use crate::core::config::SchedulerConfig;
use crate::core::error::Error;
use crate::lake::maintenance::{MaintenanceJob, MaintenanceReport, MaintenanceTask};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Supplies the work for each cycle; `None` skips the tick with a zero
/// report
pub type TaskProvider = Arc<dyn Fn() -> Option<MaintenanceTask> + Send + Sync>;

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<watch::Sender<bool>>,
    timer: Option<JoinHandle<()>>,
}

/// Interval-driven, single-flight maintenance loop
pub struct MaintenanceScheduler {
    runner: Arc<dyn MaintenanceJob>,
    provider: TaskProvider,
    config: SchedulerConfig,
    // Held for the duration of a cycle; try_lock failure means a cycle is
    // still in flight and the tick is skipped.
    in_flight: Arc<tokio::sync::Mutex<()>>,
    lifecycle: Mutex<Lifecycle>,
}

impl MaintenanceScheduler {
    /// Create a scheduler over a runner and task provider
    pub fn new(
        runner: Arc<dyn MaintenanceJob>,
        provider: TaskProvider,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            runner,
            provider,
            config,
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Whether the periodic timer is running
    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().timer.is_some()
    }

    /// Start the periodic timer. Rejects when disabled or already running.
    pub fn start(&self) -> Result<(), Error> {
        if !self.config.enabled {
            return Err(Error::Scheduler("scheduler is disabled".into()));
        }
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.timer.is_some() {
            return Err(Error::Scheduler("scheduler already running".into()));
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let runner = Arc::clone(&self.runner);
        let provider = Arc::clone(&self.provider);
        let in_flight = Arc::clone(&self.in_flight);
        let period = Duration::from_millis(self.config.interval_ms);
        let timer = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => Self::tick(&runner, &provider, &in_flight),
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        lifecycle.shutdown = Some(shutdown_tx);
        lifecycle.timer = Some(timer);
        tracing::info!(interval_ms = self.config.interval_ms, "maintenance scheduler started");
        Ok(())
    }

    // One timer tick. The cycle runs on its own task so the timer keeps
    // ticking (and keeps skipping) while a long cycle is in flight.
    fn tick(
        runner: &Arc<dyn MaintenanceJob>,
        provider: &TaskProvider,
        in_flight: &Arc<tokio::sync::Mutex<()>>,
    ) {
        let Ok(guard) = Arc::clone(in_flight).try_lock_owned() else {
            tracing::debug!("maintenance still in flight; tick skipped");
            return;
        };

        let Some(task) = provider() else {
            tracing::debug!("no maintenance task this tick");
            return;
        };

        let runner = Arc::clone(runner);
        tokio::spawn(async move {
            let _guard = guard;
            match runner.run(&task).await {
                Ok(report) => tracing::info!(
                    compacted = report.compaction.delta_files_compacted,
                    orphans = report.orphans_removed,
                    "maintenance cycle complete"
                ),
                Err(err) => tracing::warn!("maintenance cycle failed: {err}"),
            }
        });
    }

    /// Run one cycle immediately. Errors when another cycle is in flight.
    pub async fn run_once(&self) -> Result<MaintenanceReport, Error> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| Error::Scheduler("maintenance already running".into()))?;
        match (self.provider)() {
            Some(task) => self.runner.run(&task).await,
            None => Ok(MaintenanceReport::default()),
        }
    }

    /// Clear the timer and wait for any in-flight cycle to finish
    pub async fn stop(&self) {
        let (shutdown, timer) = {
            let mut lifecycle = self.lifecycle.lock();
            (lifecycle.shutdown.take(), lifecycle.timer.take())
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(timer) = timer {
            let _ = timer.await;
        }
        // Acquiring the guard means the last cycle has completed.
        let _ = self.in_flight.lock().await;
        tracing::info!("maintenance scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedJob {
        runs: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl MaintenanceJob for ScriptedJob {
        async fn run(&self, _task: &MaintenanceTask) -> Result<MaintenanceReport, Error> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(MaintenanceReport::default())
        }
    }

    fn task() -> MaintenanceTask {
        MaintenanceTask {
            delta_file_keys: Vec::new(),
            output_prefix: "out".into(),
            storage_prefix: "p/".into(),
        }
    }

    fn scheduler(
        job: Arc<ScriptedJob>,
        provider: TaskProvider,
        interval_ms: u64,
        enabled: bool,
    ) -> Arc<MaintenanceScheduler> {
        Arc::new(MaintenanceScheduler::new(
            job,
            provider,
            SchedulerConfig { interval_ms, enabled },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn long_cycles_skip_overlapping_ticks() {
        // A cycle lasting 5 intervals: the four ticks that land mid-cycle
        // must be dropped silently.
        let job = Arc::new(ScriptedJob {
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(5_000),
        });
        let s = scheduler(Arc::clone(&job), Arc::new(|| Some(task())), 1_000, true);
        s.start().unwrap();

        tokio::time::advance(Duration::from_millis(5_500)).await;
        tokio::task::yield_now().await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1, "overlapping ticks skipped");

        // After the first cycle drains, the next tick runs again.
        tokio::time::advance(Duration::from_millis(2_000)).await;
        tokio::task::yield_now().await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);

        s.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn provider_none_means_no_run() {
        let job = Arc::new(ScriptedJob { runs: AtomicUsize::new(0), delay: Duration::ZERO });
        let s = scheduler(Arc::clone(&job), Arc::new(|| None), 1_000, true);
        s.start().unwrap();

        tokio::time::advance(Duration::from_millis(3_500)).await;
        tokio::task::yield_now().await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);

        s.stop().await;
    }

    #[tokio::test]
    async fn disabled_scheduler_rejects_start() {
        let job = Arc::new(ScriptedJob { runs: AtomicUsize::new(0), delay: Duration::ZERO });
        let s = scheduler(job, Arc::new(|| Some(task())), 1_000, false);
        assert!(matches!(s.start(), Err(Error::Scheduler(_))));
        assert!(!s.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_is_rejected_and_stop_allows_restart() {
        let job = Arc::new(ScriptedJob { runs: AtomicUsize::new(0), delay: Duration::ZERO });
        let s = scheduler(job, Arc::new(|| Some(task())), 1_000, true);

        s.start().unwrap();
        assert!(s.is_running());
        assert!(matches!(s.start(), Err(Error::Scheduler(_))));

        s.stop().await;
        assert!(!s.is_running());
        s.start().unwrap();
        s.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_cycle() {
        let job = Arc::new(ScriptedJob {
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(2_000),
        });
        let s = scheduler(Arc::clone(&job), Arc::new(|| Some(task())), 1_000, true);
        s.start().unwrap();

        // First tick starts a cycle; stop during it must wait it out.
        tokio::time::advance(Duration::from_millis(1_100)).await;
        tokio::task::yield_now().await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
        s.stop().await;

        // With paused time, stop() returning implies the sleeping cycle was
        // driven to completion (the guard was reacquired).
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_once_rejects_concurrent_runs() {
        let job = Arc::new(ScriptedJob {
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let s = scheduler(Arc::clone(&job), Arc::new(|| Some(task())), 60_000, true);

        let first = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.run_once().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(s.run_once().await, Err(Error::Scheduler(_))));
        first.await.unwrap().unwrap();

        // And succeeds again afterwards. The rejected attempt never reached
        // the runner, so only the two successful calls count.
        s.run_once().await.unwrap();
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_once_with_no_task_returns_zero_report() {
        let job = Arc::new(ScriptedJob { runs: AtomicUsize::new(0), delay: Duration::ZERO });
        let s = scheduler(Arc::clone(&job), Arc::new(|| None), 60_000, true);
        let report = s.run_once().await.unwrap();
        assert_eq!(report.orphans_removed, 0);
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);
    }
}
