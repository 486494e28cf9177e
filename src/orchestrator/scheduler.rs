//! Independent periodic timers.
//!
//! Every [`ScheduledJob`] gets its own timer task. A tick spawns the job
//! and returns to waiting immediately, so a slow run never delays the next
//! tick and runs of the same job may overlap. [`Scheduler::stop`] cancels
//! the timers without waiting for runs already in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{ConfigError, OrchestratorError, Result};
use crate::persistence::PersistenceAdapter;

/// Work fired on every tick of a timer.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self);
}

/// A job paired with its firing interval.
#[derive(Clone)]
pub struct ScheduledJob {
    pub name: String,
    pub interval: Duration,
    pub job: Arc<dyn PeriodicJob>,
}

impl ScheduledJob {
    pub fn new(interval: Duration, job: Arc<dyn PeriodicJob>) -> Self {
        Self {
            name: job.name().to_string(),
            interval,
            job,
        }
    }
}

impl std::fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish()
    }
}

struct RunningTimers {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    names: Vec<String>,
}

/// Owns the timer tasks of a running orchestrator.
#[derive(Default)]
pub struct Scheduler {
    running: Mutex<Option<RunningTimers>>,
    fired: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start one timer per job. The first tick fires one interval after
    /// start.
    pub fn start(&self, jobs: Vec<ScheduledJob>) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(OrchestratorError::AlreadyRunning);
        }
        if let Some(job) = jobs.iter().find(|j| j.interval.is_zero()) {
            let message = format!("job '{}' has a zero interval", job.name);
            return Err(ConfigError::Invalid(message).into());
        }

        let (shutdown, _) = watch::channel(false);
        let mut tasks = Vec::with_capacity(jobs.len());
        let mut names = Vec::with_capacity(jobs.len());
        for scheduled in jobs {
            log::info!(
                "[Scheduler] starting '{}' every {:?}",
                scheduled.name,
                scheduled.interval
            );
            names.push(scheduled.name.clone());
            tasks.push(spawn_timer(scheduled, shutdown.subscribe(), Arc::clone(&self.fired)));
        }

        *running = Some(RunningTimers {
            shutdown,
            tasks,
            names,
        });
        Ok(())
    }

    /// Cancel every timer. Calling this on a stopped scheduler does nothing.
    pub fn stop(&self) {
        let Some(timers) = self.running.lock().take() else {
            return;
        };
        let _ = timers.shutdown.send(true);
        for task in timers.tasks {
            task.abort();
        }
        log::info!("[Scheduler] stopped {} timers", timers.names.len());
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Names of the running jobs, in start order.
    pub fn job_names(&self) -> Vec<String> {
        self.running
            .lock()
            .as_ref()
            .map(|t| t.names.clone())
            .unwrap_or_default()
    }

    /// Total ticks fired since construction, across all jobs.
    pub fn ticks_fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_timer(
    scheduled: ScheduledJob,
    mut shutdown: watch::Receiver<bool>,
    fired: Arc<AtomicU64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + scheduled.interval, scheduled.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    fired.fetch_add(1, Ordering::Relaxed);
                    let job = Arc::clone(&scheduled.job);
                    tokio::spawn(async move { job.run().await });
                }
                _ = shutdown.changed() => break,
            }
        }
        log::debug!("[Scheduler] timer '{}' exited", scheduled.name);
    })
}

/// Periodic flush of the registry through the persistence adapter.
pub struct FlushJob {
    adapter: Arc<PersistenceAdapter>,
}

/// Name of the flush timer.
pub const FLUSH_JOB: &str = "flush";

impl FlushJob {
    pub fn new(adapter: Arc<PersistenceAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl PeriodicJob for FlushJob {
    fn name(&self) -> &str {
        FLUSH_JOB
    }

    async fn run(&self) {
        self.adapter.flush().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        name: &'static str,
        runs: AtomicUsize,
    }

    impl Counter {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                runs: AtomicUsize::new(0),
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PeriodicJob for Counter {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Let spawned job runs finish.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_fire_independently() {
        let fast = Counter::new("fast");
        let slow = Counter::new("slow");
        let scheduler = Scheduler::new();
        scheduler
            .start(vec![
                ScheduledJob::new(Duration::from_millis(10), fast.clone()),
                ScheduledJob::new(Duration::from_millis(25), slow.clone()),
            ])
            .unwrap();

        tokio::time::sleep(Duration::from_millis(105)).await;
        settle().await;

        assert!(slow.runs() >= 3, "slow ran {} times", slow.runs());
        assert!(fast.runs() >= 2 * slow.runs(), "fast {} slow {}", fast.runs(), slow.runs());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_interval() {
        let job = Counter::new("job");
        let scheduler = Scheduler::new();
        scheduler
            .start(vec![ScheduledJob::new(Duration::from_millis(50), job.clone())])
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        settle().await;
        assert_eq!(job.runs(), 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        settle().await;
        assert_eq!(job.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_runs_after_stop() {
        let job = Counter::new("job");
        let scheduler = Scheduler::new();
        scheduler
            .start(vec![ScheduledJob::new(Duration::from_millis(10), job.clone())])
            .unwrap();
        tokio::time::sleep(Duration::from_millis(35)).await;
        settle().await;

        scheduler.stop();
        let before = job.runs();
        assert!(before > 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(job.runs(), before);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let scheduler = Scheduler::new();
        scheduler
            .start(vec![ScheduledJob::new(Duration::from_secs(60), Counter::new("a"))])
            .unwrap();
        assert!(matches!(
            scheduler.start(Vec::new()),
            Err(OrchestratorError::AlreadyRunning)
        ));
        assert_eq!(scheduler.job_names(), vec!["a"]);

        scheduler.stop();
        scheduler.stop();
        assert!(scheduler.start(Vec::new()).is_ok());
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let scheduler = Scheduler::new();
        let err = scheduler
            .start(vec![ScheduledJob::new(Duration::ZERO, Counter::new("a"))])
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(ConfigError::Invalid(_))));
        assert!(!scheduler.is_running());
    }
}
