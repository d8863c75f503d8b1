//! Periodic job scheduler.
//!
//! Jobs are registered with a name and an interval and are due relative to
//! an injected [`Clock`], so tests drive them with `ManualClock` and
//! `run_pending` instead of real time.
//!
//! Every run goes through a fault boundary: an `Err` or a panic is logged
//! and counted, and the scheduler carries on with the next job.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use qbtc_domain::Clock;

use crate::error::DaemonResult;
use crate::metrics::DaemonMetrics;

/// Boxed job future
pub type JobFuture = Pin<Box<dyn Future<Output = DaemonResult<()>> + Send>>;

type JobFn = Box<dyn Fn() -> JobFuture + Send + Sync>;

struct Job {
    name: String,
    interval: chrono::Duration,
    next_run: DateTime<Utc>,
    runs: u64,
    failures: u64,
    task: JobFn,
}

/// Per-job counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStats {
    /// Job name
    pub name: String,
    /// Completed runs (including failed ones)
    pub runs: u64,
    /// Runs that returned an error or panicked
    pub failures: u64,
    /// When the job is next due
    pub next_run: DateTime<Utc>,
}

/// Runs named jobs at fixed intervals, one at a time.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    jobs: Vec<Job>,
    tick: Duration,
    metrics: Option<Arc<DaemonMetrics>>,
}

impl Scheduler {
    /// Scheduler polling once per second.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, jobs: Vec::new(), tick: Duration::from_secs(1), metrics: None }
    }

    /// Poll period of `run`
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Count failures in the metrics registry
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<DaemonMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a job, first due one interval from now.
    pub fn every<F, Fut>(&mut self, name: &str, interval: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DaemonResult<()>> + Send + 'static,
    {
        let interval =
            chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let next_run = self.clock.now() + interval;
        self.jobs.push(Job {
            name: name.to_string(),
            interval,
            next_run,
            runs: 0,
            failures: 0,
            task: Box::new(move || Box::pin(task())),
        });
        debug!(job = name, ?interval, "Job registered");
    }

    /// Names of the registered jobs
    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// Counters of every job
    pub fn stats(&self) -> Vec<JobStats> {
        self.jobs
            .iter()
            .map(|j| JobStats {
                name: j.name.clone(),
                runs: j.runs,
                failures: j.failures,
                next_run: j.next_run,
            })
            .collect()
    }

    /// Run every due job once, in registration order.
    ///
    /// Returns how many jobs ran. A job that fell behind runs once and is
    /// rescheduled from now; missed runs are not replayed.
    pub async fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        for job in self.jobs.iter_mut() {
            let now = self.clock.now();
            if now < job.next_run {
                continue;
            }

            let outcome = AssertUnwindSafe((job.task)()).catch_unwind().await;
            job.runs += 1;
            ran += 1;
            job.next_run = self.clock.now().max(now) + job.interval;

            let failed = match outcome {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    warn!(job = %job.name, error = %e, "Scheduled job failed");
                    true
                },
                Err(panic) => {
                    error!(
                        job = %job.name,
                        panic = %panic_message(&*panic),
                        "Scheduled job panicked"
                    );
                    true
                },
            };
            if failed {
                job.failures += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.job_failed(&job.name);
                }
            }
        }
        ran
    }

    /// Drive the jobs in real time until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(jobs = ?self.job_names(), "Scheduler started");
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_pending().await;
                }
            }
        }
        info!("Scheduler stopped");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaemonError;
    use chrono::TimeZone;
    use qbtc_domain::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }

    fn counting_job(
        counter: &Arc<AtomicU32>,
    ) -> impl Fn() -> futures_util::future::Ready<DaemonResult<()>> {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures_util::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_jobs_run_when_due() {
        let clock = clock();
        let mut scheduler = Scheduler::new(Arc::new(clock.clone()));
        let fast = Arc::new(AtomicU32::new(0));
        let slow = Arc::new(AtomicU32::new(0));
        scheduler.every("fast", Duration::from_secs(5), counting_job(&fast));
        scheduler.every("slow", Duration::from_secs(10), counting_job(&slow));

        // Nothing is due at registration time
        assert_eq!(scheduler.run_pending().await, 0);

        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(scheduler.run_pending().await, 1);

        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(scheduler.run_pending().await, 2);

        assert_eq!(fast.load(Ordering::SeqCst), 2);
        assert_eq!(slow.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missed_runs_are_not_replayed() {
        let clock = clock();
        let mut scheduler = Scheduler::new(Arc::new(clock.clone()));
        let count = Arc::new(AtomicU32::new(0));
        scheduler.every("monitor", Duration::from_secs(5), counting_job(&count));

        clock.advance(chrono::Duration::seconds(60));
        scheduler.run_pending().await;
        scheduler.run_pending().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.stats()[0].next_run, clock.now() + chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_fault_boundary_contains_errors_and_panics() {
        let clock = clock();
        let metrics = Arc::new(DaemonMetrics::new().unwrap());
        let mut scheduler =
            Scheduler::new(Arc::new(clock.clone())).with_metrics(metrics.clone());
        let healthy = Arc::new(AtomicU32::new(0));

        scheduler.every("failing", Duration::from_secs(1), || async {
            Err::<(), _>(DaemonError::Config("boom".to_string()))
        });
        scheduler.every("panicking", Duration::from_secs(1), || async {
            if true {
                panic!("job exploded");
            }
            Ok(())
        });
        scheduler.every("healthy", Duration::from_secs(1), counting_job(&healthy));

        for _ in 0..3 {
            clock.advance(chrono::Duration::seconds(1));
            assert_eq!(scheduler.run_pending().await, 3);
        }

        let stats = scheduler.stats();
        assert_eq!(stats[0].failures, 3);
        assert_eq!(stats[1].failures, 3);
        assert_eq!(stats[2].failures, 0);
        assert_eq!(healthy.load(Ordering::SeqCst), 3);
        assert!(metrics.render().unwrap().contains("qbtc_job_failures_total{job=\"panicking\"} 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let scheduler = Scheduler::new(Arc::new(qbtc_domain::SystemClock));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        cancel.cancel();
        handle.await.unwrap();
    }
}
