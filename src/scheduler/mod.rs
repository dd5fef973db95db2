//! Named recurring jobs on cron expressions or fixed intervals.
//!
//! Every job has its own ticker task, so a slow handler never delays another
//! job. A job does not start again while its previous run is still going;
//! that tick is skipped. Handler errors and panics are logged and the job
//! keeps its schedule.

pub mod jobs;
mod trigger;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use trigger::Trigger;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Shanghai;

pub type JobFuture = BoxFuture<'static, anyhow::Result<()>>;
pub type JobHandler = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wrap an async closure as a job handler.
pub fn job_handler<F, Fut>(f: F) -> JobHandler
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || -> JobFuture { Box::pin(f()) })
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression {expression:?}: {reason}")]
    InvalidCron { expression: String, reason: String },
    #[error("Unknown time zone: {0}")]
    InvalidTimezone(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    /// The job's ticker is active.
    pub running: bool,
    /// A handler invocation is in progress.
    pub busy: bool,
    pub next_run_time: Option<DateTime<Utc>>,
}

const NO_NEXT_RUN: i64 = i64::MIN;

struct Job {
    trigger: Trigger,
    handler: JobHandler,
    busy: Arc<AtomicBool>,
    /// Millisecond timestamp of the next firing, `NO_NEXT_RUN` when unknown.
    next_run: Arc<AtomicI64>,
    ticker: Option<JoinHandle<()>>,
}

impl Job {
    fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.next_run.store(NO_NEXT_RUN, Ordering::Release);
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct Scheduler {
    timezone: Tz,
    jobs: Mutex<HashMap<String, Job>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEZONE)
    }
}

impl Scheduler {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Scheduler in a time zone given by IANA name, e.g. `Asia/Shanghai`.
    pub fn with_timezone_name(name: &str) -> Result<Self, SchedulerError> {
        let timezone: Tz = name
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))?;
        Ok(Self::new(timezone))
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Register and start `name`, stopping and replacing any job of that name.
    ///
    /// A replacement shares its predecessor's busy flag, so it does not start
    /// while a run of the old job is still in flight.
    pub async fn register_job(&self, name: &str, trigger: Trigger, handler: JobHandler) {
        let mut jobs = self.jobs.lock().await;
        let busy = jobs
            .get(name)
            .map(|old| old.busy.clone())
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
        let mut job = Job {
            trigger,
            handler,
            busy,
            next_run: Arc::new(AtomicI64::new(NO_NEXT_RUN)),
            ticker: None,
        };
        job.ticker = Some(self.spawn_ticker(name, &job));

        if jobs.insert(name.to_string(), job).is_some() {
            debug!("Replaced job {}", name);
        } else {
            debug!("Registered job {}", name);
        }
    }

    /// Register `name` on a cron expression.
    pub async fn register_cron(
        &self,
        name: &str,
        expression: &str,
        handler: JobHandler,
    ) -> Result<(), SchedulerError> {
        let trigger = Trigger::cron(expression)?;
        self.register_job(name, trigger, handler).await;
        Ok(())
    }

    /// Stop and remove `name`. Returns whether it existed.
    pub async fn unregister_job(&self, name: &str) -> bool {
        let removed = self.jobs.lock().await.remove(name);
        if removed.is_some() {
            debug!("Unregistered job {}", name);
        }
        removed.is_some()
    }

    pub async fn has_job(&self, name: &str) -> bool {
        self.jobs.lock().await.contains_key(name)
    }

    /// Stop every ticker. Definitions are kept for [`Scheduler::restart_all`].
    /// Handler runs already in progress finish on their own.
    pub async fn stop_all(&self) {
        let mut jobs = self.jobs.lock().await;
        for job in jobs.values_mut() {
            job.stop();
        }
        info!("Stopped {} scheduled job(s)", jobs.len());
    }

    /// Start every stopped job again.
    pub async fn restart_all(&self) {
        let mut jobs = self.jobs.lock().await;
        let mut started = 0;
        for (name, job) in jobs.iter_mut() {
            if job.ticker.is_none() {
                job.ticker = Some(self.spawn_ticker(name, job));
                started += 1;
            }
        }
        info!("Restarted {} scheduled job(s)", started);
    }

    /// Status of every job, ordered by name.
    pub async fn status(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.lock().await;
        let mut status: Vec<JobStatus> = jobs
            .iter()
            .map(|(name, job)| {
                let next = job.next_run.load(Ordering::Acquire);
                JobStatus {
                    name: name.clone(),
                    schedule: job.trigger.describe(),
                    running: job.ticker.as_ref().is_some_and(|t| !t.is_finished()),
                    busy: job.busy.load(Ordering::Acquire),
                    next_run_time: (next != NO_NEXT_RUN)
                        .then(|| DateTime::from_timestamp_millis(next))
                        .flatten(),
                }
            })
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    fn spawn_ticker(&self, name: &str, job: &Job) -> JoinHandle<()> {
        let name = name.to_string();
        let trigger = job.trigger.clone();
        let handler = job.handler.clone();
        let busy = job.busy.clone();
        let next_run = job.next_run.clone();
        let timezone = self.timezone;

        // Visible to status() before the ticker first runs.
        if let Some(first) = trigger.next_after(Utc::now(), timezone) {
            next_run.store(first.timestamp_millis(), Ordering::Release);
        }

        tokio::spawn(async move {
            let clock = Clock::start();
            let mut last = clock.now();
            loop {
                let Some(next) = trigger.next_after(last, timezone) else {
                    warn!("Job {} has no future run time", name);
                    next_run.store(NO_NEXT_RUN, Ordering::Release);
                    return;
                };
                next_run.store(next.timestamp_millis(), Ordering::Release);

                let wait = (next - clock.now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                last = next;

                if busy.swap(true, Ordering::AcqRel) {
                    warn!("Job {} still running, skipping this run", name);
                    continue;
                }
                tokio::spawn(run_once(name.clone(), handler(), busy.clone()));
            }
        })
    }
}

/// Run one handler invocation, logging its outcome and clearing `busy`.
async fn run_once(name: String, run: JobFuture, busy: Arc<AtomicBool>) {
    debug!("Running job {}", name);
    match tokio::spawn(run).await {
        Ok(Ok(())) => debug!("Job {} finished", name),
        Ok(Err(e)) => error!("Job {} failed: {:#}", name, e),
        Err(e) if e.is_panic() => error!("Job {} panicked", name),
        Err(_) => debug!("Job {} cancelled", name),
    }
    busy.store(false, Ordering::Release);
}

/// Wall-clock time advanced by the runtime's monotonic clock.
struct Clock {
    started: tokio::time::Instant,
    wall: DateTime<Utc>,
}

impl Clock {
    fn start() -> Self {
        Self {
            started: tokio::time::Instant::now(),
            wall: Utc::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap_or_default();
        self.wall + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: Arc<AtomicUsize>) -> JobHandler {
        job_handler(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_job_fires_each_period() {
        let scheduler = Scheduler::default();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_job("tick", Trigger::every_minutes(1), counting(runs.clone()))
            .await;

        tokio::time::sleep(Duration::from_secs(190)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregistering_replaces_job() {
        let scheduler = Scheduler::default();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler
            .register_job("x", Trigger::every_minutes(1), counting(first.clone()))
            .await;
        scheduler
            .register_job("x", Trigger::every_minutes(2), counting(second.clone()))
            .await;
        tokio::time::sleep(Duration::from_secs(250)).await;

        let status = scheduler.status().await;
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].schedule, "every 2m");
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_run_is_skipped() {
        let scheduler = Scheduler::default();
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        scheduler
            .register_job(
                "slow",
                Trigger::every_minutes(1),
                job_handler(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(150)).await;
                        Ok(())
                    }
                }),
            )
            .await;

        // Fires at 60 (busy until 210), skips 120 and 180, fires at 240.
        tokio::time::sleep(Duration::from_secs(250)).await;

        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_waits_for_in_flight_run() {
        let scheduler = Scheduler::default();
        scheduler
            .register_job(
                "x",
                Trigger::every_minutes(1),
                job_handler(|| async {
                    tokio::time::sleep(Duration::from_secs(90)).await;
                    Ok(())
                }),
            )
            .await;
        // The old job starts at 60 and stays busy until 150.
        tokio::time::sleep(Duration::from_secs(70)).await;

        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_job("x", Trigger::every_minutes(1), counting(runs.clone()))
            .await;

        // The replacement's tick at 130 overlaps the old run and is skipped.
        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(scheduler.status().await[0].busy);

        // Its tick at 190 runs.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_and_panicking_jobs_keep_schedule() {
        let scheduler = Scheduler::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler
            .register_job(
                "flaky",
                Trigger::every_minutes(1),
                job_handler(move || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            anyhow::bail!("first run fails");
                        }
                        if n == 1 {
                            panic!("second run panics");
                        }
                        Ok(())
                    }
                }),
            )
            .await;

        tokio::time::sleep(Duration::from_secs(190)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(!scheduler.status().await[0].busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_keeps_definitions() {
        let scheduler = Scheduler::default();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_job("tick", Trigger::every_minutes(1), counting(runs.clone()))
            .await;

        scheduler.stop_all().await;
        tokio::time::sleep(Duration::from_secs(130)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        let status = scheduler.status().await;
        assert!(!status[0].running);
        assert_eq!(status[0].next_run_time, None);

        scheduler.restart_all().await;
        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(scheduler.status().await[0].running);
    }

    #[tokio::test]
    async fn test_unregister_is_noop_when_absent() {
        let scheduler = Scheduler::default();
        assert!(!scheduler.unregister_job("missing").await);

        scheduler
            .register_cron("nightly", "0 0 * * *", counting(Arc::default()))
            .await
            .unwrap();
        assert!(scheduler.has_job("nightly").await);
        assert!(scheduler.status().await[0].next_run_time.is_some());
        assert!(scheduler.unregister_job("nightly").await);
        assert!(!scheduler.has_job("nightly").await);
    }

    #[test]
    fn test_timezone_by_name() {
        assert!(Scheduler::with_timezone_name("Europe/Berlin").is_ok());
        assert!(matches!(
            Scheduler::with_timezone_name("Mars/Olympus"),
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }
}
