//! Recurring-job scheduler driving the agent's report, heartbeat and poll
//! loops.
//!
//! Each job fires on its own fixed-interval timeline, re-armed relative to
//! the previous scheduled fire time rather than to completion time, so a
//! slow run does not push every later tick. Runs of the same job are
//! serialized by a per-job guard: a tick that lands while the previous run
//! is still in flight becomes at most one pending trigger, fired as soon as
//! the guard releases. One job's failure never stops its own future ticks
//! or any other job.

use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

pub type JobFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type JobAction = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wraps an async closure into the boxed form the scheduler stores.
pub fn job_action<F, Fut>(f: F) -> JobAction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as JobFuture)
}

#[derive(Clone)]
struct JobSpec {
    interval: Duration,
    action: JobAction,
}

struct Job {
    spec_tx: watch::Sender<JobSpec>,
    running: Arc<AtomicBool>,
    released: Arc<Notify>,
    current_run: Arc<Mutex<Option<JoinHandle<()>>>>,
    driver: Option<JoinHandle<()>>,
}

pub struct JobScheduler {
    jobs: Mutex<HashMap<String, Job>>,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl JobScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            jobs: Mutex::new(HashMap::new()),
            shutdown_tx,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Installs a job, or replaces the interval and action of an existing
    /// one in place. Replacement keeps the in-flight guard untouched and
    /// never triggers an immediate run; a pending deadline is re-armed
    /// relative to the previous scheduled fire time. Safe to call from
    /// inside the job's own action.
    pub fn register_or_replace(&self, name: &str, interval: Duration, action: JobAction) {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(name) {
            Some(job) => {
                tracing::info!(job = %name, interval = ?interval, "Replacing job");
                job.spec_tx.send_replace(JobSpec { interval, action });
            }
            None => {
                tracing::info!(job = %name, interval = ?interval, "Registering job");
                let (spec_tx, _) = watch::channel(JobSpec { interval, action });
                let mut job = Job {
                    spec_tx,
                    running: Arc::new(AtomicBool::new(false)),
                    released: Arc::new(Notify::new()),
                    current_run: Arc::new(Mutex::new(None)),
                    driver: None,
                };
                if self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst) {
                    self.spawn_driver(name, &mut job);
                }
                jobs.insert(name.to_string(), job);
            }
        }
    }

    /// Returns the currently configured interval of a job, if registered.
    pub fn interval_of(&self, name: &str) -> Option<Duration> {
        self.jobs
            .lock()
            .unwrap()
            .get(name)
            .map(|job| job.spec_tx.borrow().interval)
    }

    /// Begins the scheduling timeline for all registered jobs. Idempotent;
    /// the first fire of each job happens one interval after this call.
    pub fn start(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            tracing::warn!("Scheduler already stopped, not starting");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut jobs = self.jobs.lock().unwrap();
        for (name, job) in jobs.iter_mut() {
            self.spawn_driver(name, job);
        }
        tracing::info!(jobs = jobs.len(), "Scheduler started");
    }

    /// Halts all future triggers, then waits for any run still in flight to
    /// finish before returning. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_tx.send_replace(true);

        let drivers: Vec<JoinHandle<()>> = {
            let mut jobs = self.jobs.lock().unwrap();
            jobs.values_mut().filter_map(|job| job.driver.take()).collect()
        };
        for driver in drivers {
            let _ = driver.await;
        }

        let runs: Vec<JoinHandle<()>> = {
            let jobs = self.jobs.lock().unwrap();
            jobs.values()
                .filter_map(|job| job.current_run.lock().unwrap().take())
                .collect()
        };
        for run in runs {
            let _ = run.await;
        }
        tracing::info!("Scheduler stopped");
    }

    fn spawn_driver(&self, name: &str, job: &mut Job) {
        let driver = tokio::spawn(drive_job(
            name.to_string(),
            job.spec_tx.subscribe(),
            Arc::clone(&job.running),
            Arc::clone(&job.released),
            Arc::clone(&job.current_run),
            self.shutdown_tx.subscribe(),
        ));
        job.driver = Some(driver);
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the running guard when a run finishes, including by panic, and
/// wakes a driver holding a pending trigger.
struct RunGuard {
    running: Arc<AtomicBool>,
    released: Arc<Notify>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.released.notify_one();
    }
}

async fn drive_job(
    name: String,
    mut spec_rx: watch::Receiver<JobSpec>,
    running: Arc<AtomicBool>,
    released: Arc<Notify>,
    current_run: Arc<Mutex<Option<JoinHandle<()>>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    if *shutdown_rx.borrow() {
        return;
    }
    let mut spec = spec_rx.borrow_and_update().clone();
    let mut last_fire = Instant::now();
    let mut next = last_fire + spec.interval;

    loop {
        tokio::select! {
            _ = sleep_until(next) => {}
            changed = spec_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                spec = spec_rx.borrow_and_update().clone();
                next = last_fire + spec.interval;
                continue;
            }
            _ = shutdown_rx.changed() => return,
        }

        // Tick due. If the previous run still holds the guard, keep a single
        // pending trigger and fire the moment the guard releases.
        if running.load(Ordering::Acquire) {
            tracing::debug!(job = %name, "Tick due while previous run in flight, deferring");
        }
        while running.load(Ordering::Acquire) {
            tokio::select! {
                _ = released.notified() => {}
                changed = spec_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    spec = spec_rx.borrow_and_update().clone();
                }
                _ = shutdown_rx.changed() => return,
            }
        }

        running.store(true, Ordering::Release);
        let guard = RunGuard {
            running: Arc::clone(&running),
            released: Arc::clone(&released),
        };
        let run = (spec.action)();
        let job_name = name.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = run.await {
                tracing::warn!(job = %job_name, error = %e, "Job run failed");
            }
        });
        *current_run.lock().unwrap() = Some(handle);

        // Re-arm from the scheduled fire time; when the timeline has fallen
        // behind, collapse the backlog to a single immediate tick.
        last_fire = next;
        next = last_fire + spec.interval;
        let now = Instant::now();
        if next < now {
            next = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn counting_action(
        count: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        hold: Duration,
    ) -> JobAction {
        job_action(move || {
            let count = Arc::clone(&count);
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                sleep(hold).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn runs_are_never_concurrent_with_themselves() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        scheduler.register_or_replace(
            "slow",
            Duration::from_millis(20),
            counting_action(
                Arc::clone(&count),
                Arc::clone(&in_flight),
                Arc::clone(&max_in_flight),
                Duration::from_millis(70),
            ),
        );
        scheduler.start();
        sleep(Duration::from_millis(350)).await;
        scheduler.stop().await;

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn registration_does_not_trigger_an_immediate_run() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        scheduler.register_or_replace(
            "patient",
            Duration::from_millis(300),
            counting_action(
                Arc::clone(&count),
                Arc::clone(&in_flight),
                Arc::clone(&max_in_flight),
                Duration::ZERO,
            ),
        );
        scheduler.start();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn replacing_the_interval_rearms_the_pending_deadline() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let action = counting_action(
            Arc::clone(&count),
            Arc::clone(&in_flight),
            Arc::clone(&max_in_flight),
            Duration::ZERO,
        );

        scheduler.register_or_replace("tunable", Duration::from_millis(100), Arc::clone(&action));
        scheduler.start();
        // Push the first fire out before it happens.
        sleep(Duration::from_millis(30)).await;
        scheduler.register_or_replace("tunable", Duration::from_millis(500), action);
        assert_eq!(
            scheduler.interval_of("tunable"),
            Some(Duration::from_millis(500))
        );

        sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        sleep(Duration::from_millis(350)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn a_failing_job_keeps_its_schedule_and_its_neighbors() {
        let scheduler = JobScheduler::new();
        let failures = Arc::new(AtomicUsize::new(0));
        let successes = Arc::new(AtomicUsize::new(0));

        let failing = {
            let failures = Arc::clone(&failures);
            job_action(move || {
                let failures = Arc::clone(&failures);
                async move {
                    failures.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("collector offline")
                }
            })
        };
        let healthy = {
            let successes = Arc::clone(&successes);
            job_action(move || {
                let successes = Arc::clone(&successes);
                async move {
                    successes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        scheduler.register_or_replace("failing", Duration::from_millis(40), failing);
        scheduler.register_or_replace("healthy", Duration::from_millis(40), healthy);
        scheduler.start();
        sleep(Duration::from_millis(220)).await;
        scheduler.stop().await;

        assert!(failures.load(Ordering::SeqCst) >= 2);
        assert!(successes.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn stop_waits_for_the_run_in_flight() {
        let scheduler = JobScheduler::new();
        let finished = Arc::new(AtomicBool::new(false));

        let action = {
            let finished = Arc::clone(&finished);
            job_action(move || {
                let finished = Arc::clone(&finished);
                async move {
                    sleep(Duration::from_millis(150)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        scheduler.register_or_replace("draining", Duration::from_millis(30), action);
        scheduler.start();
        // Let the first tick fire and the run get under way.
        sleep(Duration::from_millis(60)).await;
        scheduler.stop().await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let scheduler = JobScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        scheduler.register_or_replace(
            "steady",
            Duration::from_millis(50),
            counting_action(
                Arc::clone(&count),
                Arc::clone(&in_flight),
                Arc::clone(&max_in_flight),
                Duration::ZERO,
            ),
        );
        scheduler.start();
        scheduler.start();
        sleep(Duration::from_millis(120)).await;
        scheduler.stop().await;
        scheduler.stop().await;

        // A doubled start must not double the tick rate.
        assert!(count.load(Ordering::SeqCst) <= 3);
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_panicking_run_releases_the_guard() {
        let scheduler = JobScheduler::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let action = {
            let attempts = Arc::clone(&attempts);
            job_action(move || {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    panic!("handler bug")
                }
            })
        };

        scheduler.register_or_replace("crashy", Duration::from_millis(40), action);
        scheduler.start();
        sleep(Duration::from_millis(220)).await;
        scheduler.stop().await;

        // Without guard release on panic only the first tick would run.
        assert!(attempts.load(Ordering::SeqCst) >= 2);
    }
}
