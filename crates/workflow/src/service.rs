//! The running scheduler.
//!
//! One task owns the [`Scheduler`] table and is the only thing that mutates
//! it. It wakes every tick, hands due avatars to a bounded worker pool, and
//! answers commands from [`SchedulerHandle`]s. Avatar runs never execute on
//! the tick task itself.

use crate::scheduler::{ScheduleSnapshot, Scheduler, TriggerOutcome, TriggerTarget};
use aicrew_config::SchedulerConfig;
use aicrew_core::avatar::{AvatarId, AvatarRunner, CycleReport};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("scheduler is not running")]
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    /// Maximum avatar runs executing at once
    pub workers: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            workers: 4,
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            tick: Duration::from_millis(config.tick_millis.max(1)),
            workers: config.workers.max(1),
        }
    }
}

enum Command {
    Trigger {
        target: TriggerTarget,
        reply: oneshot::Sender<Vec<TriggerOutcome>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ScheduleSnapshot>>,
    },
    SetEnabled {
        avatar: AvatarId,
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
}

/// Cheap, cloneable access to a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// Run avatars now, outside their schedule.
    pub async fn trigger(&self, target: TriggerTarget) -> Result<Vec<TriggerOutcome>, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Trigger { target, reply }).await?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    pub async fn snapshot(&self) -> Result<Vec<ScheduleSnapshot>, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    /// Pause or resume an avatar's schedule; `false` if it is unknown.
    pub async fn set_enabled(&self, avatar: &str, enabled: bool) -> Result<bool, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetEnabled {
            avatar: avatar.into(),
            enabled,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    async fn send(&self, command: Command) -> Result<(), ServiceError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ServiceError::Stopped)
    }
}

/// Wall-clock time derived from the runtime's monotonic clock.
struct Clock {
    wall: DateTime<Utc>,
    started: Instant,
}

impl Clock {
    fn start() -> Self {
        Self {
            wall: Utc::now(),
            started: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.wall + chrono::Duration::from_std(self.started.elapsed()).unwrap_or(chrono::Duration::zero())
    }
}

pub struct SchedulerService {
    scheduler: Scheduler,
    runner: Arc<dyn AvatarRunner>,
    settings: SchedulerSettings,
}

impl SchedulerService {
    pub fn new(scheduler: Scheduler, runner: Arc<dyn AvatarRunner>, settings: SchedulerSettings) -> Self {
        Self {
            scheduler,
            runner,
            settings,
        }
    }

    /// Start the tick loop. It stops once every handle has been dropped.
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(self.run(rx));
        (SchedulerHandle { commands: tx }, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let clock = Clock::start();
        let workers = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(AvatarId, Option<CycleReport>)>();

        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            avatars = self.scheduler.len(),
            workers = self.settings.workers,
            tick_ms = self.settings.tick.as_millis() as u64,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for avatar in self.scheduler.tick(clock.now()) {
                        self.dispatch(avatar, &workers, &done_tx);
                    }
                }
                Some((avatar, report)) = done_rx.recv() => {
                    self.scheduler.complete(&avatar, report);
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command, clock.now(), &workers, &done_tx),
                    None => {
                        info!("Scheduler stopping");
                        break;
                    }
                },
            }
        }
    }

    fn handle(
        &mut self,
        command: Command,
        now: DateTime<Utc>,
        workers: &Arc<Semaphore>,
        done: &mpsc::UnboundedSender<(AvatarId, Option<CycleReport>)>,
    ) {
        match command {
            Command::Trigger { target, reply } => {
                let outcomes = self.scheduler.trigger_now(&target, now);
                for outcome in &outcomes {
                    if outcome.status == crate::scheduler::TriggerStatus::Triggered {
                        self.dispatch(outcome.avatar.clone(), workers, done);
                    }
                }
                let _ = reply.send(outcomes);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.scheduler.snapshot());
            }
            Command::SetEnabled {
                avatar,
                enabled,
                reply,
            } => {
                let _ = reply.send(self.scheduler.set_enabled(&avatar, enabled));
            }
        }
    }

    /// Run one avatar on a worker. Completion is always reported back, even
    /// when the run panics, so the avatar cannot stay in flight forever.
    fn dispatch(
        &self,
        avatar: AvatarId,
        workers: &Arc<Semaphore>,
        done: &mpsc::UnboundedSender<(AvatarId, Option<CycleReport>)>,
    ) {
        let runner = self.runner.clone();
        let workers = workers.clone();
        let done = done.clone();

        tokio::spawn(async move {
            let report = match workers.acquire_owned().await {
                Ok(_permit) => {
                    let id = avatar.clone();
                    let run = tokio::spawn(async move { runner.run_avatar(&id).await });
                    match run.await {
                        Ok(report) => {
                            info!(
                                avatar = %avatar,
                                fetched = report.fetched,
                                replied = report.replied,
                                ignored = report.ignored,
                                failed = report.failed,
                                send_failures = report.send_failures,
                                "Avatar run finished"
                            );
                            Some(report)
                        }
                        Err(e) => {
                            error!(avatar = %avatar, error = %e, "Avatar run aborted");
                            None
                        }
                    }
                }
                Err(_) => None,
            };
            if done.send((avatar, report)).is_err() {
                debug!("Scheduler gone before run completed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TriggerStatus;
    use aicrew_core::avatar::ScheduleSpec;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Sleeps for `delay` per run and watches for overlap.
    struct SlowRunner {
        delay: Duration,
        running: Mutex<HashSet<String>>,
        overlapped: AtomicBool,
        active: AtomicUsize,
        peak: AtomicUsize,
        runs: Mutex<Vec<String>>,
    }

    impl SlowRunner {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                running: Mutex::new(HashSet::new()),
                overlapped: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                runs: Mutex::new(Vec::new()),
            })
        }

        fn runs_of(&self, id: &str) -> usize {
            self.runs.lock().unwrap().iter().filter(|r| *r == id).count()
        }
    }

    #[async_trait]
    impl AvatarRunner for SlowRunner {
        async fn run_avatar(&self, id: &str) -> CycleReport {
            if !self.running.lock().unwrap().insert(id.to_string()) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            self.runs.lock().unwrap().push(id.to_string());

            tokio::time::sleep(self.delay).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            self.running.lock().unwrap().remove(id);
            CycleReport {
                fetched: 1,
                replied: 1,
                ..Default::default()
            }
        }
    }

    struct PanickyRunner;

    #[async_trait]
    impl AvatarRunner for PanickyRunner {
        async fn run_avatar(&self, _id: &str) -> CycleReport {
            panic!("connector exploded");
        }
    }

    fn every(secs: u64) -> ScheduleSpec {
        ScheduleSpec::Interval {
            every_secs: secs,
            jitter_secs: 0,
        }
    }

    fn settings(workers: usize) -> SchedulerSettings {
        SchedulerSettings {
            tick: Duration::from_millis(100),
            workers,
        }
    }

    fn table(avatars: &[(&str, u64)]) -> Scheduler {
        let mut s = Scheduler::new();
        for (id, secs) in avatars {
            s.register(id, &every(*secs), vec![], Utc::now()).unwrap();
        }
        s
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_avatar_never_runs_concurrently() {
        let runner = SlowRunner::new(Duration::from_millis(2500));
        let service = SchedulerService::new(table(&[("ada", 1)]), runner.clone(), settings(4));
        let (handle, _task) = service.spawn();

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(!runner.overlapped.load(Ordering::SeqCst));
        let runs = runner.runs_of("ada");
        assert!((2..=4).contains(&runs), "runs = {runs}");

        let snap = handle.snapshot().await.unwrap();
        assert!(snap[0].skips > 0, "overruns should be counted as skips");
        assert_eq!(snap[0].last_report.as_ref().unwrap().replied, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_pool_bounds_concurrency() {
        let runner = SlowRunner::new(Duration::from_secs(1));
        let avatars = table(&[("a", 2), ("b", 2), ("c", 2)]);
        let (_handle, _task) = SchedulerService::new(avatars, runner.clone(), settings(1)).spawn();

        tokio::time::sleep(Duration::from_secs(7)).await;

        assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
        assert!(runner.runs_of("a") >= 1);
        assert!(runner.runs_of("c") >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn different_avatars_run_in_parallel() {
        let runner = SlowRunner::new(Duration::from_secs(1));
        let avatars = table(&[("a", 3), ("b", 3)]);
        let (_handle, _task) = SchedulerService::new(avatars, runner.clone(), settings(4)).spawn();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_coalesces_with_in_flight_run() {
        let runner = SlowRunner::new(Duration::from_secs(5));
        let avatars = table(&[("ada", 3600), ("bob", 3600)]);
        let (handle, _task) = SchedulerService::new(avatars, runner.clone(), settings(4)).spawn();

        let first = handle.trigger(TriggerTarget::Avatar("ada".into())).await.unwrap();
        assert_eq!(first[0].status, TriggerStatus::Triggered);

        let second = handle.trigger(TriggerTarget::All).await.unwrap();
        assert_eq!(second[0].status, TriggerStatus::SkippedInFlight);
        assert_eq!(second[1].status, TriggerStatus::Triggered);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(runner.runs_of("ada"), 1);

        let again = handle.trigger(TriggerTarget::Avatar("ada".into())).await.unwrap();
        assert_eq!(again[0].status, TriggerStatus::Triggered);

        let unknown = handle.trigger(TriggerTarget::Avatar("zed".into())).await.unwrap();
        assert_eq!(unknown[0].status, TriggerStatus::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_run_clears_in_flight() {
        let (handle, _task) =
            SchedulerService::new(table(&[("ada", 3600)]), Arc::new(PanickyRunner), settings(1)).spawn();

        handle.trigger(TriggerTarget::All).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snap = handle.snapshot().await.unwrap();
        assert!(!snap[0].in_flight);
        assert!(snap[0].last_report.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn paused_avatar_is_not_scheduled() {
        let runner = SlowRunner::new(Duration::from_millis(10));
        let (handle, _task) = SchedulerService::new(table(&[("ada", 1)]), runner.clone(), settings(1)).spawn();

        assert!(handle.set_enabled("ada", false).await.unwrap());
        assert!(!handle.set_enabled("zed", false).await.unwrap());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runner.runs_of("ada"), 0);
    }

    #[tokio::test]
    async fn handle_reports_stopped_scheduler() {
        let runner = SlowRunner::new(Duration::from_millis(1));
        let (handle, task) = SchedulerService::new(Scheduler::new(), runner, settings(1)).spawn();
        task.abort();
        let _ = task.await;
        assert_eq!(handle.snapshot().await.unwrap_err(), ServiceError::Stopped);
    }
}
