//! AdaptiveScheduler - 電力状態に応じたバッチ実行ループ
//!
//! # Cycle
//! 1. sample the power signal
//! 2. critical pressure + empty queue: idle for the recommended pacing delay
//! 3. collect up to `pressure.max_batch_size()` tasks, stopping at the first
//!    head that is not collectible (never skipping past it)
//! 4. run the batch: one by one with a gap under High/Critical pressure,
//!    otherwise non-batchable tasks first and the rest fanned out together
//! 5. sleep `cycle_interval`
//!
//! A failed or panicking cycle is logged and followed by `error_backoff`;
//! the loop itself only ends on `stop()`.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::status::SchedulerStatus;
use crate::config::SchedulerConfig;
use crate::domain::outcome::panic_message;
use crate::domain::{
    CadenceError, PowerRequirement, PowerSnapshot, PressureLevel, Priority, Task, TaskId,
    TaskOutcome, TaskReport,
};
use crate::ports::{Clock, PowerSignalSource, SystemClock};
use crate::queue::{QueuedTask, TaskQueue};

enum CycleOutcome {
    /// Nothing to do under critical pressure; idle this long.
    Idle(Duration),
    Ran { executed: usize },
}

struct Shared {
    config: SchedulerConfig,
    queue: TaskQueue,
    power: Arc<dyn PowerSignalSource>,
    clock: Arc<dyn Clock>,
    status: watch::Sender<SchedulerStatus>,
    reports: broadcast::Sender<TaskReport>,
}

struct RunHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Single cooperative scheduling loop.
///
/// `Stopped -> Running -> Stopped`. Cheap to share behind an `Arc`; every
/// method takes `&self`.
pub struct AdaptiveScheduler {
    shared: Arc<Shared>,
    run: Mutex<Option<RunHandle>>,
}

impl AdaptiveScheduler {
    pub fn new(
        config: SchedulerConfig,
        power: Arc<dyn PowerSignalSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (status, _) = watch::channel(SchedulerStatus::default());
        let (reports, _) = broadcast::channel(config.report_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                queue: TaskQueue::new(Arc::clone(&clock)),
                config,
                power,
                clock,
                status,
                reports,
            }),
            run: Mutex::new(None),
        }
    }

    pub fn with_system_clock(config: SchedulerConfig, power: Arc<dyn PowerSignalSource>) -> Self {
        Self::new(config, power, Arc::new(SystemClock))
    }

    fn run_handle(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fire-and-forget enqueue.
    #[allow(clippy::too_many_arguments)]
    pub fn schedule<F, Fut>(
        &self,
        id: impl Into<TaskId>,
        priority: Priority,
        ready_delay: Duration,
        max_age: Duration,
        batchable: bool,
        power_requirement: PowerRequirement,
        action: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CadenceError>> + Send + 'static,
    {
        self.schedule_task(
            Task::builder(action)
                .id(id)
                .priority(priority)
                .ready_delay(ready_delay)
                .max_age(max_age)
                .batchable(batchable)
                .power_requirement(power_requirement)
                .build(),
        );
    }

    pub fn schedule_task(&self, task: Task) {
        self.shared.queue.enqueue(task);
    }

    /// Spawn the loop. A no-op while it is already running.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start(&self) {
        let mut run = self.run_handle();
        if run.as_ref().is_some_and(|handle| !handle.join.is_finished()) {
            debug!("scheduler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let join = tokio::spawn(async move {
            scheduler_loop(shared, shutdown_rx).await;
        });
        *run = Some(RunHandle { shutdown_tx, join });
        self.shared.status.send_modify(|s| s.running = true);
        info!("scheduler started");
    }

    /// Cancel the loop and discard every pending task.
    ///
    /// Tasks already running are not interrupted; they finish on their own.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let handle = self.run_handle().take();
        let dropped = self.shared.queue.clear();
        self.shared.status.send_modify(|s| s.running = false);

        let handle = handle?;
        // ignore send error: receivers may already be dropped
        let _ = handle.shutdown_tx.send(true);
        info!(dropped, "scheduler stopped");
        Some(handle.join)
    }

    /// `stop()` and wait for the loop (and any in-flight batch) to finish.
    pub async fn shutdown(&self) {
        if let Some(join) = self.stop() {
            let _ = join.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_handle()
            .as_ref()
            .is_some_and(|handle| !handle.join.is_finished())
    }

    pub fn pending_count(&self) -> usize {
        self.shared.queue.size()
    }

    pub fn pending_count_by_priority(&self, priority: Priority) -> usize {
        self.shared.queue.size_by_priority(priority)
    }

    pub fn status(&self) -> SchedulerStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SchedulerStatus> {
        self.shared.status.subscribe()
    }

    /// Every task execution, as it finishes. Slow receivers lose old reports.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<TaskReport> {
        self.shared.reports.subscribe()
    }
}

impl Drop for AdaptiveScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.run_handle().take() {
            let _ = handle.shutdown_tx.send(true);
        }
    }
}

async fn scheduler_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        // shutdown が来ていたら抜ける
        if *shutdown_rx.borrow() {
            break;
        }

        // a panic outside the task boundary is treated like any other cycle failure
        let cycle = AssertUnwindSafe(shared.run_cycle(&mut shutdown_rx))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(CadenceError::Other(format!(
                    "scheduler cycle panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        let pause = match cycle {
            Ok(CycleOutcome::Idle(delay)) => {
                debug!(delay_ms = delay.as_millis() as u64, "critical pressure, queue empty; idling");
                delay
            }
            Ok(CycleOutcome::Ran { executed }) => {
                if executed > 0 {
                    debug!(executed, "cycle finished");
                }
                shared.config.cycle_interval
            }
            Err(err) => {
                error!(
                    error = %err,
                    backoff_ms = shared.config.error_backoff.as_millis() as u64,
                    "scheduler cycle failed"
                );
                shared.config.error_backoff
            }
        };

        if !sleep_or_shutdown(pause, &mut shutdown_rx).await {
            break;
        }
    }
    debug!("scheduler loop exited");
}

/// Sleep for `duration`. Returns `false` if shutdown was requested first.
async fn sleep_or_shutdown(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        // Err means the sender is gone, which also means stop
        _ = shutdown_rx.wait_for(|stop| *stop) => false,
    }
}

fn shutdown_requested(shutdown_rx: &watch::Receiver<bool>) -> bool {
    *shutdown_rx.borrow()
}

impl Shared {
    async fn run_cycle(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<CycleOutcome, CadenceError> {
        let snapshot = self.power.current_snapshot()?;
        let pressure = snapshot.pressure();
        self.status.send_modify(|s| {
            s.cycles += 1;
            s.last_pressure = Some(pressure);
        });

        if pressure == PressureLevel::Critical && self.queue.is_empty() {
            return Ok(CycleOutcome::Idle(self.power.recommended_pacing_delay()));
        }

        let batch = self.collect_batch(&snapshot, pressure);
        if batch.is_empty() {
            return Ok(CycleOutcome::Ran { executed: 0 });
        }
        debug!(size = batch.len(), ?pressure, "batch collected");

        let executed = if pressure.is_constrained() {
            self.run_sequential(batch, shutdown_rx).await
        } else {
            self.run_fanned_out(batch, shutdown_rx).await
        };
        Ok(CycleOutcome::Ran { executed })
    }

    fn collect_batch(&self, snapshot: &PowerSnapshot, pressure: PressureLevel) -> Vec<QueuedTask> {
        let now = self.clock.now();
        let limit = pressure.max_batch_size();
        let mut batch = Vec::with_capacity(limit);
        while batch.len() < limit {
            // stop at the first blocked head: a lower-priority task never jumps it
            let Some(entry) = self.queue.take_ready(snapshot, now) else {
                break;
            };
            batch.push(entry);
        }
        batch
    }

    /// High/Critical pressure: priority order, one at a time, `sequential_gap` apart.
    async fn run_sequential(
        &self,
        mut batch: Vec<QueuedTask>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> usize {
        batch.sort_by_key(QueuedTask::key);
        let mut executed = 0;
        for (index, entry) in batch.into_iter().enumerate() {
            if index > 0 && !sleep_or_shutdown(self.config.sequential_gap, shutdown_rx).await {
                break;
            }
            if shutdown_requested(shutdown_rx) {
                break;
            }
            let report = execute_task(entry).await;
            self.publish(report);
            executed += 1;
        }
        executed
    }

    /// Low pressure: non-batchable tasks alone in priority order, then the
    /// batchable ones concurrently. Returns when all of them are done.
    async fn run_fanned_out(
        &self,
        batch: Vec<QueuedTask>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> usize {
        let (batchable, mut solo): (Vec<_>, Vec<_>) =
            batch.into_iter().partition(QueuedTask::is_batchable);
        solo.sort_by_key(QueuedTask::key);

        let mut executed = 0;
        for entry in solo {
            if shutdown_requested(shutdown_rx) {
                return executed;
            }
            let report = execute_task(entry).await;
            self.publish(report);
            executed += 1;
        }

        if shutdown_requested(shutdown_rx) {
            return executed;
        }
        // batchable はまとめて投げて、全部終わるまで待つ
        let mut set = JoinSet::new();
        for entry in batchable {
            set.spawn(execute_task(entry));
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => {
                    self.publish(report);
                    executed += 1;
                }
                // execute_task catches panics, so only runtime shutdown gets here
                Err(err) => warn!(error = %err, "fanned-out task did not complete"),
            }
        }
        executed
    }

    fn publish(&self, report: TaskReport) {
        self.status.send_modify(|s| s.record(&report));
        // no subscribers is fine
        let _ = self.reports.send(report);
    }
}

/// Run one task with its failures contained.
async fn execute_task(entry: QueuedTask) -> TaskReport {
    let id = entry.id().clone();
    let priority = entry.priority();
    let forced = entry.is_forced();
    let task = entry.into_task();

    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => TaskOutcome::from(result),
            Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
        },
        Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
    };

    match &outcome {
        TaskOutcome::Succeeded => debug!(task_id = %id, ?priority, forced, "task succeeded"),
        TaskOutcome::Failed(err) => warn!(task_id = %id, ?priority, error = %err, "task failed"),
        TaskOutcome::Panicked(msg) => warn!(task_id = %id, ?priority, panic = %msg, "task panicked"),
    }

    TaskReport {
        id,
        priority,
        forced,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::StaticPowerSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler(power: PowerSnapshot) -> (Arc<StaticPowerSource>, AdaptiveScheduler) {
        let source = Arc::new(StaticPowerSource::new(power).with_pacing_delay(Duration::from_secs(10)));
        let scheduler = AdaptiveScheduler::with_system_clock(SchedulerConfig::default(), source.clone());
        (source, scheduler)
    }

    fn exempt() -> PowerSnapshot {
        PowerSnapshot {
            optimization_exempt: true,
            ..PowerSnapshot::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_clears_queue() {
        let (_source, scheduler) = scheduler(exempt());
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());

        scheduler.schedule_task(
            Task::builder(|| async { Ok(()) })
                .ready_delay(Duration::from_secs(3600))
                .max_age(Duration::from_secs(7200))
                .build(),
        );
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.shutdown().await;
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.pending_count(), 0);
        assert!(!scheduler.status().running);
    }

    #[tokio::test(start_paused = true)]
    async fn collect_batch_respects_pressure_cap() {
        let (_source, scheduler) = scheduler(PowerSnapshot {
            power_save: true,
            ..PowerSnapshot::default()
        });
        for i in 0..7 {
            scheduler.schedule_task(Task::builder(|| async { Ok(()) }).id(format!("t{i}")).build());
        }
        let snapshot = PowerSnapshot {
            power_save: true,
            ..PowerSnapshot::default()
        };
        let batch = scheduler
            .shared
            .collect_batch(&snapshot, snapshot.pressure());
        assert_eq!(batch.len(), PressureLevel::High.max_batch_size());
        assert_eq!(scheduler.pending_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn critical_pressure_with_empty_queue_idles() {
        let (_source, scheduler) = scheduler(PowerSnapshot {
            deep_restriction: true,
            ..PowerSnapshot::default()
        });
        let (_tx, mut rx) = watch::channel(false);
        let outcome = scheduler.shared.run_cycle(&mut rx).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Idle(d) if d == Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_does_not_abort_siblings() {
        let (_source, scheduler) = scheduler(exempt());
        let ran = Arc::new(AtomicUsize::new(0));
        scheduler.schedule_task(
            Task::builder(|| async {
                if true {
                    panic!("kaboom");
                }
                Ok(())
            })
            .id("bad")
            .build(),
        );
        for i in 0..3 {
            let ran = Arc::clone(&ran);
            scheduler.schedule_task(
                Task::builder(move || async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .id(format!("good-{i}"))
                .build(),
            );
        }

        let (_tx, mut rx) = watch::channel(false);
        let outcome = scheduler.shared.run_cycle(&mut rx).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Ran { executed: 4 }));
        assert_eq!(ran.load(Ordering::SeqCst), 3);

        let status = scheduler.status();
        assert_eq!(status.panicked, 1);
        assert_eq!(status.executed, 4);
    }

    #[tokio::test]
    async fn execute_task_reports_failure_category() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let queue = TaskQueue::new(clock.clone());
        queue.enqueue(
            Task::builder(|| async { Err(CadenceError::RateLimited { retry_after_ms: None }) })
                .id("api")
                .build(),
        );
        let entry = queue
            .take_ready(&PowerSnapshot::unrestricted(), clock.now())
            .unwrap();
        let report = execute_task(entry).await;
        assert_eq!(report.id.as_str(), "api");
        assert_eq!(
            report.outcome,
            TaskOutcome::Failed(CadenceError::RateLimited { retry_after_ms: None })
        );
    }
}
