//! End-to-end scheduler runs on paused tokio time.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_core::impls::StaticPowerSource;
use cadence_core::ports::PowerSignalSource;
use cadence_core::{
    AdaptiveScheduler, CadenceError, PowerRequirement, PowerSnapshot, Priority, SchedulerConfig,
    Task, TaskOutcome,
};
use tokio::time::Instant;

/// Errors on the first `failures` samples, then reports `snapshot`.
struct FlakyPowerSource {
    failures: AtomicUsize,
    snapshot: PowerSnapshot,
}

impl PowerSignalSource for FlakyPowerSource {
    fn current_snapshot(&self) -> Result<PowerSnapshot, CadenceError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(CadenceError::PowerSignal("battery service unavailable".into()));
        }
        Ok(self.snapshot)
    }

    fn recommended_pacing_delay(&self) -> Duration {
        Duration::from_secs(30)
    }
}

fn idle_device() -> PowerSnapshot {
    PowerSnapshot {
        optimization_exempt: true,
        ..PowerSnapshot::default()
    }
}

fn power_saving() -> PowerSnapshot {
    PowerSnapshot {
        power_save: true,
        ..PowerSnapshot::default()
    }
}

fn scheduler_with(snapshot: PowerSnapshot) -> AdaptiveScheduler {
    let power = StaticPowerSource::new(snapshot).with_pacing_delay(Duration::from_secs(10));
    AdaptiveScheduler::with_system_clock(SchedulerConfig::default(), Arc::new(power))
}

fn recording_task(log: &Arc<Mutex<Vec<String>>>, label: &str) -> Task {
    let log = Arc::clone(log);
    let label = label.to_string();
    Task::builder(move || async move {
        log.lock().unwrap().push(label);
        Ok(())
    })
    .build()
}

#[tokio::test(start_paused = true)]
async fn higher_priority_runs_first() {
    let scheduler = scheduler_with(idle_device());
    let log = Arc::new(Mutex::new(Vec::new()));

    for (label, priority) in [
        ("low", Priority::Low),
        ("critical", Priority::Critical),
        ("normal-1", Priority::Normal),
        ("high", Priority::High),
        ("normal-2", Priority::Normal),
    ] {
        let log = Arc::clone(&log);
        scheduler.schedule(
            label,
            priority,
            Duration::ZERO,
            Duration::from_secs(300),
            false,
            PowerRequirement::Any,
            move || async move {
                log.lock().unwrap().push(label.to_string());
                Ok(())
            },
        );
    }
    assert_eq!(scheduler.pending_count_by_priority(Priority::Normal), 2);

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["critical", "high", "normal-1", "normal-2", "low"]
    );
    assert_eq!(scheduler.pending_count(), 0);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn solo_tasks_run_before_batchable_fan_out() {
    let scheduler = scheduler_with(idle_device());
    let log = Arc::new(Mutex::new(Vec::new()));

    let solo_log = Arc::clone(&log);
    scheduler.schedule_task(
        Task::builder(move || async move {
            solo_log.lock().unwrap().push("low:start");
            tokio::time::sleep(Duration::from_millis(50)).await;
            solo_log.lock().unwrap().push("low:end");
            Ok(())
        })
        .id("upload-logs")
        .priority(Priority::Low)
        .batchable(false)
        .build(),
    );
    let batch_log = Arc::clone(&log);
    scheduler.schedule_task(
        Task::builder(move || async move {
            batch_log.lock().unwrap().push("critical");
            Ok(())
        })
        .id("sync-transcript")
        .priority(Priority::Critical)
        .batchable(true)
        .build(),
    );

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(*log.lock().unwrap(), vec!["low:start", "low:end", "critical"]);
    assert_eq!(scheduler.status().executed, 2);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stop_discards_pending_work() {
    let scheduler = scheduler_with(idle_device());
    let ran = Arc::new(AtomicBool::new(false));

    for i in 0..4 {
        let ran = Arc::clone(&ran);
        scheduler.schedule_task(
            Task::builder(move || async move {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
            .id(format!("later-{i}"))
            .ready_delay(Duration::from_secs(10))
            .build(),
        );
    }

    scheduler.start();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(scheduler.pending_count(), 4);

    scheduler.stop();
    assert_eq!(scheduler.pending_count(), 0);

    tokio::time::sleep(Duration::from_secs(20 * 60)).await;
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn batchable_tasks_run_concurrently_without_pressure() {
    let scheduler = scheduler_with(idle_device());
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let done = Arc::clone(&done);
        scheduler.schedule_task(
            Task::builder(move || async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build(),
        );
    }

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(done.load(Ordering::SeqCst), 5);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn high_pressure_runs_one_at_a_time_with_gap() {
    let scheduler = scheduler_with(power_saving());
    let origin = Instant::now();
    let starts = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let starts = Arc::clone(&starts);
        scheduler.schedule_task(
            Task::builder(move || async move {
                starts.lock().unwrap().push(Instant::now() - origin);
                Ok(())
            })
            .id(format!("sync-{i}"))
            .build(),
        );
    }

    scheduler.start();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let starts = starts.lock().unwrap().clone();
    assert_eq!(
        starts,
        vec![
            Duration::ZERO,
            Duration::from_millis(500),
            Duration::from_millis(1000),
        ]
    );
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn expired_task_runs_despite_power_requirement() {
    let scheduler = scheduler_with(power_saving());
    let mut reports = scheduler.subscribe_reports();
    let log = Arc::new(Mutex::new(Vec::new()));

    scheduler.schedule_task(
        Task::builder({
            let log = Arc::clone(&log);
            move || async move {
                log.lock().unwrap().push("upload".to_string());
                Ok(())
            }
        })
        .id("upload")
        .max_age(Duration::from_secs(10))
        .power_requirement(PowerRequirement::RequireFullPower)
        .build(),
    );

    scheduler.start();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(log.lock().unwrap().is_empty());

    let report = tokio::time::timeout(Duration::from_secs(10), reports.recv())
        .await
        .expect("report within timeout")
        .unwrap();
    assert_eq!(report.id.as_str(), "upload");
    assert!(report.forced);
    assert!(report.outcome.is_success());
    assert_eq!(scheduler.status().forced, 1);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn task_failures_are_reported_not_fatal() {
    let scheduler = scheduler_with(idle_device());
    let mut reports = scheduler.subscribe_reports();
    let log = Arc::new(Mutex::new(Vec::new()));

    scheduler.schedule_task(
        Task::builder(|| async { Err(CadenceError::Network("offline".into())) })
            .id("sync")
            .priority(Priority::High)
            .batchable(false)
            .build(),
    );
    scheduler.start();

    let report = reports.recv().await.unwrap();
    assert_eq!(
        report.outcome,
        TaskOutcome::Failed(CadenceError::Network("offline".into()))
    );

    scheduler.schedule_task(recording_task(&log, "after"));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(*log.lock().unwrap(), vec!["after"]);

    let status = scheduler.status();
    assert_eq!(status.failed, 1);
    assert_eq!(status.succeeded(), 1);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn loop_survives_power_signal_errors() {
    let power = Arc::new(FlakyPowerSource {
        failures: AtomicUsize::new(1),
        snapshot: idle_device(),
    });
    let scheduler = AdaptiveScheduler::with_system_clock(SchedulerConfig::default(), power);
    let log = Arc::new(Mutex::new(Vec::new()));
    scheduler.schedule_task(recording_task(&log, "first"));

    scheduler.start();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(log.lock().unwrap().is_empty());
    assert!(scheduler.is_running());

    // error backoff is 5s
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(*log.lock().unwrap(), vec!["first"]);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn critical_pressure_idles_on_pacing_delay() {
    let power = Arc::new(
        StaticPowerSource::new(PowerSnapshot {
            deep_restriction: true,
            ..PowerSnapshot::default()
        })
        .with_pacing_delay(Duration::from_secs(10)),
    );
    let scheduler =
        AdaptiveScheduler::with_system_clock(SchedulerConfig::default(), power.clone());
    let status = scheduler.subscribe_status();

    scheduler.start();
    tokio::time::sleep(Duration::from_secs(25)).await;
    // cycles at 0s, 10s and 20s
    assert_eq!(status.borrow().cycles, 3);

    power.set(idle_device());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(status.borrow().cycles > 5);
    scheduler.shutdown().await;
}
