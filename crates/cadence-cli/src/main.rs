//! cadence - scheduler と recovery coordinator のシミュレータ
//!
//! Queues a mix of tasks under a chosen power pressure, optionally crashes
//! the simulated service a few times, then prints the final status as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use cadence_core::domain::WorkSnapshot;
use cadence_core::impls::{InMemoryCrashStateStore, StaticPowerSource};
use cadence_core::ports::{
    BindOutcome, Clock, PermissionCollaborator, PermissionOutcome, ServiceBinder, SystemClock,
};
use cadence_core::{
    AdaptiveScheduler, CadenceError, PowerRequirement, PowerSnapshot, Priority, RecoveryConfig,
    RecoveryCoordinator, SchedulerConfig, Task, WatchdogConfig, WatchdogLoop,
};

#[derive(Parser, Debug)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// JSON config file; missing keys keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Simulated power pressure.
    #[arg(long, value_enum, default_value_t = Pressure::None)]
    pressure: Pressure,

    /// Number of tasks to queue.
    #[arg(long, default_value_t = 12)]
    tasks: u32,

    /// Service crashes to simulate.
    #[arg(long, default_value_t = 0)]
    crashes: u32,

    /// Binds that fail before the simulated service comes up.
    #[arg(long, default_value_t = 1)]
    bind_failures: u32,

    /// How long to run, in seconds.
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Pressure {
    None,
    Moderate,
    High,
    Critical,
}

impl Pressure {
    fn snapshot(self) -> PowerSnapshot {
        let (deep_restriction, power_save, optimization_exempt) = match self {
            Pressure::None => (false, false, true),
            Pressure::Moderate => (false, false, false),
            Pressure::High => (false, true, false),
            Pressure::Critical => (true, false, false),
        };
        PowerSnapshot {
            deep_restriction,
            power_save,
            optimization_exempt,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct CliConfig {
    scheduler: SchedulerConfig,
    recovery: RecoveryConfig,
    watchdog: WatchdogConfig,
}

impl CliConfig {
    fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

/// Fails the first `failures` binds after each unbind.
struct SimulatedBinder {
    failures: u32,
    remaining: AtomicU32,
}

impl SimulatedBinder {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            remaining: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl ServiceBinder for SimulatedBinder {
    async fn bind(&self) -> BindOutcome {
        let left = self.remaining.load(Ordering::Acquire);
        if left > 0 {
            self.remaining.store(left - 1, Ordering::Release);
            return BindOutcome::Failed;
        }
        BindOutcome::Success
    }

    async fn unbind(&self) -> Result<(), CadenceError> {
        self.remaining.store(self.failures, Ordering::Release);
        Ok(())
    }
}

struct GrantAll;

#[async_trait]
impl PermissionCollaborator for GrantAll {
    async fn request_all(&self) -> Result<PermissionOutcome, CadenceError> {
        Ok(PermissionOutcome::Granted)
    }
}

fn demo_task(index: u32) -> Task {
    let priority = Priority::ALL[index as usize % Priority::ALL.len()];
    let requirement = if index % 4 == 3 {
        PowerRequirement::RequireFullPower
    } else {
        PowerRequirement::Any
    };
    Task::builder(move || async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if index % 5 == 4 {
            return Err(CadenceError::Network(format!("upload {index} timed out")));
        }
        Ok(())
    })
    .id(format!("demo-{index}"))
    .priority(priority)
    .batchable(index % 3 != 0)
    .power_requirement(requirement)
    .max_age(Duration::from_secs(5))
    .build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = CliConfig::load(cli.config.as_deref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let power = Arc::new(StaticPowerSource::new(cli.pressure.snapshot()));
    let scheduler = AdaptiveScheduler::new(config.scheduler, power, Arc::clone(&clock));
    for index in 0..cli.tasks {
        scheduler.schedule_task(demo_task(index));
    }
    info!(pending = scheduler.pending_count(), pressure = ?cli.pressure, "tasks queued");

    let mut reports = scheduler.subscribe_reports();
    tokio::spawn(async move {
        while let Ok(report) = reports.recv().await {
            info!(task_id = %report.id, outcome = ?report.outcome.kind(), forced = report.forced, "task finished");
        }
    });
    scheduler.start();

    let coordinator = Arc::new(RecoveryCoordinator::new(
        Arc::new(GrantAll),
        Arc::new(SimulatedBinder::new(cli.bind_failures)),
        Arc::new(InMemoryCrashStateStore::new()),
        Arc::clone(&clock),
        config.recovery,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watchdog = WatchdogLoop::new(Arc::clone(&coordinator), config.watchdog).spawn(shutdown_rx);

    let initial = coordinator.attempt_recovery().await;
    info!(result = ?initial, "service bound");

    let crashes = {
        let coordinator = Arc::clone(&coordinator);
        let clock = Arc::clone(&clock);
        let count = cli.crashes;
        tokio::spawn(async move {
            for _ in 0..count {
                coordinator.note_in_flight(Some(WorkSnapshot::new("recording", clock.wall())));
                let report = coordinator.handle_service_crash(true).await;
                info!(
                    crash_count = report.crash_count,
                    loop_detected = report.loop_detected,
                    delay_ms = report.delay.as_millis() as u64,
                    recovery = ?report.recovery,
                    restored = report.restored.is_some(),
                    "crash handled"
                );
            }
        })
    };

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(cli.duration)) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            warn!("interrupted");
        }
    }

    crashes.abort();
    scheduler.shutdown().await;
    let _ = shutdown_tx.send(true);
    if let Err(err) = watchdog.await {
        warn!(error = %err, "watchdog did not stop cleanly");
    }

    let summary = serde_json::json!({
        "scheduler": scheduler.status(),
        "recovery_state": coordinator.current_state(),
        "health": coordinator.health(),
        "crash_count": coordinator.crash_count().await,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
