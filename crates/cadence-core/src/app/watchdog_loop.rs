//! WatchdogLoop - 失敗後の定期リカバリ
//!
//! # Flow
//! 1. wait `interval` (or shutdown)
//! 2. if the coordinator is `Failed` or `Crashed`, not busy, not on a
//!    manual-intervention hold and not blocked on denied permissions,
//!    call `attempt_recovery()`

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::recovery::RecoveryCoordinator;
use crate::config::WatchdogConfig;
use crate::domain::RecoveryState;

pub struct WatchdogLoop {
    coordinator: Arc<RecoveryCoordinator>,
    config: WatchdogConfig,
}

impl WatchdogLoop {
    pub fn new(coordinator: Arc<RecoveryCoordinator>, config: WatchdogConfig) -> Self {
        Self { coordinator, config }
    }

    /// Spawn the loop; stop it by sending `true` on the shutdown channel.
    pub fn spawn(self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown_rx))
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval_ms = self.config.interval.as_millis() as u64, "watchdog started");
        loop {
            // interval 待ちは shutdown と競合させる
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown_rx.wait_for(|stop| *stop) => break,
            }
            self.tick().await;
        }
        info!("watchdog stopped");
    }

    async fn tick(&self) {
        let state = self.coordinator.current_state();
        if !matches!(state, RecoveryState::Failed | RecoveryState::Crashed) {
            return;
        }
        if self.coordinator.auto_recovery_suspended() {
            debug!(?state, "waiting on the user; watchdog idle");
            return;
        }
        if self.coordinator.is_recovering() {
            return;
        }

        let result = self.coordinator.attempt_recovery().await;
        info!(?state, ?result, "watchdog recovery attempt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecoveryConfig;
    use crate::domain::{CadenceError, Permission, PermissionSet, RecoveryResult};
    use crate::impls::InMemoryCrashStateStore;
    use crate::ports::{
        BindOutcome, PermissionCollaborator, PermissionOutcome, ServiceBinder, SystemClock,
    };
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` binds, then succeeds.
    struct FlakyBinder {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ServiceBinder for FlakyBinder {
        async fn bind(&self) -> BindOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                BindOutcome::Failed
            } else {
                BindOutcome::Success
            }
        }
    }

    struct Granted;

    #[async_trait]
    impl PermissionCollaborator for Granted {
        async fn request_all(&self) -> Result<PermissionOutcome, CadenceError> {
            Ok(PermissionOutcome::Granted)
        }
    }

    /// Always denies; counts how often it was asked.
    struct Refusing {
        denied: PermissionSet,
        requests: AtomicU32,
    }

    #[async_trait]
    impl PermissionCollaborator for Refusing {
        async fn request_all(&self) -> Result<PermissionOutcome, CadenceError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(PermissionOutcome::Denied(self.denied.clone()))
        }
    }

    fn coordinator(failures: u32) -> (Arc<FlakyBinder>, Arc<RecoveryCoordinator>) {
        coordinator_with(failures, Arc::new(Granted))
    }

    fn coordinator_with(
        failures: u32,
        permissions: Arc<dyn PermissionCollaborator>,
    ) -> (Arc<FlakyBinder>, Arc<RecoveryCoordinator>) {
        let binder = Arc::new(FlakyBinder {
            failures,
            calls: AtomicU32::new(0),
        });
        let coordinator = RecoveryCoordinator::new(
            permissions,
            binder.clone(),
            Arc::new(InMemoryCrashStateStore::new()),
            Arc::new(SystemClock),
            RecoveryConfig::default(),
        );
        (binder, Arc::new(coordinator))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failed_recovery_on_next_tick() {
        // exhausts the first attempt's six binds
        let (binder, coordinator) = coordinator(6);
        assert!(matches!(
            coordinator.attempt_recovery().await,
            RecoveryResult::MaxRetriesExceeded { .. }
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = WatchdogLoop::new(coordinator.clone(), WatchdogConfig::default()).spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(coordinator.current_state(), RecoveryState::Recovered);
        assert_eq!(binder.calls.load(Ordering::SeqCst), 7);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_hold_keeps_watchdog_idle() {
        let (binder, coordinator) = coordinator(6);
        let _ = coordinator.attempt_recovery().await;
        coordinator.handle_permission_denied(&BTreeSet::from([Permission::record_audio()]));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = WatchdogLoop::new(coordinator.clone(), WatchdogConfig::default()).spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(binder.calls.load(Ordering::SeqCst), 6);
        assert_eq!(
            coordinator.current_state(),
            RecoveryState::RequiresManualIntervention
        );

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    async fn requests_after_denial(permission: Permission) -> (u32, u32, RecoveryState) {
        let permissions = Arc::new(Refusing {
            denied: BTreeSet::from([permission]),
            requests: AtomicU32::new(0),
        });
        let (binder, coordinator) = coordinator_with(0, permissions.clone());
        assert!(matches!(
            coordinator.attempt_recovery().await,
            RecoveryResult::PermissionsDenied(_)
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = WatchdogLoop::new(coordinator.clone(), WatchdogConfig::default()).spawn(shutdown_rx);
        tokio::time::sleep(Duration::from_secs(125)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        (
            permissions.requests.load(Ordering::SeqCst),
            binder.calls.load(Ordering::SeqCst),
            coordinator.current_state(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn critical_denial_is_requested_once() {
        let (requests, binds, state) = requests_after_denial(Permission::record_audio()).await;
        assert_eq!(requests, 1);
        assert_eq!(binds, 0);
        assert_eq!(state, RecoveryState::RequiresManualIntervention);
    }

    #[tokio::test(start_paused = true)]
    async fn non_critical_denial_is_requested_once() {
        let (requests, binds, state) =
            requests_after_denial(Permission::new("notifications")).await;
        assert_eq!(requests, 1);
        assert_eq!(binds, 0);
        assert_eq!(state, RecoveryState::Failed);
    }
}
