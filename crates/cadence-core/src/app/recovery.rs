//! RecoveryCoordinator - 依存サービスの障害復旧
//!
//! # Entry points
//! - `attempt_recovery`: permissions, then bind with retries
//! - `handle_service_crash`: crash-loop detection, escalating delay, retry
//! - `handle_permission_denied`: may set a manual-intervention hold
//! - `force_service_restart`: unbind, settle, attempt
//! - `reset`
//!
//! Only one attempt runs at a time. A second caller gets
//! [`RecoveryResult::AlreadyRecovering`] and changes nothing.
//!
//! A denied permission request blocks automatic recovery (crash handler and
//! watchdog) until `reset()` or an explicit attempt that succeeds.
//!
//! State and health are `watch` channels: subscribers always see the latest
//! value, including the one published before they subscribed.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RecoveryConfig;
use crate::domain::outcome::panic_message;
use crate::domain::{
    CadenceError, PermissionSet, PreservedState, RecoveryResult, RecoveryState, ServiceHealth,
    WorkSnapshot,
};
use crate::ports::{
    BindOutcome, Clock, CrashStateStore, PermissionCollaborator, PermissionOutcome, ServiceBinder,
};
use crate::retry::{RetryExecutor, RetryPolicy};

/// What `handle_service_crash` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    /// Crash count at the time of this crash, before any loop reset.
    pub crash_count: u32,
    pub loop_detected: bool,

    /// Total wait before the recovery attempt (cool-off included).
    pub delay: Duration,

    /// `None` when a manual-intervention hold suppressed the attempt.
    pub recovery: Option<RecoveryResult>,

    /// Preserved work handed back after a timely recovery. Connectivity is
    /// restored; resuming the work is up to the caller.
    pub restored: Option<WorkSnapshot>,
}

#[derive(Debug, Default)]
struct CrashTracker {
    crash_count: u32,
    last_crash: Option<Instant>,
}

/// Holds the single-attempt slot (0 = free, otherwise the owner's generation).
/// Dropping releases the slot only while this guard still owns it, so an
/// attempt orphaned by `reset()` cannot free a newer attempt's slot.
struct AttemptGuard<'a> {
    slot: &'a AtomicU64,
    generation: u64,
}

impl<'a> AttemptGuard<'a> {
    fn acquire(slot: &'a AtomicU64, generations: &AtomicU64) -> Option<Self> {
        let generation = generations.fetch_add(1, Ordering::Relaxed).wrapping_add(1).max(1);
        slot.compare_exchange(0, generation, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { slot, generation })
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .slot
            .compare_exchange(self.generation, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

pub struct RecoveryCoordinator {
    permissions: Arc<dyn PermissionCollaborator>,
    binder: Arc<dyn ServiceBinder>,
    store: Arc<dyn CrashStateStore>,
    clock: Arc<dyn Clock>,
    config: RecoveryConfig,
    bind_policy: RetryPolicy,
    executor: RetryExecutor,

    state: watch::Sender<RecoveryState>,
    health: watch::Sender<ServiceHealth>,

    recovering: AtomicU64,
    generations: AtomicU64,
    /// Bind retries used by the current (or last failed) attempt.
    retry_count: AtomicU32,
    manual_hold: AtomicBool,
    /// Set when `request_all` came back denied; cleared by `reset()` or a
    /// successful attempt.
    permission_block: AtomicBool,
    crashes: Mutex<CrashTracker>,
    in_flight: StdMutex<Option<WorkSnapshot>>,
}

impl RecoveryCoordinator {
    pub fn new(
        permissions: Arc<dyn PermissionCollaborator>,
        binder: Arc<dyn ServiceBinder>,
        store: Arc<dyn CrashStateStore>,
        clock: Arc<dyn Clock>,
        config: RecoveryConfig,
    ) -> Self {
        let (state, _) = watch::channel(RecoveryState::Idle);
        let (health, _) = watch::channel(ServiceHealth::default());
        Self {
            permissions,
            binder,
            store,
            clock,
            config,
            bind_policy: RetryPolicy::service_binding(),
            executor: RetryExecutor::new(),
            state,
            health,
            recovering: AtomicU64::new(0),
            generations: AtomicU64::new(0),
            retry_count: AtomicU32::new(0),
            manual_hold: AtomicBool::new(false),
            permission_block: AtomicBool::new(false),
            crashes: Mutex::new(CrashTracker::default()),
            in_flight: StdMutex::new(None),
        }
    }

    /// Replace the bind retry policy (tests, slower platforms).
    pub fn with_bind_policy(mut self, policy: RetryPolicy) -> Self {
        self.bind_policy = policy;
        self
    }

    pub fn current_state(&self) -> RecoveryState {
        *self.state.borrow()
    }

    pub fn health(&self) -> ServiceHealth {
        self.health.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RecoveryState> {
        self.state.subscribe()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<ServiceHealth> {
        self.health.subscribe()
    }

    /// Crashes counted towards loop detection. Survives `reset()`.
    pub async fn crash_count(&self) -> u32 {
        self.crashes.lock().await.crash_count
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Acquire)
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::Acquire) != 0
    }

    /// Whether automatic recovery is suspended until someone intervenes.
    pub fn requires_manual_intervention(&self) -> bool {
        self.manual_hold.load(Ordering::Acquire)
    }

    /// The last permission request was denied. Only an explicit
    /// `attempt_recovery()` (or `reset()`) asks again.
    pub fn is_permission_blocked(&self) -> bool {
        self.permission_block.load(Ordering::Acquire)
    }

    /// Neither the crash handler nor the watchdog may start an attempt.
    pub fn auto_recovery_suspended(&self) -> bool {
        self.requires_manual_intervention() || self.is_permission_blocked()
    }

    /// Record (or clear) the work currently running on the service, so a
    /// later crash can preserve it.
    pub fn note_in_flight(&self, work: Option<WorkSnapshot>) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = work;
    }

    pub async fn attempt_recovery(&self) -> RecoveryResult {
        let Some(_guard) = AttemptGuard::acquire(&self.recovering, &self.generations) else {
            debug!("recovery already in progress");
            return RecoveryResult::AlreadyRecovering;
        };
        self.guarded_attempt().await
    }

    /// Crash of the dependent service. Waits out the crash delay (and the
    /// cool-off on a loop) before attempting recovery.
    pub async fn handle_service_crash(&self, preserve_state: bool) -> CrashReport {
        self.transition(RecoveryState::Crashed);
        self.health.send_modify(ServiceHealth::mark_down);

        let crashed_at = self.clock.now();
        let crash_count = {
            let mut tracker = self.crashes.lock().await;
            let within_window = tracker
                .last_crash
                .is_some_and(|last| crashed_at.saturating_duration_since(last) < self.config.crash_window);
            tracker.crash_count = if within_window {
                tracker.crash_count.saturating_add(1)
            } else {
                1
            };
            tracker.last_crash = Some(crashed_at);
            tracker.crash_count
        };
        warn!(crash_count, preserve_state, "service crashed");

        if preserve_state {
            self.preserve_in_flight().await;
        }

        let mut delay = Duration::ZERO;
        let loop_detected = crash_count >= self.config.crash_threshold;
        if loop_detected {
            self.transition(RecoveryState::CrashLoopDetected);
            warn!(
                crash_count,
                cooloff_ms = self.config.crash_loop_cooloff.as_millis() as u64,
                "crash loop detected"
            );
            // cool-off 明けにカウンタを戻す (last_crash は残す)
            tokio::time::sleep(self.config.crash_loop_cooloff).await;
            delay += self.config.crash_loop_cooloff;
            self.crashes.lock().await.crash_count = 0;
        }

        let escalation = self.config.crash_delay(crash_count);
        debug!(crash_count, delay_ms = escalation.as_millis() as u64, "waiting before recovery");
        tokio::time::sleep(escalation).await;
        delay += escalation;

        if self.auto_recovery_suspended() {
            info!(
                manual_hold = self.requires_manual_intervention(),
                permission_blocked = self.is_permission_blocked(),
                "automatic recovery suspended; not recovering"
            );
            return CrashReport {
                crash_count,
                loop_detected,
                delay,
                recovery: None,
                restored: None,
            };
        }

        let recovery = self.attempt_recovery().await;
        let restored = if preserve_state && recovery.is_success() {
            self.restore_preserved(crashed_at).await
        } else {
            None
        };

        CrashReport {
            crash_count,
            loop_detected,
            delay,
            recovery: Some(recovery),
            restored,
        }
    }

    /// Returns the state the coordinator ends in.
    pub fn handle_permission_denied(&self, denied: &PermissionSet) -> RecoveryState {
        self.transition(RecoveryState::PermissionDenied);
        if self.hold_on_critical(denied) {
            RecoveryState::RequiresManualIntervention
        } else {
            RecoveryState::PermissionDenied
        }
    }

    /// Sets the manual hold when `denied` touches a critical permission.
    fn hold_on_critical(&self, denied: &PermissionSet) -> bool {
        let critical: Vec<_> = denied
            .intersection(&self.config.critical_permissions)
            .map(|p| p.as_str())
            .collect();
        if critical.is_empty() {
            return false;
        }

        warn!(permissions = ?critical, "critical permission denied");
        self.manual_hold.store(true, Ordering::Release);
        self.transition(RecoveryState::RequiresManualIntervention);
        true
    }

    /// Unbind, let the service settle, then run a normal attempt.
    pub async fn force_service_restart(&self) -> RecoveryResult {
        let Some(_guard) = AttemptGuard::acquire(&self.recovering, &self.generations) else {
            debug!("recovery already in progress; restart skipped");
            return RecoveryResult::AlreadyRecovering;
        };

        self.transition(RecoveryState::RestartingService);
        if let Err(err) = self.binder.unbind().await {
            warn!(error = %err, "unbind failed");
            self.health.send_modify(ServiceHealth::mark_down);
            self.transition(RecoveryState::Failed);
            return RecoveryResult::ServiceBindingFailed(err.to_string());
        }
        self.health.send_modify(|h| {
            h.healthy = false;
            h.up_since = None;
        });

        tokio::time::sleep(self.config.restart_settle).await;
        self.guarded_attempt().await
    }

    /// Back to `Idle`. Crash history is kept so loop detection spans resets.
    pub fn reset(&self) {
        self.recovering.store(0, Ordering::Release);
        self.retry_count.store(0, Ordering::Release);
        self.manual_hold.store(false, Ordering::Release);
        self.permission_block.store(false, Ordering::Release);
        self.transition(RecoveryState::Idle);
    }

    /// Caller holds the attempt guard.
    async fn guarded_attempt(&self) -> RecoveryResult {
        match AssertUnwindSafe(self.run_attempt()).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(panic = %message, "recovery attempt panicked");
                self.health.send_modify(ServiceHealth::mark_down);
                self.transition(RecoveryState::Failed);
                RecoveryResult::UnexpectedError(message)
            }
        }
    }

    async fn run_attempt(&self) -> RecoveryResult {
        let previous = self.current_state();
        self.transition(RecoveryState::Attempting);

        match self.permissions.request_all().await {
            Ok(PermissionOutcome::Granted) => {}
            Ok(PermissionOutcome::Denied(denied)) => {
                warn!(denied = denied.len(), "permissions denied");
                self.permission_block.store(true, Ordering::Release);
                self.health.send_modify(ServiceHealth::mark_down);
                self.transition(RecoveryState::Failed);
                self.hold_on_critical(&denied);
                return RecoveryResult::PermissionsDenied(denied);
            }
            Ok(PermissionOutcome::NeedsRationale(pending)) => {
                info!(pending = pending.len(), "permission rationale needed");
                self.transition(previous);
                return RecoveryResult::PermissionRationaleNeeded(pending);
            }
            Err(err) => {
                warn!(error = %err, "permission request failed");
                self.health.send_modify(ServiceHealth::mark_down);
                self.transition(RecoveryState::Failed);
                return RecoveryResult::UnexpectedError(err.to_string());
            }
        }

        let bound = self
            .executor
            .with_retry(&self.bind_policy, |attempt| {
                self.retry_count.store(attempt, Ordering::Release);
                let binder = Arc::clone(&self.binder);
                async move { bind_once(binder.as_ref()).await }
            })
            .await;

        match bound {
            Ok(()) => {
                self.retry_count.store(0, Ordering::Release);
                self.manual_hold.store(false, Ordering::Release);
                self.permission_block.store(false, Ordering::Release);
                let now = self.clock.wall();
                self.health.send_modify(|h| h.mark_up(now));
                self.transition(RecoveryState::Recovered);
                RecoveryResult::Success
            }
            Err(err) if err.is_auth_failure() => {
                warn!(error = %err, "service binding rejected credentials");
                self.health.send_modify(ServiceHealth::mark_down);
                self.transition(RecoveryState::Failed);
                RecoveryResult::ServiceBindingFailed(err.to_string())
            }
            Err(err) => {
                let attempts = self.retry_count().saturating_add(1);
                warn!(
                    attempts,
                    max_attempts = self.bind_policy.max_attempts(),
                    error = %err,
                    "service binding gave up"
                );
                self.health.send_modify(ServiceHealth::mark_down);
                self.transition(RecoveryState::Failed);
                RecoveryResult::MaxRetriesExceeded { attempts }
            }
        }
    }

    async fn preserve_in_flight(&self) {
        let work = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(work) = work else {
            debug!("nothing in flight to preserve");
            return;
        };

        let state = PreservedState {
            work,
            crashed_at: self.clock.wall(),
        };
        match self.store.save(state).await {
            Ok(()) => debug!("in-flight work preserved"),
            Err(err) => warn!(error = %err, "failed to preserve in-flight work"),
        }
    }

    async fn restore_preserved(&self, crashed_at: Instant) -> Option<WorkSnapshot> {
        let preserved = match self.store.take().await {
            Ok(preserved) => preserved?,
            Err(err) => {
                warn!(error = %err, "failed to read preserved work");
                return None;
            }
        };

        let elapsed = self.clock.now().saturating_duration_since(crashed_at);
        if elapsed > self.config.restore_window {
            info!(
                operation = %preserved.work.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                "preserved work too old; discarded"
            );
            return None;
        }

        info!(operation = %preserved.work.operation, "connectivity restored for interrupted work");
        Some(preserved.work)
    }

    fn transition(&self, next: RecoveryState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            info!(
                from = ?*state,
                to = ?next,
                cycle_end = next.is_cycle_terminal(),
                "recovery state changed"
            );
            *state = next;
            true
        });
    }
}

async fn bind_once(binder: &dyn ServiceBinder) -> Result<(), CadenceError> {
    match binder.bind().await {
        outcome if outcome.is_bound() => Ok(()),
        BindOutcome::Error(err) => Err(err),
        _ => Err(CadenceError::Collaborator("service bind failed".into())),
    }
}
