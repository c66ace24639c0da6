//! Periodic backend reachability tracking.
//!
//! The monitor is the only writer of [`BackendHealthState`]. Everything else
//! reads it through [`HealthMonitor::state`] or a [`watch::Receiver`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;
use crate::models::{BackendHealthState, HealthStatus};

/// Probes the backend and publishes the result.
pub struct HealthMonitor {
    backend: Arc<dyn ChatBackend>,
    tx: watch::Sender<BackendHealthState>,
    forced_offline: AtomicBool,
}

impl HealthMonitor {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        let (tx, _) = watch::channel(BackendHealthState::default());
        Self {
            backend,
            tx,
            forced_offline: AtomicBool::new(false),
        }
    }

    /// Pin the monitor to `offline` without touching the network.
    pub fn force_offline(&self, offline: bool) {
        self.forced_offline.store(offline, Ordering::Release);
        if offline {
            self.publish(HealthStatus::Offline);
        }
    }

    pub fn state(&self) -> BackendHealthState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BackendHealthState> {
        self.tx.subscribe()
    }

    /// Run one reachability check and publish the outcome.
    ///
    /// Never fails: an error or timeout is just `offline`. A
    /// [`force_offline`](Self::force_offline) issued while the check is in
    /// flight wins over its result.
    pub async fn probe(&self) -> HealthStatus {
        let mut status = if self.forced_offline.load(Ordering::Acquire) {
            HealthStatus::Offline
        } else {
            match self.backend.check_health().await {
                Ok(()) => HealthStatus::Online,
                Err(e) => {
                    debug!("Health probe failed: {e}");
                    HealthStatus::Offline
                }
            }
        };
        if self.forced_offline.load(Ordering::Acquire) {
            status = HealthStatus::Offline;
        }
        self.publish(status);
        status
    }

    fn publish(&self, status: HealthStatus) {
        let previous = self.tx.borrow().status;
        self.tx.send_modify(|state| {
            state.status = status;
            state.last_checked_at = Some(Utc::now());
            if status == HealthStatus::Online {
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            }
        });
        if previous != status {
            match status {
                HealthStatus::Offline => warn!("Backend is offline"),
                _ => info!("Backend is {status}"),
            }
        }
    }

    /// Probe now and then every `interval` until the handle is dropped or
    /// shut down.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let monitor = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.probe().await;
                    }
                }
            }
            debug!("Health monitor stopped");
        });

        MonitorHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Owns the background probe task. Dropping it stops the task.
#[derive(Debug)]
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop probing and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Health monitor task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
