//! Per-scan cooperative pause/cancel control.
//!
//! Every long-running executor calls [`ScanControl::checkpoint`] between
//! logical phases. Checkpoints block while the scan is paused, return `false`
//! once it is cancelled, and never perform I/O.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};
use uuid::Uuid;

/// Control state of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Running,
    Paused,
    Cancelled,
}

/// Shared pause/cancel token for all workers of one scan.
pub struct ScanControl {
    scan_id: Uuid,
    tx: watch::Sender<ControlState>,
}

impl ScanControl {
    pub fn new(scan_id: Uuid) -> Self {
        let (tx, _) = watch::channel(ControlState::Running);
        Self { scan_id, tx }
    }

    pub fn scan_id(&self) -> Uuid {
        self.scan_id
    }

    pub fn state(&self) -> ControlState {
        *self.tx.borrow()
    }

    /// running -> paused. No-op in any other state.
    pub fn pause(&self) {
        self.tx.send_if_modified(|state| {
            if *state == ControlState::Running {
                *state = ControlState::Paused;
                true
            } else {
                false
            }
        });
    }

    /// paused -> running. No-op in any other state.
    pub fn resume(&self) {
        self.tx.send_if_modified(|state| {
            if *state == ControlState::Paused {
                *state = ControlState::Running;
                true
            } else {
                false
            }
        });
    }

    /// Terminal; idempotent.
    pub fn cancel(&self) {
        self.tx.send_if_modified(|state| {
            if *state != ControlState::Cancelled {
                *state = ControlState::Cancelled;
                true
            } else {
                false
            }
        });
    }

    /// Block while paused; `true` to continue, `false` once cancelled.
    pub async fn checkpoint(&self) -> bool {
        let mut rx = self.tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ControlState::Running => return true,
                ControlState::Cancelled => return false,
                ControlState::Paused => {
                    if rx.changed().await.is_err() {
                        // Control dropped: treat as cancelled.
                        return false;
                    }
                }
            }
        }
    }

    /// Like [`checkpoint`](Self::checkpoint), but also observes an external
    /// shutdown signal and returns `false` when it fires.
    pub async fn checkpoint_with_shutdown(&self, shutdown: &watch::Receiver<bool>) -> bool {
        let mut rx = self.tx.subscribe();
        let mut shutdown = shutdown.clone();
        loop {
            if *shutdown.borrow() {
                return false;
            }
            let state = *rx.borrow_and_update();
            match state {
                ControlState::Running => return true,
                ControlState::Cancelled => return false,
                ControlState::Paused => {
                    tokio::select! {
                        changed = rx.changed() => {
                            if changed.is_err() {
                                return false;
                            }
                        }
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
    }

    /// Resolves once the scan is cancelled. Used to scope job futures.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() == ControlState::Cancelled {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Process-wide map from scan id to its control.
#[derive(Default)]
pub struct ControlRegistry {
    controls: RwLock<HashMap<Uuid, Arc<ScanControl>>>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the control for a scan.
    pub async fn register(&self, scan_id: Uuid) -> Arc<ScanControl> {
        let mut controls = self.controls.write().await;
        controls
            .entry(scan_id)
            .or_insert_with(|| Arc::new(ScanControl::new(scan_id)))
            .clone()
    }

    pub async fn get(&self, scan_id: Uuid) -> Option<Arc<ScanControl>> {
        self.controls.read().await.get(&scan_id).cloned()
    }

    /// Drop the control once a scan reaches a terminal state.
    pub async fn remove(&self, scan_id: Uuid) {
        self.controls.write().await.remove(&scan_id);
    }
}

/// Hook invoked when the auth circuit breaker pauses a scan.
#[async_trait]
pub trait AuthPauseHook: Send + Sync {
    async fn on_auth_pause(&self, scan_id: Uuid);
}
