//! Circuit breaker for auth failures, keyed by (scan, host).
//!
//! Only auth-failure signals (401/403) are counted; generic errors never
//! trip the breaker. Successes decay the count.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

/// What the caller should do after recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerAction {
    Continue,
    PauseScan,
}

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that trip the breaker.
    pub threshold: u32,
    /// Length of the moving window.
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            window: Duration::from_secs(60),
        }
    }
}

struct FailureWindow {
    failures: u32,
    window_start: Instant,
}

/// Process-wide auth-failure counter.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    windows: Mutex<HashMap<(Uuid, String), FailureWindow>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one auth failure; returns `PauseScan` when the threshold is
    /// reached, resetting the window so the signal fires once.
    pub async fn record_failure(&self, scan_id: Uuid, host: &str) -> BreakerAction {
        let mut windows = self.windows.lock().await;
        let key = (scan_id, host.to_string());
        let now = Instant::now();
        let window = windows.entry(key).or_insert(FailureWindow {
            failures: 0,
            window_start: now,
        });

        if now.duration_since(window.window_start) > self.config.window {
            window.failures = 0;
            window.window_start = now;
        }

        window.failures += 1;
        if window.failures >= self.config.threshold {
            window.failures = 0;
            window.window_start = now;
            tracing::warn!(%scan_id, host, "Auth failure threshold reached");
            BreakerAction::PauseScan
        } else {
            BreakerAction::Continue
        }
    }

    /// Record one success, decaying the failure count.
    pub async fn record_success(&self, scan_id: Uuid, host: &str) {
        let mut windows = self.windows.lock().await;
        if let Some(window) = windows.get_mut(&(scan_id, host.to_string())) {
            window.failures = window.failures.saturating_sub(1);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
