// Execution rate monitor
// Global sliding-window circuit breaker for runaway command chains

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::error;

/// Snapshot of the trailing window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateStats {
    /// Executions recorded within the window
    pub executions: usize,
    /// Mean gap between consecutive executions in the window
    pub average_interval: Option<Duration>,
    pub window: Duration,
    pub ceiling: usize,
}

/// Sliding-window counter shared by direct and chain-derived invocations.
///
/// This is a loop detector, not a throttle: the ceiling is global rather than
/// per command, so a chain that keeps re-triggering itself trips it quickly.
#[derive(Debug)]
pub struct RateMonitor {
    window: Duration,
    ceiling: usize,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateMonitor {
    pub fn new(ceiling: usize, window: Duration) -> Self {
        Self {
            window,
            ceiling,
            timestamps: Mutex::new(VecDeque::with_capacity(ceiling)),
        }
    }

    /// Record one execution. Returns `false` without recording when the
    /// window already holds `ceiling` executions.
    pub fn record_execution(&self) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().unwrap_or_else(PoisonError::into_inner);
        Self::prune(&mut timestamps, now, self.window);

        if timestamps.len() >= self.ceiling {
            error!(
                executions = timestamps.len(),
                window_ms = self.window.as_millis() as u64,
                "Command execution rate exceeded; possible infinite loop in command chain"
            );
            return false;
        }

        timestamps.push_back(now);
        true
    }

    pub fn stats(&self) -> RateStats {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().unwrap_or_else(PoisonError::into_inner);
        Self::prune(&mut timestamps, now, self.window);

        let average_interval = match (timestamps.front(), timestamps.back()) {
            (Some(first), Some(last)) if timestamps.len() > 1 => {
                Some((*last - *first) / (timestamps.len() as u32 - 1))
            }
            _ => None,
        };

        RateStats {
            executions: timestamps.len(),
            average_interval,
            window: self.window,
            ceiling: self.ceiling,
        }
    }

    pub fn reset(&self) {
        self.timestamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}
