//! Slide timing: per-slide budgets that survive pause, suspend and restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Shortest delay the timer will ever be armed with, in seconds.
pub const MIN_DURATION: u64 = 5;

/// Wall-clock source in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

/// Hand-driven clock for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn starting_at(ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Timing state of the current slide.
///
/// In relative mode every slide gets a fresh `slide_duration_secs` and pauses
/// simply freeze `timer_remaining_secs`. In absolute mode the budget is
/// measured against the wall clock from `time_of_slide_start_ms`, so time
/// spent suspended or shut down counts against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub slide_duration_secs: u64,
    /// Epoch milliseconds; 0 means no slide has been timed yet.
    pub time_of_slide_start_ms: u64,
    pub timer_remaining_secs: u64,
    pub use_absolute_time: bool,
}

impl TimerState {
    pub fn new(slide_duration_secs: u64, use_absolute_time: bool) -> Self {
        Self {
            slide_duration_secs,
            time_of_slide_start_ms: 0,
            timer_remaining_secs: slide_duration_secs.max(MIN_DURATION),
            use_absolute_time,
        }
    }

    /// Configured duration clamped to [`MIN_DURATION`].
    pub fn slide_duration(&self) -> u64 {
        self.slide_duration_secs.max(MIN_DURATION)
    }

    /// Seconds until the next advance. Also stores the result as the new
    /// remaining budget in absolute mode.
    pub fn next_delay(&mut self, now_ms: u64) -> u64 {
        let duration = self.slide_duration();
        let remaining = self.timer_remaining_secs;

        if !self.use_absolute_time {
            if remaining == 0 || remaining <= duration {
                return remaining.max(MIN_DURATION);
            }
            return duration;
        }

        if self.time_of_slide_start_ms == 0 {
            self.timer_remaining_secs = duration;
            return duration;
        }

        let remaining_ms = remaining.saturating_mul(1000);
        let elapsed_ms = now_ms.saturating_sub(self.time_of_slide_start_ms);
        if elapsed_ms >= remaining_ms {
            self.timer_remaining_secs = MIN_DURATION;
            return MIN_DURATION;
        }

        let left = ((remaining_ms - elapsed_ms) / 1000).max(MIN_DURATION);
        self.timer_remaining_secs = left;
        left
    }

    /// A new slide went up: full budget from `now_ms`.
    pub fn restart_slide(&mut self, now_ms: u64) {
        self.time_of_slide_start_ms = now_ms;
        self.timer_remaining_secs = self.slide_duration();
    }

    /// Mark `now_ms` as the start of the running segment without touching the budget.
    pub fn mark_start(&mut self, now_ms: u64) {
        self.time_of_slide_start_ms = now_ms;
    }

    /// Fold the time since the segment start into the remaining budget.
    pub fn snapshot(&mut self, now_ms: u64) {
        let elapsed_secs = now_ms.saturating_sub(self.time_of_slide_start_ms) / 1000;
        self.timer_remaining_secs = self.timer_remaining_secs.saturating_sub(elapsed_secs);
        self.time_of_slide_start_ms = now_ms;
    }

    /// Forget any running slide (new directory).
    pub fn reset(&mut self) {
        self.time_of_slide_start_ms = 0;
        self.timer_remaining_secs = self.slide_duration();
    }
}

/// Render whole seconds as e.g. `1h 2m 5s`.
pub fn format_remaining(secs: u64) -> String {
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}
