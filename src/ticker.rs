//! Idle ticker
//!
//! Counts consecutive tick intervals without output. The ticks themselves come
//! from the session's pump (a `tokio::time::Interval`); this type only holds
//! the counter so it can be driven in event order.

use std::time::Duration;

/// Reference tick interval: one tick is one second of idleness
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Default)]
pub struct IdleTicker {
    running: bool,
    seconds: u64,
    heard_output: bool,
}

impl IdleTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin counting from zero
    pub fn start(&mut self) {
        self.running = true;
        self.seconds = 0;
        self.heard_output = false;
    }

    /// Stop counting. Returns false if the ticker was already stopped.
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.running, false)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Output arrived: the idle count drops to zero
    pub fn record_output(&mut self) {
        self.seconds = 0;
        self.heard_output = true;
    }

    /// One interval elapsed. Returns the idle count to notify waiters with, or
    /// `None` when the ticker is stopped.
    ///
    /// An interval in which output arrived does not count as idle.
    pub fn tick(&mut self) -> Option<u64> {
        if !self.running {
            return None;
        }
        if self.heard_output {
            self.heard_output = false;
        } else {
            self.seconds += 1;
        }
        Some(self.seconds)
    }

    pub fn idle_seconds(&self) -> u64 {
        self.seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_silent_ticks() {
        let mut ticker = IdleTicker::new();
        ticker.start();
        assert_eq!(ticker.tick(), Some(1));
        assert_eq!(ticker.tick(), Some(2));
        assert_eq!(ticker.idle_seconds(), 2);
    }

    #[test]
    fn test_output_resets_and_costs_a_full_window() {
        let mut ticker = IdleTicker::new();
        ticker.start();
        ticker.tick();
        ticker.record_output();
        assert_eq!(ticker.idle_seconds(), 0);
        // the interval that saw output is not idle
        assert_eq!(ticker.tick(), Some(0));
        assert_eq!(ticker.tick(), Some(1));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut ticker = IdleTicker::new();
        assert!(!ticker.stop());
        ticker.start();
        assert!(ticker.stop());
        assert!(!ticker.stop());
        assert_eq!(ticker.tick(), None);
    }
}
