//! Repetition timer.

use std::time::{Duration, Instant};

/// Wall-clock stopwatch accumulating across start/stop cycles.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    started: Option<Instant>,
    elapsed: Duration,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Stops the running interval and returns its length. Stopping an idle
    /// timer returns zero and leaves the total unchanged.
    pub fn stop(&mut self) -> Duration {
        match self.started.take() {
            Some(started) => {
                let interval = started.elapsed();
                self.elapsed += interval;
                interval
            }
            None => Duration::ZERO,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn reset(&mut self) {
        self.started = None;
        self.elapsed = Duration::ZERO;
    }
}
