//! Remote-store failure isolation.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls go through.
    Closed,
    /// Calls are skipped until the break duration elapses.
    Open,
}

/// Two-state circuit breaker.
///
/// Any remote failure opens the breaker for `break_duration`. Once that
/// elapses the next check closes it again and the call is attempted normally;
/// there is no half-open probe.
#[derive(Debug)]
pub struct CircuitBreaker {
    break_duration: Duration,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(break_duration: Duration) -> Self {
        Self {
            break_duration,
            opened_at: Mutex::new(None),
        }
    }

    pub fn break_duration(&self) -> Duration {
        self.break_duration
    }

    /// Returns `true` while calls must be short-circuited.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn state(&self) -> CircuitState {
        let mut opened_at = self.opened_at.lock();
        match *opened_at {
            Some(at) if at.elapsed() < self.break_duration => CircuitState::Open,
            Some(_) => {
                *opened_at = None;
                tracing::info!("remote store circuit breaker closed");
                CircuitState::Closed
            }
            None => CircuitState::Closed,
        }
    }

    /// Trip the breaker, restarting the break window.
    pub fn open(&self) {
        let mut opened_at = self.opened_at.lock();
        if opened_at.is_none() {
            tracing::warn!(
                break_ms = self.break_duration.as_millis() as u64,
                "remote store circuit breaker opened"
            );
        }
        *opened_at = Some(Instant::now());
    }

    pub fn close(&self) {
        *self.opened_at.lock() = None;
    }
}
