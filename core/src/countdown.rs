// SPDX-License-Identifier: MIT OR Apache-2.0

//! Countdown timers advanced by a cooperative driving loop

use std::time::Duration;

/// A repeating countdown.
///
/// A disarmed countdown has no interval at all and never fires; resetting it
/// is a no-op; only [`Countdown::arm`] brings it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    interval: Option<Duration>,
    remaining: Duration,
}

impl Countdown {
    /// Armed countdown that first fires after one full interval
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: Some(interval),
            remaining: interval,
        }
    }

    pub fn disarmed() -> Self {
        Self {
            interval: None,
            remaining: Duration::ZERO,
        }
    }

    /// Arm with `interval`, firing on the next advance
    pub fn arm(&mut self, interval: Duration) {
        self.interval = Some(interval);
        self.remaining = Duration::ZERO;
    }

    pub fn disarm(&mut self) {
        self.interval = None;
        self.remaining = Duration::ZERO;
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Time left before firing, `None` when disarmed
    pub fn remaining(&self) -> Option<Duration> {
        self.interval.map(|_| self.remaining)
    }

    /// Make an armed countdown fire on the next advance
    pub fn reset_now(&mut self) {
        if self.interval.is_some() {
            self.remaining = Duration::ZERO;
        }
    }

    /// Advance by `elapsed`; returns true when the countdown fired, in which
    /// case it has already been reset to a full interval.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };

        self.remaining = self.remaining.saturating_sub(elapsed);
        if self.remaining.is_zero() {
            self.remaining = interval;
            true
        } else {
            false
        }
    }
}
