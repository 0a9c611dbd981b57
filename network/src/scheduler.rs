// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic remote calls driven by countdowns
//!
//! A fired countdown spawns its call and resets immediately without awaiting
//! it. Each scheduler carries an in-flight flag so a slow call is never
//! overlapped by the next one of the same kind.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use roomlink_core::Countdown;
use tokio::task::JoinHandle;

/// Outcome of advancing a scheduler by one driver step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Countdown has no interval
    Disarmed,
    /// Countdown still running
    Waiting,
    /// Call spawned
    Sent,
    /// Countdown fired while the previous call was still running
    SkippedInFlight,
}

/// Clears the in-flight flag when the call finishes or is aborted
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Countdown plus the handle of its last spawned call
pub struct Scheduler {
    name: &'static str,
    countdown: Countdown,
    in_flight: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(name: &'static str, countdown: Countdown) -> Self {
        Self {
            name,
            countdown,
            in_flight: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    pub fn countdown_mut(&mut self) -> &mut Countdown {
        &mut self.countdown
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Advance by `elapsed` and spawn `make()` if the countdown fired and no
    /// call is in flight.
    pub fn fire<F, Fut>(&mut self, elapsed: Duration, make: F) -> Dispatch
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self.countdown.is_armed() {
            return Dispatch::Disarmed;
        }
        if !self.countdown.advance(elapsed) {
            return Dispatch::Waiting;
        }
        if self.is_in_flight() {
            tracing::debug!(scheduler = self.name, "Previous call still in flight, skipping");
            return Dispatch::SkippedInFlight;
        }

        // Fresh flag per call so an aborted older call cannot clear it
        let flag = Arc::new(AtomicBool::new(true));
        self.in_flight = flag.clone();
        let guard = InFlightGuard(flag);
        let fut = make();
        self.task = Some(tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        }));
        Dispatch::Sent
    }

    /// Abort any running call and disarm
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.in_flight.store(false, Ordering::SeqCst);
        self.countdown.disarm();
    }

    /// Hand out the running call so a caller can await it
    pub fn take_task(&mut self) -> Option<JoinHandle<()>> {
        self.task.take()
    }
}

/// Host-only liveness ping
pub struct HeartbeatScheduler {
    inner: Scheduler,
    interval: Duration,
}

impl HeartbeatScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Scheduler::new("heartbeat", Countdown::disarmed()),
            interval,
        }
    }

    /// Match the armed state to the local role. Becoming host arms the
    /// countdown to fire on the next step; losing host disarms it.
    pub fn sync_role(&mut self, is_host: bool) {
        let armed = self.inner.countdown().is_armed();
        if is_host && !armed {
            tracing::debug!("Local player is host, arming heartbeat");
            self.inner.countdown_mut().arm(self.interval);
        } else if !is_host && armed {
            tracing::debug!("Local player is not host, disarming heartbeat");
            self.inner.countdown_mut().disarm();
        }
    }

    /// Arm (when host) so the first ping goes out on the next step
    pub fn start(&mut self, is_host: bool) {
        self.inner.countdown_mut().disarm();
        self.sync_role(is_host);
    }

    pub fn fire<F, Fut>(&mut self, elapsed: Duration, make: F) -> Dispatch
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.fire(elapsed, make)
    }

    pub fn is_armed(&self) -> bool {
        self.inner.countdown().is_armed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.inner.countdown().remaining()
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.is_in_flight()
    }

    pub fn cancel(&mut self) {
        self.inner.cancel();
    }

    pub fn take_task(&mut self) -> Option<JoinHandle<()>> {
        self.inner.take_task()
    }
}

/// Full session refresh for every role
pub struct PollScheduler {
    inner: Scheduler,
    interval: Duration,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Scheduler::new("poll", Countdown::disarmed()),
            interval,
        }
    }

    /// Arm so the first refresh goes out on the next step
    pub fn start(&mut self) {
        self.inner.countdown_mut().arm(self.interval);
    }

    pub fn fire<F, Fut>(&mut self, elapsed: Duration, make: F) -> Dispatch
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.fire(elapsed, make)
    }

    pub fn is_armed(&self) -> bool {
        self.inner.countdown().is_armed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.inner.countdown().remaining()
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.is_in_flight()
    }

    pub fn cancel(&mut self) {
        self.inner.cancel();
    }

    pub fn take_task(&mut self) -> Option<JoinHandle<()>> {
        self.inner.take_task()
    }
}
