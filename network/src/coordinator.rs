// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session coordinator
//!
//! Owns the current session and relay allocation of the local process and
//! runs the create / join / quick-join / leave workflows:
//!   * every workflow is one atomic attempt; a failure leaves nothing behind
//!   * heartbeat (host only) and poll countdowns advance on `tick`
//!   * push notifications and polls share one versioned refresh path
//!   * roster changes go out via `tokio::sync::broadcast`

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use roomlink_core::{
    ConnectionDescriptor, DataValue, DescriptorBuilder, HeldAllocation, Player, Role, RosterChange,
    RosterTracker, Session, SessionError, SessionId, KEY_PLAYER_NAME, KEY_RELAY_JOIN_CODE,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::{CoordinatorConfig, MIN_DRIVER_PERIOD};
use crate::push::PushBridge;
use crate::scheduler::{Dispatch, HeartbeatScheduler, PollScheduler};
use crate::services::{
    CreateSessionOptions, DirectoryService, IdentityProvider, LobbyNotification, RelayService,
    SessionOptions, TransportBootstrap,
};

/// Lifecycle of the local session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Establishing,
    Active,
}

/// Events published to subscribers such as a UI layer
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// Membership differs from the last snapshot (or the session just started)
    RosterChanged(RosterChange),
    /// The identity service refused a rename; `kept` is still in effect
    NameUpdateRejected {
        requested: String,
        kept: Option<String>,
    },
    SessionLeft { session_id: SessionId },
}

/// What one driver step dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub heartbeat: Dispatch,
    pub poll: Dispatch,
}

impl TickReport {
    fn idle() -> Self {
        Self {
            heartbeat: Dispatch::Disarmed,
            poll: Dispatch::Disarmed,
        }
    }
}

/// Remaining countdown time, `None` when disarmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerStatus {
    pub heartbeat: Option<Duration>,
    pub poll: Option<Duration>,
}

/// The remote collaborators a coordinator drives
#[derive(Clone)]
pub struct Services {
    pub directory: Arc<dyn DirectoryService>,
    pub relay: Arc<dyn RelayService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub transport: Arc<dyn TransportBootstrap>,
}

/// How a client finds its session
enum JoinTarget<'a> {
    Code(&'a str),
    Quick,
}

/// Output of a successful establishment, not yet committed
struct Established {
    session: Session,
    allocation: HeldAllocation,
    descriptor: ConnectionDescriptor,
    notifications: broadcast::Receiver<LobbyNotification>,
}

struct CoordinatorState {
    phase: Phase,
    /// Bumped on every establish attempt and every leave
    epoch: u64,
    session: Option<Session>,
    allocation: Option<HeldAllocation>,
    descriptor: Option<ConnectionDescriptor>,
    roster: RosterTracker,
    push: Option<PushBridge>,
}

struct Schedulers {
    heartbeat: HeartbeatScheduler,
    poll: PollScheduler,
}

struct Shared {
    services: Services,
    config: CoordinatorConfig,
    builder: DescriptorBuilder,
    state: Mutex<CoordinatorState>,
    schedulers: Mutex<Schedulers>,
    events_tx: broadcast::Sender<CoordinatorEvent>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn local_player_id(&self) -> Option<String> {
        self.services.identity.local_player_id()
    }

    fn is_host_of(&self, session: &Session) -> bool {
        self.local_player_id().as_deref() == Some(session.host_id.as_str())
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    /// Install a directory snapshot if it belongs to the current epoch and is
    /// not older than what is already applied.
    fn apply_snapshot(&self, epoch: u64, fresh: Session) -> bool {
        let (change, is_host) = {
            let mut state = self.state.lock();
            if state.epoch != epoch || state.phase != Phase::Active {
                tracing::debug!(session_id = %fresh.id, "Discarding snapshot from a previous session");
                return false;
            }
            let Some(current) = state.session.as_ref() else {
                return false;
            };
            if current.id != fresh.id {
                return false;
            }
            if fresh.version < current.version {
                tracing::debug!(
                    session_id = %fresh.id,
                    applied = current.version,
                    received = fresh.version,
                    "Discarding stale session snapshot"
                );
                return false;
            }

            let change = state.roster.apply(&fresh.players);
            let is_host = self.is_host_of(&fresh);
            state.session = Some(fresh);
            (change, is_host)
        };

        self.schedulers.lock().heartbeat.sync_role(is_host);
        if let Some(change) = change {
            self.emit(CoordinatorEvent::RosterChanged(change));
        }
        true
    }

    /// Fetch the authoritative session and reconcile the roster
    async fn refresh(&self, epoch: u64) -> Result<bool, SessionError> {
        let session_id = {
            let state = self.state.lock();
            if state.epoch != epoch {
                return Ok(false);
            }
            match state.session.as_ref() {
                Some(session) => session.id.clone(),
                None => return Ok(false),
            }
        };

        let fresh = self.services.directory.get_session(&session_id).await?;
        Ok(self.apply_snapshot(epoch, fresh))
    }

    async fn send_heartbeat(&self, epoch: u64) {
        let session_id = {
            let state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            match state.session.as_ref() {
                Some(session) => session.id.clone(),
                None => return,
            }
        };

        match self.services.directory.send_heartbeat(&session_id).await {
            Ok(()) => tracing::debug!(session_id = %session_id, "Heartbeat sent"),
            Err(e) => tracing::warn!(session_id = %session_id, error = %e, "Heartbeat failed"),
        }
    }

    async fn poll(&self, epoch: u64) {
        match self.refresh(epoch).await {
            Ok(_) => tracing::debug!("Polled session updates"),
            Err(e) => tracing::warn!(error = %e, "Poll failed"),
        }
    }
}

/// Coordinates one local player's session membership.
///
/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct SessionCoordinator {
    shared: Arc<Shared>,
}

impl SessionCoordinator {
    pub fn new(services: Services, config: CoordinatorConfig) -> Self {
        let (events_tx, _) = broadcast::channel(100);
        let builder = DescriptorBuilder::new(config.security_profile());

        Self {
            shared: Arc::new(Shared {
                schedulers: Mutex::new(Schedulers {
                    heartbeat: HeartbeatScheduler::new(config.heartbeat_interval),
                    poll: PollScheduler::new(config.poll_interval),
                }),
                services,
                config,
                builder,
                state: Mutex::new(CoordinatorState {
                    phase: Phase::Idle,
                    epoch: 0,
                    session: None,
                    allocation: None,
                    descriptor: None,
                    roster: RosterTracker::new(),
                    push: None,
                }),
                events_tx,
                driver: Mutex::new(None),
            }),
        }
    }

    /// Receiver for roster changes and warnings
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.shared.events_tx.subscribe()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    pub fn is_in_session(&self) -> bool {
        self.shared.state.lock().session.is_some()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.shared.state.lock().session.clone()
    }

    pub fn allocation(&self) -> Option<HeldAllocation> {
        self.shared.state.lock().allocation.clone()
    }

    pub fn descriptor(&self) -> Option<ConnectionDescriptor> {
        self.shared.state.lock().descriptor.clone()
    }

    /// Host iff the local player is the session's recorded host; evaluated
    /// against the current state on every call.
    pub fn is_host(&self) -> bool {
        let state = self.shared.state.lock();
        state
            .session
            .as_ref()
            .map(|s| self.shared.is_host_of(s))
            .unwrap_or(false)
    }

    pub fn timers(&self) -> TimerStatus {
        let schedulers = self.shared.schedulers.lock();
        TimerStatus {
            heartbeat: schedulers.heartbeat.remaining(),
            poll: schedulers.poll.remaining(),
        }
    }

    /// Sign in anonymously when needed, then apply `name` if given
    pub async fn sign_in(&self, name: Option<&str>) -> Result<String, SessionError> {
        let identity = &self.shared.services.identity;
        if !identity.is_signed_in() {
            identity.sign_in_anonymously().await?;
        }

        match name {
            Some(name) => self.set_display_name(name).await,
            None => identity.local_player_name().ok_or(SessionError::NotSignedIn),
        }
    }

    /// Rename the local player. A rejected name keeps the previous one and
    /// publishes a warning event; inside a session the member-visible name
    /// is updated in the directory as well.
    pub async fn set_display_name(&self, name: &str) -> Result<String, SessionError> {
        let shared = &self.shared;
        let previous = shared.services.identity.local_player_name();

        let applied = match shared.services.identity.update_display_name(name).await {
            Ok(applied) => applied,
            Err(SessionError::NameUpdateRejected(reason)) => {
                tracing::warn!(requested = %name, reason = %reason, "Display name rejected, keeping previous name");
                shared.emit(CoordinatorEvent::NameUpdateRejected {
                    requested: name.to_string(),
                    kept: previous.clone(),
                });
                return previous.ok_or(SessionError::NameUpdateRejected(reason));
            }
            Err(e) => return Err(e),
        };

        let target = {
            let state = shared.state.lock();
            match (state.phase, state.session.as_ref(), shared.local_player_id()) {
                (Phase::Active, Some(session), Some(player_id)) => {
                    Some((state.epoch, session.id.clone(), player_id))
                }
                _ => None,
            }
        };

        if let Some((epoch, session_id, player_id)) = target {
            let mut data = HashMap::new();
            data.insert(KEY_PLAYER_NAME.to_string(), DataValue::member(applied.clone()));
            match shared
                .services
                .directory
                .update_player_data(&session_id, &player_id, data)
                .await
            {
                Ok(session) => {
                    shared.apply_snapshot(epoch, session);
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to publish display name");
                }
            }
        }

        tracing::info!(name = %applied, "Display name updated");
        Ok(applied)
    }

    /// Host a new session using the configured privacy default
    pub async fn create_session(&self, name: &str, capacity: usize) -> Result<Session, SessionError> {
        let options = SessionOptions {
            is_private: self.shared.config.private_sessions,
            ..SessionOptions::default()
        };
        self.create_session_with(name, capacity, options).await
    }

    /// Host a new session.
    ///
    /// Reserves `capacity - 1` relay slots (the host is not counted), stores
    /// the relay join code in member-visible session data, hands a host
    /// descriptor to the transport and arms both schedulers to fire on the
    /// next tick. The transport is started only once the session is known to
    /// still be wanted, i.e. no leave happened meanwhile.
    pub async fn create_session_with(
        &self,
        name: &str,
        capacity: usize,
        options: SessionOptions,
    ) -> Result<Session, SessionError> {
        let span = tracing::info_span!("roomlink.coordinator", op = "create_session", name = %name, capacity);
        async move {
            let max = self.shared.config.max_capacity;
            if !(2..=max).contains(&capacity) {
                return Err(SessionError::InvalidCapacity { requested: capacity, max });
            }
            let player = self.local_player()?;
            let epoch = self.begin_establishing()?;

            let result = self.establish_host(name, capacity, options, &player).await;
            self.finish_establishing(epoch, result, Role::Host, &player).await
        }
        .instrument(span)
        .await
    }

    /// Join the session identified by its lobby code
    pub async fn join_session_by_code(&self, code: &str) -> Result<Session, SessionError> {
        let span = tracing::info_span!("roomlink.coordinator", op = "join_session_by_code", code = %code);
        self.join(JoinTarget::Code(code)).instrument(span).await
    }

    /// Join whichever open session the directory picks
    pub async fn quick_join_session(&self) -> Result<Session, SessionError> {
        let span = tracing::info_span!("roomlink.coordinator", op = "quick_join_session");
        self.join(JoinTarget::Quick).instrument(span).await
    }

    /// Leave the current session.
    ///
    /// Schedulers and the push subscription are torn down before local
    /// state is cleared, so no late callback can bring the session back.
    pub async fn leave_session(&self) {
        let shared = &self.shared;
        let left = {
            let mut state = shared.state.lock();
            {
                let mut schedulers = shared.schedulers.lock();
                schedulers.heartbeat.cancel();
                schedulers.poll.cancel();
            }
            if let Some(push) = state.push.take() {
                push.dispose();
            }
            state.epoch += 1;
            let was_active = state.phase == Phase::Active;
            state.phase = Phase::Idle;
            state.allocation = None;
            state.descriptor = None;
            state.roster.clear();
            state.session.take().filter(|_| was_active)
        };

        let Some(session) = left else {
            tracing::debug!("Leave requested while not in a session");
            return;
        };

        if let Some(player_id) = shared.local_player_id() {
            if let Err(e) = shared.services.directory.leave_session(&session.id, &player_id).await {
                tracing::warn!(session_id = %session.id, error = %e, "Failed to leave directory session");
            }
        }
        shared.services.transport.shutdown();

        tracing::info!(session_id = %session.id, name = %session.name, "Left session");
        shared.emit(CoordinatorEvent::SessionLeft { session_id: session.id });
    }

    /// Fetch and apply the session right away instead of waiting for a poll
    pub async fn refresh_now(&self) -> Result<(), SessionError> {
        let epoch = {
            let state = self.shared.state.lock();
            if state.phase != Phase::Active {
                return Err(SessionError::NotInSession);
            }
            state.epoch
        };
        self.shared.refresh(epoch).await.map(|_| ())
    }

    /// Advance both countdowns by `elapsed`, spawning due calls.
    ///
    /// The calls are not awaited; a call still running when its countdown
    /// fires again is skipped.
    pub fn tick(&self, elapsed: Duration) -> TickReport {
        let (epoch, is_host) = {
            let state = self.shared.state.lock();
            match (state.phase, state.session.as_ref()) {
                (Phase::Active, Some(session)) => (state.epoch, self.shared.is_host_of(session)),
                _ => return TickReport::idle(),
            }
        };

        let mut schedulers = self.shared.schedulers.lock();
        schedulers.heartbeat.sync_role(is_host);

        let heartbeat = schedulers.heartbeat.fire(elapsed, || {
            let shared = self.shared.clone();
            async move { shared.send_heartbeat(epoch).await }
        });
        let poll = schedulers.poll.fire(elapsed, || {
            let shared = self.shared.clone();
            async move { shared.poll(epoch).await }
        });

        TickReport { heartbeat, poll }
    }

    /// Wait for scheduler calls that are currently running
    pub async fn settle(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut schedulers = self.shared.schedulers.lock();
            [schedulers.heartbeat.take_task(), schedulers.poll.take_task()]
                .into_iter()
                .flatten()
                .collect()
        };
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Run `tick` on a tokio interval of `driver_period` until `shutdown`
    pub fn spawn_driver(&self) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let mut period = self.shared.config.driver_period;
        if period < MIN_DRIVER_PERIOD {
            tracing::warn!(?period, min = ?MIN_DRIVER_PERIOD, "Driver period too small, clamping");
            period = MIN_DRIVER_PERIOD;
        }

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last = tokio::time::Instant::now();

            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let now = tokio::time::Instant::now();
                SessionCoordinator { shared }.tick(now - last);
                last = now;
            }
            tracing::debug!("Coordinator driver stopped");
        });

        if let Some(previous) = self.shared.driver.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Leave any session and stop the driver
    pub async fn shutdown(&self) {
        self.leave_session().await;
        if let Some(driver) = self.shared.driver.lock().take() {
            driver.abort();
        }
    }

    fn local_player(&self) -> Result<Player, SessionError> {
        let identity = &self.shared.services.identity;
        if !identity.is_signed_in() {
            return Err(SessionError::NotSignedIn);
        }
        let id = identity.local_player_id().ok_or(SessionError::NotSignedIn)?;
        let name = identity.local_player_name().unwrap_or_else(|| id.clone());
        Ok(Player::new(id, name))
    }

    fn begin_establishing(&self) -> Result<u64, SessionError> {
        let mut state = self.shared.state.lock();
        if state.phase != Phase::Idle {
            return Err(SessionError::AlreadyInSession);
        }
        state.phase = Phase::Establishing;
        state.epoch += 1;
        Ok(state.epoch)
    }

    async fn join(&self, target: JoinTarget<'_>) -> Result<Session, SessionError> {
        let player = self.local_player()?;
        let epoch = self.begin_establishing()?;

        let result = self.establish_client(target, &player).await;
        self.finish_establishing(epoch, result, Role::Client, &player).await
    }

    async fn establish_host(
        &self,
        name: &str,
        capacity: usize,
        options: SessionOptions,
        player: &Player,
    ) -> Result<Established, SessionError> {
        let services = &self.shared.services;

        let allocation = services.relay.create_allocation(capacity - 1).await?;
        // Endpoint selection is pure; a mismatch stops here, before anything
        // remote exists that would need undoing
        let descriptor = self.shared.builder.build_host(&allocation)?;
        let join_code = services.relay.get_join_code(allocation.allocation_id).await?;

        let session = services
            .directory
            .create_session(
                name,
                capacity,
                CreateSessionOptions {
                    options,
                    player: player.clone(),
                },
            )
            .await?;
        tracing::info!(session_id = %session.id, code = %session.lobby_code, "Created directory session");

        let finished = async {
            let mut data = HashMap::new();
            data.insert(KEY_RELAY_JOIN_CODE.to_string(), DataValue::member(join_code));
            let session = services.directory.update_session_data(&session.id, data).await?;
            let notifications = services.directory.subscribe(&session.id).await?;
            Ok::<_, SessionError>((session, notifications))
        }
        .await;

        match finished {
            Ok((session, notifications)) => Ok(Established {
                session,
                allocation: HeldAllocation::Host(allocation),
                descriptor,
                notifications,
            }),
            Err(e) => {
                self.abandon(&session.id, &player.id).await;
                Err(e)
            }
        }
    }

    async fn establish_client(
        &self,
        target: JoinTarget<'_>,
        player: &Player,
    ) -> Result<Established, SessionError> {
        let services = &self.shared.services;

        let session = match target {
            JoinTarget::Code(code) => services.directory.join_session_by_code(code, player.clone()).await?,
            JoinTarget::Quick => services.directory.quick_join(player.clone()).await?,
        };
        tracing::info!(session_id = %session.id, name = %session.name, "Joined directory session");

        let finished = async {
            let join_code = session
                .relay_join_code()
                .ok_or(SessionError::MissingRelayJoinCode)?;
            let join = services.relay.join_allocation(join_code).await?;
            let descriptor = self.shared.builder.build_client(&join)?;
            let notifications = services.directory.subscribe(&session.id).await?;
            Ok::<_, SessionError>((join, descriptor, notifications))
        }
        .await;

        match finished {
            Ok((join, descriptor, notifications)) => Ok(Established {
                session,
                allocation: HeldAllocation::Client(join),
                descriptor,
                notifications,
            }),
            Err(e) => {
                self.abandon(&session.id, &player.id).await;
                Err(e)
            }
        }
    }

    /// Commit a successful establishment or restore `Idle` after a failure
    async fn finish_establishing(
        &self,
        epoch: u64,
        result: Result<Established, SessionError>,
        role: Role,
        player: &Player,
    ) -> Result<Session, SessionError> {
        let established = match result {
            Ok(established) => established,
            Err(e) => {
                let mut state = self.shared.state.lock();
                if state.epoch == epoch && state.phase == Phase::Establishing {
                    state.phase = Phase::Idle;
                }
                tracing::warn!(?role, error = %e, "Session establishment failed");
                return Err(e);
            }
        };

        let Established {
            session,
            allocation,
            descriptor,
            notifications,
        } = established;

        // Lock order: state, then schedulers
        let committed = {
            let mut state = self.shared.state.lock();
            if state.epoch != epoch || state.phase != Phase::Establishing {
                Err(None)
            } else if let Err(e) = self.shared.services.transport.start(&descriptor, role) {
                state.phase = Phase::Idle;
                Err(Some(e))
            } else {
                state.phase = Phase::Active;
                state.session = Some(session.clone());
                state.allocation = Some(allocation);
                state.descriptor = Some(descriptor);
                let change = state.roster.seed(&session.players);

                let shared = self.shared.clone();
                state.push = Some(PushBridge::spawn(notifications, move || {
                    let shared = shared.clone();
                    async move { shared.refresh(epoch).await }
                }));

                let is_host = self.shared.is_host_of(&session);
                let mut schedulers = self.shared.schedulers.lock();
                schedulers.poll.start();
                schedulers.heartbeat.start(is_host);
                Ok(change)
            }
        };

        let change = match committed {
            Ok(change) => change,
            Err(None) => {
                // Left while establishing; the transport was never started
                tracing::info!(session_id = %session.id, "Establishment cancelled, rolling back");
                self.abandon(&session.id, &player.id).await;
                return Err(SessionError::NotInSession);
            }
            Err(Some(e)) => {
                tracing::warn!(?role, session_id = %session.id, error = %e, "Transport failed to start, rolling back");
                self.abandon(&session.id, &player.id).await;
                return Err(e);
            }
        };

        tracing::info!(
            session_id = %session.id,
            name = %session.name,
            code = %session.lobby_code,
            ?role,
            players = session.players.len(),
            "Session established"
        );
        self.shared.emit(CoordinatorEvent::RosterChanged(change));
        Ok(session)
    }

    /// Best-effort removal of the local player from a directory session
    async fn abandon(&self, session_id: &str, player_id: &str) {
        match self.shared.services.directory.leave_session(session_id, player_id).await {
            Ok(()) => tracing::debug!(session_id = %session_id, "Rolled back directory membership"),
            Err(e) => tracing::warn!(session_id = %session_id, error = %e, "Rollback of directory membership failed"),
        }
    }
}
