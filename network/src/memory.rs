// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process service implementations
//!
//! Directory, relay and transport stand-ins sharing state through `Arc`s so
//! several coordinators in one process can meet in the same session. Every
//! operation can be switched to fail, which is how tests exercise rollback.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use roomlink_core::{
    Allocation, ConnectionDescriptor, DataValue, JoinAllocation, Player, RelayEndpoint, Role,
    Session, SessionError, SessionId,
};
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

use crate::services::{
    CreateSessionOptions, DirectoryService, LobbyNotification, RelayService, TransportBootstrap,
};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

fn random_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

fn injected(op: impl std::fmt::Debug) -> SessionError {
    SessionError::ServiceUnavailable(format!("{:?} unavailable", op))
}

/// Directory operations that can be switched to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryOp {
    Create,
    JoinByCode,
    QuickJoin,
    UpdateSessionData,
    UpdatePlayerData,
    Heartbeat,
    GetSession,
    Leave,
    Subscribe,
}

struct StoredSession {
    session: Session,
    created_seq: u64,
    notify: broadcast::Sender<LobbyNotification>,
}

impl StoredSession {
    fn bump(&mut self, notification: LobbyNotification) {
        self.session.version += 1;
        // No subscribers is fine
        let _ = self.notify.send(notification);
    }
}

#[derive(Default)]
struct DirectoryState {
    sessions: HashMap<SessionId, StoredSession>,
    next_seq: u64,
    failing: HashSet<DirectoryOp>,
    read_latency: Duration,
    heartbeats: HashMap<SessionId, u64>,
    reads: u64,
}

impl DirectoryState {
    fn check(&self, op: DirectoryOp) -> Result<(), SessionError> {
        if self.failing.contains(&op) {
            Err(injected(op))
        } else {
            Ok(())
        }
    }

    fn stored_mut(&mut self, session_id: &str) -> Result<&mut StoredSession, SessionError> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))
    }
}

fn admit(stored: &mut StoredSession, player: Player) -> Result<Session, SessionError> {
    if stored.session.has_player(&player.id) {
        return Ok(stored.session.clone());
    }
    if stored.session.is_full() {
        return Err(SessionError::SessionFull);
    }
    let player_id = player.id.clone();
    stored.session.players.push(player);
    stored.bump(LobbyNotification::PlayerJoined(player_id));
    Ok(stored.session.clone())
}

/// Lobby directory kept in process memory
#[derive(Default)]
pub struct InMemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail with `ServiceUnavailable` until switched back
    pub fn set_failing(&self, op: DirectoryOp, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    /// Delay applied to every `get_session` call
    pub fn set_read_latency(&self, latency: Duration) {
        self.state.lock().read_latency = latency;
    }

    pub fn heartbeat_count(&self, session_id: &str) -> u64 {
        self.state.lock().heartbeats.get(session_id).copied().unwrap_or(0)
    }

    /// Number of `get_session` calls served
    pub fn read_count(&self) -> u64 {
        self.state.lock().reads
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Sessions open to quick-join, as `viewer` is allowed to see them
    pub fn browse(&self, viewer: &str) -> Vec<Session> {
        let state = self.state.lock();
        let mut listed: Vec<&StoredSession> = state
            .sessions
            .values()
            .filter(|s| s.session.is_joinable())
            .collect();
        listed.sort_by_key(|s| s.created_seq);
        listed.into_iter().map(|s| s.session.view_for(viewer)).collect()
    }

    /// Current record, bypassing failure injection
    pub fn peek(&self, session_id: &str) -> Option<Session> {
        self.state.lock().sessions.get(session_id).map(|s| s.session.clone())
    }

    /// Hand the host role to another member
    pub fn transfer_host(&self, session_id: &str, player_id: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let stored = state.stored_mut(session_id)?;
        if !stored.session.has_player(player_id) {
            return Err(SessionError::SessionNotFound(format!("{}/{}", session_id, player_id)));
        }
        stored.session.host_id = player_id.to_string();
        stored.bump(LobbyNotification::SessionChanged);
        Ok(())
    }

    /// Add a player without going through a coordinator
    pub fn admit_player(&self, session_id: &str, player: Player) -> Result<Session, SessionError> {
        let mut state = self.state.lock();
        admit(state.stored_mut(session_id)?, player)
    }

    /// Change a player record without publishing a notification
    pub fn rename_silently(&self, session_id: &str, player_id: &str, name: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let stored = state.stored_mut(session_id)?;
        let player = stored
            .session
            .players
            .iter_mut()
            .find(|p| p.id == player_id)
            .ok_or_else(|| SessionError::SessionNotFound(player_id.to_string()))?;
        *player = Player::new(player_id, name);
        stored.session.version += 1;
        Ok(())
    }
}

#[async_trait]
impl DirectoryService for InMemoryDirectory {
    async fn create_session(
        &self,
        name: &str,
        capacity: usize,
        options: CreateSessionOptions,
    ) -> Result<Session, SessionError> {
        let mut state = self.state.lock();
        state.check(DirectoryOp::Create)?;

        let session = Session {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            lobby_code: random_code(6),
            capacity,
            host_id: options.player.id.clone(),
            is_private: options.options.is_private,
            is_locked: options.options.is_locked,
            password: options.options.password,
            data: HashMap::new(),
            players: vec![options.player],
            version: 1,
        };
        let (notify, _) = broadcast::channel(64);
        let created_seq = state.next_seq;
        state.next_seq += 1;
        state.sessions.insert(
            session.id.clone(),
            StoredSession {
                session: session.clone(),
                created_seq,
                notify,
            },
        );

        tracing::debug!(session_id = %session.id, code = %session.lobby_code, "Directory session created");
        Ok(session)
    }

    async fn join_session_by_code(&self, code: &str, player: Player) -> Result<Session, SessionError> {
        let mut state = self.state.lock();
        state.check(DirectoryOp::JoinByCode)?;

        let stored = state
            .sessions
            .values_mut()
            .find(|s| s.session.lobby_code.eq_ignore_ascii_case(code) && !s.session.is_locked)
            .ok_or_else(|| SessionError::SessionNotFound(code.to_string()))?;
        admit(stored, player)
    }

    async fn quick_join(&self, player: Player) -> Result<Session, SessionError> {
        let mut state = self.state.lock();
        state.check(DirectoryOp::QuickJoin)?;

        let stored = state
            .sessions
            .values_mut()
            .filter(|s| s.session.is_joinable() && !s.session.has_player(&player.id))
            .min_by_key(|s| s.created_seq)
            .ok_or_else(|| SessionError::SessionNotFound("no open session".to_string()))?;
        admit(stored, player)
    }

    async fn update_session_data(
        &self,
        session_id: &str,
        data: HashMap<String, DataValue>,
    ) -> Result<Session, SessionError> {
        let mut state = self.state.lock();
        state.check(DirectoryOp::UpdateSessionData)?;

        let stored = state.stored_mut(session_id)?;
        stored.session.data.extend(data);
        stored.bump(LobbyNotification::DataChanged);
        Ok(stored.session.clone())
    }

    async fn update_player_data(
        &self,
        session_id: &str,
        player_id: &str,
        data: HashMap<String, DataValue>,
    ) -> Result<Session, SessionError> {
        let mut state = self.state.lock();
        state.check(DirectoryOp::UpdatePlayerData)?;

        let stored = state.stored_mut(session_id)?;
        let player = stored
            .session
            .players
            .iter_mut()
            .find(|p| p.id == player_id)
            .ok_or_else(|| SessionError::SessionNotFound(player_id.to_string()))?;
        player.data.extend(data);
        stored.bump(LobbyNotification::DataChanged);
        Ok(stored.session.clone())
    }

    async fn send_heartbeat(&self, session_id: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.check(DirectoryOp::Heartbeat)?;
        state.stored_mut(session_id)?;
        *state.heartbeats.entry(session_id.to_string()).or_default() += 1;
        Ok(())
    }

    // Only members hold a session id through the coordinator, so reads are
    // served as member views. Outsiders go through `browse`.
    async fn get_session(&self, session_id: &str) -> Result<Session, SessionError> {
        let latency = {
            let mut state = self.state.lock();
            state.check(DirectoryOp::GetSession)?;
            state.reads += 1;
            state.read_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self.state.lock();
        state
            .sessions
            .get(session_id)
            .map(|s| s.session.clone())
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))
    }

    async fn leave_session(&self, session_id: &str, player_id: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.check(DirectoryOp::Leave)?;

        let stored = state.stored_mut(session_id)?;
        stored.session.players.retain(|p| p.id != player_id);

        if stored.session.players.is_empty() {
            state.sessions.remove(session_id);
            state.heartbeats.remove(session_id);
            tracing::debug!(session_id = %session_id, "Directory session closed");
            return Ok(());
        }

        if stored.session.host_id == player_id {
            // Oldest remaining member inherits the host role
            stored.session.host_id = stored.session.players[0].id.clone();
            tracing::debug!(session_id = %session_id, host = %stored.session.host_id, "Host migrated");
        }
        stored.bump(LobbyNotification::PlayerLeft(player_id.to_string()));
        Ok(())
    }

    async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<broadcast::Receiver<LobbyNotification>, SessionError> {
        let mut state = self.state.lock();
        state.check(DirectoryOp::Subscribe)?;
        Ok(state.stored_mut(session_id)?.notify.subscribe())
    }
}

/// Relay operations that can be switched to fail or held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayOp {
    CreateAllocation,
    GetJoinCode,
    JoinAllocation,
}

/// Holds one relay call until released
#[derive(Debug, Clone, Default)]
pub struct RelayGate {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl RelayGate {
    /// Resolves once the held call has arrived
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the held call proceed
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.reached.notify_one();
        self.release.notified().await;
    }
}

struct RelayState {
    endpoints: Vec<RelayEndpoint>,
    allocations: HashMap<Uuid, Allocation>,
    join_codes: HashMap<String, Uuid>,
    failing: HashSet<RelayOp>,
    gates: HashMap<RelayOp, RelayGate>,
    joins: u64,
}

/// Relay service kept in process memory
pub struct InMemoryRelay {
    state: Mutex<RelayState>,
}

impl Default for InMemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRelay {
    /// Relay offering udp, dtls and wss endpoints
    pub fn new() -> Self {
        Self::with_endpoints(vec![
            RelayEndpoint::new("127.0.0.1", 7777, "udp", false),
            RelayEndpoint::new("127.0.0.1", 7778, "dtls", true),
            RelayEndpoint::new("127.0.0.1", 443, "wss", true),
        ])
    }

    /// Relay offering exactly `endpoints`, in that order
    pub fn with_endpoints(endpoints: Vec<RelayEndpoint>) -> Self {
        Self {
            state: Mutex::new(RelayState {
                endpoints,
                allocations: HashMap::new(),
                join_codes: HashMap::new(),
                failing: HashSet::new(),
                gates: HashMap::new(),
                joins: 0,
            }),
        }
    }

    pub fn set_failing(&self, op: RelayOp, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    /// Hold the next call of `op` until the returned gate is released
    pub fn hold_next(&self, op: RelayOp) -> RelayGate {
        let gate = RelayGate::default();
        self.state.lock().gates.insert(op, gate.clone());
        gate
    }

    async fn gate(&self, op: RelayOp) {
        let gate = self.state.lock().gates.remove(&op);
        if let Some(gate) = gate {
            tracing::debug!(?op, "Relay call held");
            gate.pass().await;
        }
    }

    pub fn allocation_count(&self) -> usize {
        self.state.lock().allocations.len()
    }

    pub fn join_count(&self) -> u64 {
        self.state.lock().joins
    }

    pub fn allocation(&self, allocation_id: Uuid) -> Option<Allocation> {
        self.state.lock().allocations.get(&allocation_id).cloned()
    }
}

#[async_trait]
impl RelayService for InMemoryRelay {
    async fn create_allocation(&self, slots: usize) -> Result<Allocation, SessionError> {
        self.gate(RelayOp::CreateAllocation).await;
        let mut state = self.state.lock();
        if state.failing.contains(&RelayOp::CreateAllocation) {
            return Err(injected(RelayOp::CreateAllocation));
        }

        let allocation = Allocation {
            allocation_id: Uuid::new_v4(),
            endpoints: state.endpoints.clone(),
            connection_data: random_bytes(16),
            key: random_bytes(32),
            slots,
        };
        state.allocations.insert(allocation.allocation_id, allocation.clone());
        Ok(allocation)
    }

    async fn get_join_code(&self, allocation_id: Uuid) -> Result<String, SessionError> {
        self.gate(RelayOp::GetJoinCode).await;
        let mut state = self.state.lock();
        if state.failing.contains(&RelayOp::GetJoinCode) {
            return Err(injected(RelayOp::GetJoinCode));
        }
        if !state.allocations.contains_key(&allocation_id) {
            return Err(SessionError::ServiceUnavailable(format!(
                "unknown allocation {}",
                allocation_id
            )));
        }

        let code = random_code(8);
        state.join_codes.insert(code.clone(), allocation_id);
        Ok(code)
    }

    async fn join_allocation(&self, join_code: &str) -> Result<JoinAllocation, SessionError> {
        self.gate(RelayOp::JoinAllocation).await;
        let mut state = self.state.lock();
        if state.failing.contains(&RelayOp::JoinAllocation) {
            return Err(injected(RelayOp::JoinAllocation));
        }

        let host = state
            .join_codes
            .get(join_code)
            .and_then(|id| state.allocations.get(id))
            .cloned()
            .ok_or_else(|| {
                SessionError::ServiceUnavailable(format!("unknown relay join code {}", join_code))
            })?;
        state.joins += 1;

        Ok(JoinAllocation {
            allocation_id: Uuid::new_v4(),
            endpoints: host.endpoints,
            connection_data: random_bytes(16),
            host_connection_data: host.connection_data,
            key: host.key,
        })
    }
}

#[derive(Default)]
struct TransportState {
    started: Vec<(ConnectionDescriptor, Role)>,
    running: Option<Role>,
    shutdowns: u64,
    failing: bool,
}

/// Transport that records every handoff instead of opening sockets
#[derive(Default)]
pub struct RecordingTransport {
    state: Mutex<TransportState>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    pub fn running(&self) -> Option<Role> {
        self.state.lock().running
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().started.len()
    }

    pub fn shutdown_count(&self) -> u64 {
        self.state.lock().shutdowns
    }

    pub fn last_descriptor(&self) -> Option<ConnectionDescriptor> {
        self.state.lock().started.last().map(|(d, _)| d.clone())
    }
}

impl TransportBootstrap for RecordingTransport {
    fn start(&self, descriptor: &ConnectionDescriptor, role: Role) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if state.failing {
            return Err(SessionError::TransportFailed("transport refused to start".to_string()));
        }
        tracing::debug!(
            ?role,
            host = %descriptor.endpoint().host,
            port = descriptor.endpoint().port,
            "Transport started"
        );
        state.started.push((descriptor.clone(), role));
        state.running = Some(role);
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.running.take().is_some() {
            state.shutdowns += 1;
        }
    }
}
