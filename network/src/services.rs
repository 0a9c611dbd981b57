// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contracts of the remote collaborators the coordinator talks to
//!
//! - `DirectoryService`: the lobby directory holding session records
//! - `RelayService`: relay allocations and join codes
//! - `IdentityProvider`: sign-in and display names
//! - `TransportBootstrap`: receives the connection descriptor

use std::collections::HashMap;

use async_trait::async_trait;
use roomlink_core::{
    Allocation, ConnectionDescriptor, DataValue, JoinAllocation, Player, PlayerId, Role, Session,
    SessionError,
};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Push notifications published by the directory for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyNotification {
    /// Session record changed (host, flags...)
    SessionChanged,
    PlayerJoined(PlayerId),
    PlayerLeft(PlayerId),
    /// Session or player metadata changed
    DataChanged,
}

/// Visibility and access flags for a new session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub is_private: bool,
    pub is_locked: bool,
    pub password: Option<String>,
}

/// Everything the directory needs to create a session
#[derive(Debug, Clone)]
pub struct CreateSessionOptions {
    pub options: SessionOptions,
    /// Creating player, recorded as host
    pub player: Player,
}

/// Lobby directory service
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn create_session(
        &self,
        name: &str,
        capacity: usize,
        options: CreateSessionOptions,
    ) -> Result<Session, SessionError>;

    async fn join_session_by_code(&self, code: &str, player: Player) -> Result<Session, SessionError>;

    /// Join any open session the directory picks
    async fn quick_join(&self, player: Player) -> Result<Session, SessionError>;

    /// Merge `data` into the session metadata
    async fn update_session_data(
        &self,
        session_id: &str,
        data: HashMap<String, DataValue>,
    ) -> Result<Session, SessionError>;

    /// Merge `data` into one player's metadata
    async fn update_player_data(
        &self,
        session_id: &str,
        player_id: &str,
        data: HashMap<String, DataValue>,
    ) -> Result<Session, SessionError>;

    async fn send_heartbeat(&self, session_id: &str) -> Result<(), SessionError>;

    async fn get_session(&self, session_id: &str) -> Result<Session, SessionError>;

    async fn leave_session(&self, session_id: &str, player_id: &str) -> Result<(), SessionError>;

    /// Subscribe to push notifications; dropping the receiver disposes it
    async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<broadcast::Receiver<LobbyNotification>, SessionError>;
}

/// Relay allocation service
#[async_trait]
pub trait RelayService: Send + Sync {
    /// Reserve relay capacity for `slots` remote players
    async fn create_allocation(&self, slots: usize) -> Result<Allocation, SessionError>;

    async fn get_join_code(&self, allocation_id: Uuid) -> Result<String, SessionError>;

    async fn join_allocation(&self, join_code: &str) -> Result<JoinAllocation, SessionError>;
}

/// Sign-in and player naming
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn is_signed_in(&self) -> bool;

    fn local_player_id(&self) -> Option<PlayerId>;

    fn local_player_name(&self) -> Option<String>;

    async fn sign_in_anonymously(&self) -> Result<(), SessionError>;

    /// Returns the name actually recorded
    async fn update_display_name(&self, name: &str) -> Result<String, SessionError>;
}

/// Receiver of the connection descriptor; packet delivery happens behind it
pub trait TransportBootstrap: Send + Sync {
    fn start(&self, descriptor: &ConnectionDescriptor, role: Role) -> Result<(), SessionError>;

    fn shutdown(&self);
}
