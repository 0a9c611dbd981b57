// SPDX-License-Identifier: MIT OR Apache-2.0

//! roomlink core - session data model and pure coordination logic
//!
//! This crate holds everything that does not touch a remote service:
//! - Session / player records as the lobby directory reports them
//! - Relay allocations and endpoint selection
//! - Role-aware connection descriptors for the transport handoff
//! - Roster reconciliation between two membership snapshots
//! - Countdown timers used by the periodic schedulers

#![deny(unsafe_code)]
#![deny(clippy::all)]

pub mod allocation;
pub mod countdown;
pub mod descriptor;
pub mod endpoint;
pub mod roster;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session metadata key holding the relay join code (member visibility)
pub const KEY_RELAY_JOIN_CODE: &str = "RelayJoinCode";
/// Player metadata key holding the display name (member visibility)
pub const KEY_PLAYER_NAME: &str = "PlayerName";

pub type SessionId = String;
pub type PlayerId = String;

/// Who may read a metadata entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Anyone browsing the directory
    Public,
    /// Only players inside the session
    Member,
    /// Only the owning player
    Private,
}

/// A visibility-scoped metadata value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataValue {
    pub visibility: Visibility,
    pub value: String,
}

impl DataValue {
    pub fn member(value: impl Into<String>) -> Self {
        Self {
            visibility: Visibility::Member,
            value: value.into(),
        }
    }

    pub fn public(value: impl Into<String>) -> Self {
        Self {
            visibility: Visibility::Public,
            value: value.into(),
        }
    }
}

/// Participant record inside a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Unique player identifier
    pub id: PlayerId,
    /// Player-scoped metadata
    pub data: HashMap<String, DataValue>,
}

impl Player {
    /// Build a player record carrying its display name
    pub fn new(id: impl Into<PlayerId>, display_name: impl Into<String>) -> Self {
        let mut data = HashMap::new();
        data.insert(KEY_PLAYER_NAME.to_string(), DataValue::member(display_name));
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        self.data.get(KEY_PLAYER_NAME).map(|v| v.value.as_str())
    }
}

/// A room as recorded by the lobby directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// Display name of the room
    pub name: String,
    /// Short code other players use to join through the directory
    pub lobby_code: String,
    /// Maximum number of players, host included
    pub capacity: usize,
    /// Player currently recorded as host
    pub host_id: PlayerId,
    /// Hidden from quick-join and listing
    pub is_private: bool,
    /// Closed to new players
    pub is_locked: bool,
    pub password: Option<String>,
    /// Session-scoped metadata
    pub data: HashMap<String, DataValue>,
    /// Current members, order irrelevant
    pub players: Vec<Player>,
    /// Bumped by the directory on every mutation
    pub version: u64,
}

impl Session {
    /// Relay join code stored by the host, if present
    pub fn relay_join_code(&self) -> Option<&str> {
        self.data.get(KEY_RELAY_JOIN_CODE).map(|v| v.value.as_str())
    }

    pub fn player_ids(&self) -> HashSet<PlayerId> {
        self.players.iter().map(|p| p.id.clone()).collect()
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn has_player(&self, id: &str) -> bool {
        self.player(id).is_some()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.capacity
    }

    /// Open to quick-join: public, unlocked, no password and not full
    pub fn is_joinable(&self) -> bool {
        !self.is_private && !self.is_locked && self.password.is_none() && !self.is_full()
    }

    /// The record as `viewer` may read it.
    ///
    /// Members see member and public entries plus their own private ones;
    /// anyone else sees public entries only. The password never leaves the
    /// directory.
    pub fn view_for(&self, viewer: &str) -> Session {
        let member = self.has_player(viewer);
        let session_level = if member { Visibility::Member } else { Visibility::Public };

        let players = self
            .players
            .iter()
            .map(|p| {
                let level = if p.id == viewer { Visibility::Private } else { session_level };
                Player {
                    id: p.id.clone(),
                    data: visible_entries(&p.data, level),
                }
            })
            .collect();

        Session {
            password: None,
            data: visible_entries(&self.data, session_level),
            players,
            ..self.clone()
        }
    }
}

impl Visibility {
    /// Whether a reader cleared for `level` may read an entry of this visibility
    pub fn readable_at(self, level: Visibility) -> bool {
        match level {
            Visibility::Private => true,
            Visibility::Member => self != Visibility::Private,
            Visibility::Public => self == Visibility::Public,
        }
    }
}

fn visible_entries(data: &HashMap<String, DataValue>, level: Visibility) -> HashMap<String, DataValue> {
    data.iter()
        .filter(|(_, v)| v.visibility.readable_at(level))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Errors raised while establishing or maintaining a session
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Transient remote failure
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// No relay endpoint satisfied the security profile
    #[error("No relay endpoint matches connection type '{connection_type}' (browser mode: {browser_mode})")]
    NoMatchingEndpoint {
        connection_type: String,
        browser_mode: bool,
    },

    /// The identity service refused a display-name change
    #[error("Display name update rejected: {0}")]
    NameUpdateRejected(String),

    #[error("Local player is not signed in")]
    NotSignedIn,

    #[error("Already in a session")]
    AlreadyInSession,

    #[error("Not in a session")]
    NotInSession,

    #[error("Invalid capacity {requested} (must be between 2 and {max})")]
    InvalidCapacity { requested: usize, max: usize },

    /// Session metadata carried no relay join code
    #[error("Session has no relay join code")]
    MissingRelayJoinCode,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session is full")]
    SessionFull,

    #[error("Transport failed to start: {0}")]
    TransportFailed(String),
}

impl SessionError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::ServiceUnavailable(_))
    }
}

pub use allocation::{Allocation, HeldAllocation, JoinAllocation};
pub use countdown::Countdown;
pub use descriptor::{ConnectionDescriptor, DescriptorBuilder, Role};
pub use endpoint::{select_endpoint, EncryptionType, RelayEndpoint, SecurityProfile};
pub use roster::{diff_roster, RosterChange, RosterDiff, RosterTracker};
