// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local player identity
//!
//! Anonymous sign-in issues a fresh player id. Players who never picked a
//! name get `Player<n>` with n in 0..1000.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use roomlink_core::{PlayerId, SessionError};
use uuid::Uuid;

use crate::services::IdentityProvider;

/// Longest display name the identity service accepts
pub const MAX_DISPLAY_NAME_LEN: usize = 50;

/// Generated name for players who have not chosen one
pub fn default_player_name() -> String {
    format!("Player{}", rand::thread_rng().gen_range(0..1000))
}

/// Trim and check a requested display name
pub fn validate_display_name(name: &str) -> Result<String, SessionError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SessionError::NameUpdateRejected("name is empty".to_string()));
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(SessionError::NameUpdateRejected(format!(
            "name longer than {} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(SessionError::NameUpdateRejected("name contains whitespace".to_string()));
    }
    Ok(trimmed.to_string())
}

#[derive(Default)]
struct Account {
    player_id: Option<PlayerId>,
    name: Option<String>,
    reject_renames: bool,
}

/// Identity held in process memory
#[derive(Default)]
pub struct LocalIdentity {
    account: Mutex<Account>,
}

impl LocalIdentity {
    /// Not yet signed in
    pub fn new() -> Self {
        Self::default()
    }

    /// Already signed in as `player_id` named `name`
    pub fn signed_in(player_id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            account: Mutex::new(Account {
                player_id: Some(player_id.into()),
                name: Some(name.into()),
                reject_renames: false,
            }),
        }
    }

    /// Make the service refuse every rename
    pub fn set_reject_renames(&self, reject: bool) {
        self.account.lock().reject_renames = reject;
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    fn is_signed_in(&self) -> bool {
        self.account.lock().player_id.is_some()
    }

    fn local_player_id(&self) -> Option<PlayerId> {
        self.account.lock().player_id.clone()
    }

    fn local_player_name(&self) -> Option<String> {
        self.account.lock().name.clone()
    }

    async fn sign_in_anonymously(&self) -> Result<(), SessionError> {
        let mut account = self.account.lock();
        if account.player_id.is_none() {
            account.player_id = Some(Uuid::new_v4().simple().to_string());
        }
        if account.name.is_none() {
            account.name = Some(default_player_name());
        }
        tracing::info!(
            player_id = account.player_id.as_deref().unwrap_or_default(),
            name = account.name.as_deref().unwrap_or_default(),
            "Signed in anonymously"
        );
        Ok(())
    }

    async fn update_display_name(&self, name: &str) -> Result<String, SessionError> {
        let name = validate_display_name(name)?;
        let mut account = self.account.lock();
        if account.player_id.is_none() {
            return Err(SessionError::NotSignedIn);
        }
        if account.reject_renames {
            return Err(SessionError::NameUpdateRejected(format!("'{}' refused", name)));
        }
        account.name = Some(name.clone());
        Ok(name)
    }
}
