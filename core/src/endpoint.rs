// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relay endpoint selection
//!
//! The relay service offers several endpoints per allocation (plain UDP,
//! DTLS, websocket...). Selection is first-match over the offered order.

use serde::{Deserialize, Serialize};

use crate::SessionError;

/// Connection-type tag of the secure datagram protocol
pub const DTLS_CONNECTION_TYPE: &str = "dtls";

/// One candidate address offered by the relay service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEndpoint {
    pub host: String,
    pub port: u16,
    /// Protocol tag, e.g. "udp", "dtls", "ws", "wss"
    pub connection_type: String,
    /// Whether the endpoint terminates a secure channel
    pub secure: bool,
}

impl RelayEndpoint {
    pub fn new(host: impl Into<String>, port: u16, connection_type: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            connection_type: connection_type.into(),
            secure,
        }
    }
}

/// Transport encryption chosen by the local build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionType {
    /// Datagram TLS, native builds
    #[default]
    Dtls,
    /// Secure websocket, browser builds
    Wss,
}

/// Security requirements for endpoint selection and the descriptor flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityProfile {
    /// Descriptor marks the transport as secure
    pub secure_required: bool,
    /// Browser-compatible transport; only secure endpoints qualify
    pub browser_mode: bool,
}

impl From<EncryptionType> for SecurityProfile {
    fn from(encryption: EncryptionType) -> Self {
        match encryption {
            EncryptionType::Dtls => Self {
                secure_required: true,
                browser_mode: false,
            },
            EncryptionType::Wss => Self {
                secure_required: true,
                browser_mode: true,
            },
        }
    }
}

impl SecurityProfile {
    /// Whether an endpoint satisfies this profile
    pub fn accepts(&self, endpoint: &RelayEndpoint) -> bool {
        endpoint.connection_type == DTLS_CONNECTION_TYPE && (!self.browser_mode || endpoint.secure)
    }
}

/// Pick the first endpoint satisfying `profile`
pub fn select_endpoint<'a>(
    endpoints: &'a [RelayEndpoint],
    profile: &SecurityProfile,
) -> Result<&'a RelayEndpoint, SessionError> {
    match endpoints.iter().find(|e| profile.accepts(e)) {
        Some(endpoint) => {
            tracing::debug!(
                host = %endpoint.host,
                port = endpoint.port,
                secure = endpoint.secure,
                "Selected relay endpoint"
            );
            Ok(endpoint)
        }
        None => {
            tracing::warn!(
                offered = endpoints.len(),
                browser_mode = profile.browser_mode,
                "No relay endpoint matches security profile"
            );
            Err(SessionError::NoMatchingEndpoint {
                connection_type: DTLS_CONNECTION_TYPE.to_string(),
                browser_mode: profile.browser_mode,
            })
        }
    }
}
