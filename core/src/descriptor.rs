// SPDX-License-Identifier: MIT OR Apache-2.0

//! Role-aware connection descriptors handed to the transport bootstrap

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::allocation::{Allocation, JoinAllocation};
use crate::endpoint::{select_endpoint, RelayEndpoint, SecurityProfile};
use crate::SessionError;

/// Which side of the relay the local process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Client,
}

/// Everything the transport needs to reach the relay.
///
/// Built once per establishment and never mutated afterwards; the fields are
/// only readable through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    role: Role,
    endpoint: RelayEndpoint,
    allocation_id: Uuid,
    key: Vec<u8>,
    connection_data: Vec<u8>,
    host_connection_data: Vec<u8>,
    is_secure: bool,
    is_web_socket: bool,
}

impl ConnectionDescriptor {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn endpoint(&self) -> &RelayEndpoint {
        &self.endpoint
    }

    pub fn allocation_id(&self) -> Uuid {
        self.allocation_id
    }

    /// Allocation id in the 16-byte form the transport expects
    pub fn allocation_id_bytes(&self) -> [u8; 16] {
        *self.allocation_id.as_bytes()
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn connection_data(&self) -> &[u8] {
        &self.connection_data
    }

    pub fn host_connection_data(&self) -> &[u8] {
        &self.host_connection_data
    }

    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    pub fn is_web_socket(&self) -> bool {
        self.is_web_socket
    }
}

/// Assembles descriptors from an allocation and an already selected endpoint
pub struct DescriptorBuilder {
    profile: SecurityProfile,
}

impl DescriptorBuilder {
    pub fn new(profile: SecurityProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &SecurityProfile {
        &self.profile
    }

    /// Host side: the host is its own reference point, so local and host
    /// connection data are the same bytes.
    pub fn host(&self, allocation: &Allocation, endpoint: &RelayEndpoint) -> ConnectionDescriptor {
        ConnectionDescriptor {
            role: Role::Host,
            endpoint: endpoint.clone(),
            allocation_id: allocation.allocation_id,
            key: allocation.key.clone(),
            connection_data: allocation.connection_data.clone(),
            host_connection_data: allocation.connection_data.clone(),
            is_secure: self.profile.secure_required,
            is_web_socket: self.profile.browser_mode,
        }
    }

    /// Client side: local data is the join allocation's own, host data is the
    /// blob the relay issued for this join.
    pub fn client(&self, join: &JoinAllocation, endpoint: &RelayEndpoint) -> ConnectionDescriptor {
        ConnectionDescriptor {
            role: Role::Client,
            endpoint: endpoint.clone(),
            allocation_id: join.allocation_id,
            key: join.key.clone(),
            connection_data: join.connection_data.clone(),
            host_connection_data: join.host_connection_data.clone(),
            is_secure: self.profile.secure_required,
            is_web_socket: self.profile.browser_mode,
        }
    }

    /// Select an endpoint from the allocation and build the host descriptor
    pub fn build_host(&self, allocation: &Allocation) -> Result<ConnectionDescriptor, SessionError> {
        let endpoint = select_endpoint(&allocation.endpoints, &self.profile)?;
        Ok(self.host(allocation, endpoint))
    }

    /// Select an endpoint from the join allocation and build the client descriptor
    pub fn build_client(&self, join: &JoinAllocation) -> Result<ConnectionDescriptor, SessionError> {
        let endpoint = select_endpoint(&join.endpoints, &self.profile)?;
        Ok(self.client(join, endpoint))
    }
}
