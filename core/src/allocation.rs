// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relay allocations
//!
//! Connection material issued by the relay service. Allocations live only for
//! one establishment attempt and are consumed by descriptor construction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::endpoint::RelayEndpoint;

/// Relay capacity reserved by a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub allocation_id: Uuid,
    /// Candidate endpoints in the order the relay offered them
    pub endpoints: Vec<RelayEndpoint>,
    /// Opaque connection data for this allocation
    pub connection_data: Vec<u8>,
    /// Shared HMAC key
    pub key: Vec<u8>,
    /// Remote slots reserved (host excluded)
    pub slots: usize,
}

/// Connection material issued to a joining client for one join code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAllocation {
    pub allocation_id: Uuid,
    pub endpoints: Vec<RelayEndpoint>,
    /// The client's own connection data
    pub connection_data: Vec<u8>,
    /// The host's connection data, supplied by the relay for this join
    pub host_connection_data: Vec<u8>,
    pub key: Vec<u8>,
}

/// Whichever allocation the local process currently holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeldAllocation {
    Host(Allocation),
    Client(JoinAllocation),
}

impl HeldAllocation {
    pub fn allocation_id(&self) -> Uuid {
        match self {
            HeldAllocation::Host(a) => a.allocation_id,
            HeldAllocation::Client(j) => j.allocation_id,
        }
    }
}
