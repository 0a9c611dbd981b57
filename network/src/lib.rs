// SPDX-License-Identifier: MIT OR Apache-2.0

//! roomlink network - session coordination against remote services
//!
//! This crate provides:
//! - Contracts for the lobby directory, relay, identity and transport
//! - Heartbeat and poll schedulers with in-flight protection
//! - The push-notification bridge feeding the refresh path
//! - `SessionCoordinator`, which ties the above into create / join / leave
//! - In-process service implementations (`memory` feature)

#![deny(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod identity;
#[cfg(feature = "memory")]
pub mod memory;
pub mod push;
pub mod scheduler;
pub mod services;

pub use config::{
    load_config, load_config_from, save_config, CoordinatorConfig, MIN_DRIVER_PERIOD,
};
pub use coordinator::{
    CoordinatorEvent, Phase, Services, SessionCoordinator, TickReport, TimerStatus,
};
pub use identity::LocalIdentity;
pub use push::PushBridge;
pub use scheduler::{Dispatch, HeartbeatScheduler, PollScheduler};
pub use services::{
    CreateSessionOptions, DirectoryService, IdentityProvider, LobbyNotification, RelayService,
    SessionOptions, TransportBootstrap,
};

#[cfg(feature = "memory")]
pub use memory::{
    DirectoryOp, InMemoryDirectory, InMemoryRelay, RecordingTransport, RelayGate, RelayOp,
};
