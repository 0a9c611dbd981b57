// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common utilities for roomlink integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use roomlink_network::{
    CoordinatorConfig, CoordinatorEvent, InMemoryDirectory, InMemoryRelay, LocalIdentity,
    RecordingTransport, Services, SessionCoordinator,
};
use tokio::sync::broadcast;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// One player's coordinator plus handles on its in-process services
pub struct Peer {
    pub coordinator: SessionCoordinator,
    pub identity: Arc<LocalIdentity>,
    pub transport: Arc<RecordingTransport>,
}

impl Peer {
    pub fn id(&self) -> String {
        use roomlink_network::IdentityProvider;
        self.identity.local_player_id().unwrap_or_default()
    }
}

/// Directory and relay shared by every peer of a test
pub struct World {
    pub directory: Arc<InMemoryDirectory>,
    pub relay: Arc<InMemoryRelay>,
    pub config: CoordinatorConfig,
}

impl World {
    pub fn new() -> Self {
        Self::with_relay(InMemoryRelay::new())
    }

    pub fn with_relay(relay: InMemoryRelay) -> Self {
        init_logging();
        Self {
            directory: Arc::new(InMemoryDirectory::new()),
            relay: Arc::new(relay),
            config: CoordinatorConfig::default(),
        }
    }

    pub fn peer(&self, id: &str, name: &str) -> Peer {
        self.peer_with(Arc::new(LocalIdentity::signed_in(id, name)))
    }

    /// Peer that has not signed in yet
    pub fn anonymous_peer(&self) -> Peer {
        self.peer_with(Arc::new(LocalIdentity::new()))
    }

    fn peer_with(&self, identity: Arc<LocalIdentity>) -> Peer {
        let transport = Arc::new(RecordingTransport::new());
        let services = Services {
            directory: self.directory.clone(),
            relay: self.relay.clone(),
            identity: identity.clone(),
            transport: transport.clone(),
        };
        Peer {
            coordinator: SessionCoordinator::new(services, self.config.clone()),
            identity,
            transport,
        }
    }
}

/// Wait for the first event matching `pred`, skipping others
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<CoordinatorEvent>,
    mut pred: F,
) -> Option<CoordinatorEvent>
where
    F: FnMut(&CoordinatorEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Drain whatever is queued right now
pub fn drain_events(rx: &mut broadcast::Receiver<CoordinatorEvent>) -> Vec<CoordinatorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
