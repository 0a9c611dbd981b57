// SPDX-License-Identifier: MIT OR Apache-2.0

//! Quick roomlink demo - scripted host and two clients
//!
//! Everything runs against in-process services: a host creates a room, one
//! client joins by code, another quick-joins, the host leaves and the role
//! migrates. Set RUST_LOG=debug to watch the schedulers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use roomlink_network::{
    CoordinatorConfig, CoordinatorEvent, InMemoryDirectory, InMemoryRelay, LocalIdentity,
    RecordingTransport, Services, SessionCoordinator,
};
use tracing_subscriber::EnvFilter;

fn coordinator(
    directory: &Arc<InMemoryDirectory>,
    relay: &Arc<InMemoryRelay>,
    id: &str,
    name: &str,
    config: &CoordinatorConfig,
) -> SessionCoordinator {
    let services = Services {
        directory: directory.clone(),
        relay: relay.clone(),
        identity: Arc::new(LocalIdentity::signed_in(id, name)),
        transport: Arc::new(RecordingTransport::new()),
    };
    let coordinator = SessionCoordinator::new(services, config.clone());
    coordinator.spawn_driver();
    coordinator
}

fn watch(label: &'static str, coordinator: &SessionCoordinator) {
    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CoordinatorEvent::RosterChanged(change) => {
                    let mut ids: Vec<_> = change.players.iter().map(|p| p.id.as_str()).collect();
                    ids.sort_unstable();
                    println!("[{}] roster now {:?}", label, ids);
                }
                other => println!("[{}] {:?}", label, other),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Short intervals so the demo shows a few heartbeats and polls
    let config = CoordinatorConfig {
        heartbeat_interval: Duration::from_millis(400),
        poll_interval: Duration::from_millis(900),
        driver_period: Duration::from_millis(50),
        ..CoordinatorConfig::default()
    };

    let directory = Arc::new(InMemoryDirectory::new());
    let relay = Arc::new(InMemoryRelay::new());
    let host = coordinator(&directory, &relay, "host", "Aylin", &config);
    let alice = coordinator(&directory, &relay, "alice", "Deniz", &config);
    let bob = coordinator(&directory, &relay, "bob", "Ece", &config);
    watch("host", &host);
    watch("alice", &alice);

    let session = host.create_session("Demo Room", 4).await?;
    println!("Host created '{}' with lobby code {}", session.name, session.lobby_code);

    alice.join_session_by_code(&session.lobby_code).await?;
    bob.quick_join_session().await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!(
        "Heartbeats so far: {}",
        directory.heartbeat_count(&session.id)
    );

    host.leave_session().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("alice is host: {}, bob is host: {}", alice.is_host(), bob.is_host());

    bob.leave_session().await;
    alice.leave_session().await;
    for c in [&host, &alice, &bob] {
        c.shutdown().await;
    }
    println!("Sessions left in directory: {}", directory.session_count());
    Ok(())
}
