// SPDX-License-Identifier: MIT OR Apache-2.0

mod common;

use std::time::Duration;

use common::{drain_events, wait_for_event, World};
use roomlink_core::{Player, RelayEndpoint, Role, SessionError};
use roomlink_network::{
    CoordinatorEvent, CreateSessionOptions, DirectoryOp, DirectoryService, Dispatch, Phase,
    RelayOp, SessionOptions,
};

#[tokio::test]
async fn test_create_session_arms_both_timers() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");

    let session = host.coordinator.create_session("Arena", 4).await.unwrap();

    assert_eq!(session.host_id, "host-1");
    assert_eq!(session.capacity, 4);
    assert!(session.relay_join_code().is_some());
    assert!(host.coordinator.is_host());
    assert_eq!(host.coordinator.phase(), Phase::Active);

    let timers = host.coordinator.timers();
    assert_eq!(timers.heartbeat, Some(Duration::ZERO));
    assert_eq!(timers.poll, Some(Duration::ZERO));

    // Host reserves one slot fewer than capacity
    let allocation_id = host.coordinator.allocation().unwrap().allocation_id();
    assert_eq!(world.relay.allocation(allocation_id).unwrap().slots, 3);

    let descriptor = host.transport.last_descriptor().unwrap();
    assert_eq!(descriptor.role(), Role::Host);
    assert_eq!(descriptor.connection_data(), descriptor.host_connection_data());
    assert_eq!(host.transport.running(), Some(Role::Host));

    let report = host.coordinator.tick(Duration::ZERO);
    assert_eq!(report.heartbeat, Dispatch::Sent);
    assert_eq!(report.poll, Dispatch::Sent);
    host.coordinator.settle().await;
    assert_eq!(world.directory.heartbeat_count(&session.id), 1);

    // Both countdowns restarted at their full interval
    let timers = host.coordinator.timers();
    assert_eq!(timers.heartbeat, Some(Duration::from_secs(20)));
    assert_eq!(timers.poll, Some(Duration::from_secs(65)));
}

#[tokio::test]
async fn test_directory_create_failure_leaves_nothing_behind() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    world.directory.set_failing(DirectoryOp::Create, true);

    let err = host.coordinator.create_session("Arena", 4).await.unwrap_err();

    assert!(matches!(err, SessionError::ServiceUnavailable(_)));
    assert!(err.is_transient());
    assert_eq!(host.coordinator.phase(), Phase::Idle);
    assert!(host.coordinator.current_session().is_none());
    assert!(host.coordinator.allocation().is_none());
    assert_eq!(host.coordinator.timers().heartbeat, None);
    assert_eq!(host.coordinator.timers().poll, None);
    assert_eq!(host.transport.start_count(), 0);
    assert_eq!(world.directory.session_count(), 0);

    // The coordinator is usable again afterwards
    world.directory.set_failing(DirectoryOp::Create, false);
    host.coordinator.create_session("Arena", 4).await.unwrap();
}

#[tokio::test]
async fn test_failure_after_directory_create_rolls_back() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    world.directory.set_failing(DirectoryOp::UpdateSessionData, true);

    assert!(host.coordinator.create_session("Arena", 4).await.is_err());

    assert_eq!(world.directory.session_count(), 0);
    assert_eq!(host.coordinator.phase(), Phase::Idle);
    assert_eq!(host.transport.start_count(), 0);
}

#[tokio::test]
async fn test_transport_failure_rolls_back_host() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    host.transport.set_failing(true);

    let err = host.coordinator.create_session("Arena", 4).await.unwrap_err();

    assert!(matches!(err, SessionError::TransportFailed(_)));
    assert_eq!(world.directory.session_count(), 0);
    assert!(host.coordinator.descriptor().is_none());
}

#[tokio::test]
async fn test_no_matching_endpoint_stops_before_directory() {
    let world = World::with_relay(roomlink_network::InMemoryRelay::with_endpoints(vec![
        RelayEndpoint::new("127.0.0.1", 7777, "udp", false),
        RelayEndpoint::new("127.0.0.1", 443, "wss", true),
    ]));
    let host = world.peer("host-1", "Aylin");

    let err = host.coordinator.create_session("Arena", 4).await.unwrap_err();

    assert!(matches!(err, SessionError::NoMatchingEndpoint { .. }));
    assert_eq!(world.directory.session_count(), 0);
    assert_eq!(host.transport.start_count(), 0);
    assert_eq!(host.coordinator.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_create_requires_sign_in() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let anonymous = world.anonymous_peer().coordinator;

    assert_eq!(
        anonymous.create_session("Arena", 4).await,
        Err(SessionError::NotSignedIn)
    );
    let name = anonymous.sign_in(Some("Deniz")).await.unwrap();
    assert_eq!(name, "Deniz");
    anonymous.create_session("Arena", 4).await.unwrap();

    // Unrelated peer unaffected
    assert_eq!(host.coordinator.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_join_by_code_hands_client_descriptor() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let client = world.peer("client-1", "Deniz");

    let created = host.coordinator.create_session("Arena", 4).await.unwrap();
    let joined = client
        .coordinator
        .join_session_by_code(&created.lobby_code.to_lowercase())
        .await
        .unwrap();

    assert_eq!(joined.id, created.id);
    assert!(joined.has_player("client-1"));
    assert!(!client.coordinator.is_host());

    let host_descriptor = host.transport.last_descriptor().unwrap();
    let client_descriptor = client.transport.last_descriptor().unwrap();
    assert_eq!(client_descriptor.role(), Role::Client);
    assert_eq!(
        client_descriptor.host_connection_data(),
        host_descriptor.connection_data()
    );
    assert_eq!(client_descriptor.key(), host_descriptor.key());
    assert_eq!(client_descriptor.endpoint().connection_type, "dtls");
}

#[tokio::test]
async fn test_relay_join_failure_rolls_back_directory_membership() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let client = world.peer("client-1", "Deniz");

    let created = host.coordinator.create_session("Arena", 4).await.unwrap();
    world.relay.set_failing(RelayOp::JoinAllocation, true);

    let err = client
        .coordinator
        .join_session_by_code(&created.lobby_code)
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::ServiceUnavailable(_)));
    assert_eq!(client.coordinator.phase(), Phase::Idle);
    assert!(client.coordinator.current_session().is_none());
    assert_eq!(client.transport.start_count(), 0);

    let record = world.directory.peek(&created.id).unwrap();
    assert!(!record.has_player("client-1"));
    assert_eq!(record.players.len(), 1);
}

#[tokio::test]
async fn test_missing_relay_join_code() {
    let world = World::new();
    let client = world.peer("client-1", "Deniz");

    // A session created straight in the directory never got a relay code
    let bare = world
        .directory
        .create_session(
            "Bare",
            4,
            CreateSessionOptions {
                options: SessionOptions::default(),
                player: Player::new("someone", "Someone"),
            },
        )
        .await
        .unwrap();

    let err = client
        .coordinator
        .join_session_by_code(&bare.lobby_code)
        .await
        .unwrap_err();

    assert_eq!(err, SessionError::MissingRelayJoinCode);
    assert!(!world.directory.peek(&bare.id).unwrap().has_player("client-1"));
    assert_eq!(world.relay.join_count(), 0);
}

#[tokio::test]
async fn test_full_session_rejects_join() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let first = world.peer("client-1", "Deniz");
    let second = world.peer("client-2", "Ece");

    let created = host.coordinator.create_session("Duel", 2).await.unwrap();
    first.coordinator.join_session_by_code(&created.lobby_code).await.unwrap();

    assert_eq!(
        second.coordinator.join_session_by_code(&created.lobby_code).await,
        Err(SessionError::SessionFull)
    );
}

#[tokio::test]
async fn test_quick_join_skips_private_sessions() {
    let world = World::new();
    let private_host = world.peer("host-1", "Aylin");
    let public_host = world.peer("host-2", "Baran");
    let client = world.peer("client-1", "Deniz");

    private_host
        .coordinator
        .create_session_with(
            "Hidden",
            4,
            SessionOptions {
                is_private: true,
                ..SessionOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        client.coordinator.quick_join_session().await,
        Err(SessionError::SessionNotFound(_))
    ));

    let open = public_host.coordinator.create_session("Open", 4).await.unwrap();
    let joined = client.coordinator.quick_join_session().await.unwrap();
    assert_eq!(joined.id, open.id);
}

#[tokio::test]
async fn test_client_heartbeat_stays_disarmed_until_host_migrates() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let client = world.peer("client-1", "Deniz");

    let created = host.coordinator.create_session("Arena", 4).await.unwrap();
    client.coordinator.join_session_by_code(&created.lobby_code).await.unwrap();

    assert_eq!(client.coordinator.timers().heartbeat, None);
    assert_eq!(client.coordinator.timers().poll, Some(Duration::ZERO));
    let report = client.coordinator.tick(Duration::from_secs(600));
    assert_eq!(report.heartbeat, Dispatch::Disarmed);
    assert_eq!(report.poll, Dispatch::Sent);
    client.coordinator.settle().await;

    world.directory.transfer_host(&created.id, "client-1").unwrap();
    client.coordinator.refresh_now().await.unwrap();

    assert!(client.coordinator.is_host());
    assert_eq!(client.coordinator.timers().heartbeat, Some(Duration::ZERO));
    assert_eq!(client.coordinator.tick(Duration::ZERO).heartbeat, Dispatch::Sent);
    client.coordinator.settle().await;
    assert!(world.directory.heartbeat_count(&created.id) >= 1);

    host.coordinator.refresh_now().await.unwrap();
    assert!(!host.coordinator.is_host());
    assert_eq!(host.coordinator.timers().heartbeat, None);
}

#[tokio::test]
async fn test_host_leaving_migrates_role() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let client = world.peer("client-1", "Deniz");

    let created = host.coordinator.create_session("Arena", 4).await.unwrap();
    client.coordinator.join_session_by_code(&created.lobby_code).await.unwrap();

    host.coordinator.leave_session().await;
    client.coordinator.refresh_now().await.unwrap();

    assert!(client.coordinator.is_host());
    let session = client.coordinator.current_session().unwrap();
    assert_eq!(session.players.len(), 1);
}

#[tokio::test]
async fn test_push_notification_reports_new_member() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let client = world.peer("client-1", "Deniz");

    let created = host.coordinator.create_session("Arena", 4).await.unwrap();
    let mut events = host.coordinator.subscribe();

    client.coordinator.join_session_by_code(&created.lobby_code).await.unwrap();

    let event = wait_for_event(&mut events, |e| matches!(e, CoordinatorEvent::RosterChanged(_)))
        .await
        .expect("roster change after push");
    let CoordinatorEvent::RosterChanged(change) = event else {
        unreachable!()
    };
    assert!(change.added.contains("client-1"));
    assert!(change.removed.is_empty());
    assert_eq!(change.players.len(), 2);
}

#[tokio::test]
async fn test_leaving_member_is_reported() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let client = world.peer("client-1", "Deniz");

    let created = host.coordinator.create_session("Arena", 4).await.unwrap();
    client.coordinator.join_session_by_code(&created.lobby_code).await.unwrap();
    host.coordinator.refresh_now().await.unwrap();
    let mut events = host.coordinator.subscribe();

    client.coordinator.leave_session().await;

    let event = wait_for_event(&mut events, |e| matches!(e, CoordinatorEvent::RosterChanged(_)))
        .await
        .expect("roster change after leave");
    let CoordinatorEvent::RosterChanged(change) = event else {
        unreachable!()
    };
    assert!(change.removed.contains("client-1"));
    assert_eq!(change.players.len(), 1);
}

#[tokio::test]
async fn test_field_only_change_emits_no_roster_event() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");

    let created = host.coordinator.create_session("Arena", 4).await.unwrap();
    let mut events = host.coordinator.subscribe();

    world.directory.rename_silently(&created.id, "host-1", "Renamed").unwrap();
    host.coordinator.refresh_now().await.unwrap();

    let session = host.coordinator.current_session().unwrap();
    assert_eq!(session.player("host-1").unwrap().display_name(), Some("Renamed"));
    assert!(drain_events(&mut events)
        .iter()
        .all(|e| !matches!(e, CoordinatorEvent::RosterChanged(_))));
}

#[tokio::test]
async fn test_slow_poll_is_not_overlapped() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    host.coordinator.create_session("Arena", 4).await.unwrap();
    world.directory.set_read_latency(Duration::from_millis(200));

    assert_eq!(host.coordinator.tick(Duration::ZERO).poll, Dispatch::Sent);
    assert_eq!(
        host.coordinator.tick(Duration::from_secs(65)).poll,
        Dispatch::SkippedInFlight
    );

    host.coordinator.settle().await;
    assert_eq!(host.coordinator.tick(Duration::from_secs(65)).poll, Dispatch::Sent);
}

#[tokio::test]
async fn test_failed_heartbeat_keeps_schedule() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let created = host.coordinator.create_session("Arena", 4).await.unwrap();
    world.directory.set_failing(DirectoryOp::Heartbeat, true);

    assert_eq!(host.coordinator.tick(Duration::ZERO).heartbeat, Dispatch::Sent);
    host.coordinator.settle().await;
    assert_eq!(world.directory.heartbeat_count(&created.id), 0);

    world.directory.set_failing(DirectoryOp::Heartbeat, false);
    assert_eq!(
        host.coordinator.tick(Duration::from_secs(20)).heartbeat,
        Dispatch::Sent
    );
    host.coordinator.settle().await;
    assert_eq!(world.directory.heartbeat_count(&created.id), 1);
}

#[tokio::test]
async fn test_leave_tears_everything_down() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let created = host.coordinator.create_session("Arena", 4).await.unwrap();
    let mut events = host.coordinator.subscribe();

    host.coordinator.leave_session().await;

    assert_eq!(host.coordinator.phase(), Phase::Idle);
    assert!(host.coordinator.current_session().is_none());
    assert!(host.coordinator.allocation().is_none());
    assert!(host.coordinator.descriptor().is_none());
    assert_eq!(host.coordinator.timers().heartbeat, None);
    assert_eq!(host.coordinator.timers().poll, None);
    assert_eq!(host.transport.running(), None);
    assert_eq!(host.transport.shutdown_count(), 1);
    assert!(world.directory.peek(&created.id).is_none());

    let left = wait_for_event(&mut events, |e| matches!(e, CoordinatorEvent::SessionLeft { .. }))
        .await
        .expect("session left event");
    assert!(matches!(left, CoordinatorEvent::SessionLeft { session_id } if session_id == created.id));

    let report = host.coordinator.tick(Duration::from_secs(3600));
    assert_eq!(report.heartbeat, Dispatch::Disarmed);
    assert_eq!(report.poll, Dispatch::Disarmed);

    // Leaving twice is harmless
    host.coordinator.leave_session().await;
    assert_eq!(host.transport.shutdown_count(), 1);
}

#[tokio::test]
async fn test_leave_aborts_in_flight_poll() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    host.coordinator.create_session("Arena", 4).await.unwrap();
    world.directory.set_read_latency(Duration::from_secs(3600));

    assert_eq!(host.coordinator.tick(Duration::ZERO).poll, Dispatch::Sent);
    host.coordinator.leave_session().await;

    // Nothing left to wait on
    tokio::time::timeout(Duration::from_secs(1), host.coordinator.settle())
        .await
        .unwrap();
    assert!(host.coordinator.current_session().is_none());
}

#[tokio::test]
async fn test_rejected_rename_keeps_previous_name() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let mut events = host.coordinator.subscribe();
    host.identity.set_reject_renames(true);

    let kept = host.coordinator.set_display_name("Deniz").await.unwrap();

    assert_eq!(kept, "Aylin");
    let event = wait_for_event(&mut events, |e| {
        matches!(e, CoordinatorEvent::NameUpdateRejected { .. })
    })
    .await
    .unwrap();
    match event {
        CoordinatorEvent::NameUpdateRejected { requested, kept } => {
            assert_eq!(requested, "Deniz");
            assert_eq!(kept.as_deref(), Some("Aylin"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_rename_in_session_updates_directory() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let created = host.coordinator.create_session("Arena", 4).await.unwrap();

    let applied = host.coordinator.set_display_name("  Deniz ").await.unwrap();
    assert_eq!(applied, "Deniz");

    let record = world.directory.peek(&created.id).unwrap();
    assert_eq!(record.player("host-1").unwrap().display_name(), Some("Deniz"));
    let local = host.coordinator.current_session().unwrap();
    assert_eq!(local.player("host-1").unwrap().display_name(), Some("Deniz"));
}

#[tokio::test]
async fn test_refresh_failure_keeps_session() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    host.coordinator.create_session("Arena", 4).await.unwrap();
    world.directory.set_failing(DirectoryOp::GetSession, true);

    assert!(host.coordinator.refresh_now().await.is_err());
    assert_eq!(host.coordinator.phase(), Phase::Active);
    assert!(host.coordinator.current_session().is_some());

    world.directory.set_failing(DirectoryOp::GetSession, false);
    host.coordinator.refresh_now().await.unwrap();
}

#[tokio::test]
async fn test_refresh_requires_session() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    assert_eq!(host.coordinator.refresh_now().await, Err(SessionError::NotInSession));
}

#[tokio::test(start_paused = true)]
async fn test_driver_sends_heartbeats_on_schedule() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let created = host.coordinator.create_session("Arena", 4).await.unwrap();

    host.coordinator.spawn_driver();
    tokio::time::sleep(Duration::from_secs(61)).await;

    // t = 0, 20, 40, 60
    assert!(world.directory.heartbeat_count(&created.id) >= 3);

    host.coordinator.shutdown().await;
    assert_eq!(host.coordinator.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_zero_driver_period_still_drives() {
    let mut world = World::new();
    world.config.driver_period = Duration::ZERO;
    let host = world.peer("host-1", "Aylin");
    let created = host.coordinator.create_session("Arena", 4).await.unwrap();

    host.coordinator.spawn_driver();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(world.directory.heartbeat_count(&created.id), 1);
    assert!(world.directory.read_count() >= 1);

    host.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_leaving_while_creating_cancels_establishment() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let gate = world.relay.hold_next(RelayOp::CreateAllocation);

    let creating = tokio::spawn({
        let coordinator = host.coordinator.clone();
        async move { coordinator.create_session("Arena", 4).await }
    });
    gate.reached().await;
    assert_eq!(host.coordinator.phase(), Phase::Establishing);

    host.coordinator.leave_session().await;
    gate.release();

    assert_eq!(creating.await.unwrap(), Err(SessionError::NotInSession));
    assert_eq!(host.coordinator.phase(), Phase::Idle);
    assert!(host.coordinator.current_session().is_none());
    assert!(host.coordinator.descriptor().is_none());
    assert_eq!(host.coordinator.timers().heartbeat, None);
    assert_eq!(host.coordinator.timers().poll, None);
    assert_eq!(host.transport.start_count(), 0);
    assert_eq!(host.transport.shutdown_count(), 0);
    assert_eq!(world.directory.session_count(), 0);

    let report = host.coordinator.tick(Duration::from_secs(3600));
    assert_eq!(report.heartbeat, Dispatch::Disarmed);
    assert_eq!(report.poll, Dispatch::Disarmed);
}

#[tokio::test]
async fn test_leaving_while_joining_drops_directory_membership() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let client = world.peer("client-1", "Deniz");
    let created = host.coordinator.create_session("Arena", 4).await.unwrap();
    let gate = world.relay.hold_next(RelayOp::JoinAllocation);

    let joining = tokio::spawn({
        let coordinator = client.coordinator.clone();
        let code = created.lobby_code.clone();
        async move { coordinator.join_session_by_code(&code).await }
    });
    gate.reached().await;
    // The directory already lists the client
    assert!(world.directory.peek(&created.id).unwrap().has_player("client-1"));

    client.coordinator.leave_session().await;
    gate.release();

    assert_eq!(joining.await.unwrap(), Err(SessionError::NotInSession));
    assert_eq!(client.coordinator.phase(), Phase::Idle);
    assert!(client.coordinator.current_session().is_none());
    assert_eq!(client.coordinator.timers().heartbeat, None);
    assert_eq!(client.coordinator.timers().poll, None);
    assert_eq!(client.transport.start_count(), 0);

    let record = world.directory.peek(&created.id).unwrap();
    assert!(!record.has_player("client-1"));
    assert_eq!(record.host_id, "host-1");
    assert_eq!(host.coordinator.phase(), Phase::Active);
}

#[tokio::test]
async fn test_stale_establishment_keeps_newer_transport_running() {
    let world = World::new();
    let host = world.peer("host-1", "Aylin");
    let gate = world.relay.hold_next(RelayOp::CreateAllocation);

    let old = tokio::spawn({
        let coordinator = host.coordinator.clone();
        async move { coordinator.create_session("Old", 4).await }
    });
    gate.reached().await;
    host.coordinator.leave_session().await;

    let new = host.coordinator.create_session("New", 4).await.unwrap();
    assert_eq!(host.transport.running(), Some(Role::Host));

    gate.release();
    assert_eq!(old.await.unwrap(), Err(SessionError::NotInSession));

    assert_eq!(host.transport.running(), Some(Role::Host));
    assert_eq!(host.transport.start_count(), 1);
    assert_eq!(host.transport.shutdown_count(), 0);
    assert_eq!(host.coordinator.phase(), Phase::Active);
    assert_eq!(host.coordinator.current_session().unwrap().id, new.id);
    assert_eq!(host.coordinator.timers().heartbeat, Some(Duration::ZERO));
    assert_eq!(host.coordinator.timers().poll, Some(Duration::ZERO));

    // The abandoned "Old" record is gone from the directory
    assert_eq!(world.directory.session_count(), 1);
    assert!(world.directory.peek(&new.id).is_some());
}
