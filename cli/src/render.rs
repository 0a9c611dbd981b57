// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text rendering of sessions and coordinator events for the CLI.

use std::time::Duration;

use roomlink_core::Session;
use roomlink_network::{CoordinatorEvent, Phase, TimerStatus};

/// Render the player list as a small table
pub fn render_roster(session: &Session, local_player_id: Option<&str>) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{} [{}]  {}/{} players\n",
        session.name,
        session.lobby_code,
        session.players.len(),
        session.capacity
    ));

    let width = session
        .players
        .iter()
        .map(|p| p.display_name().unwrap_or(p.id.as_str()).chars().count())
        .max()
        .unwrap_or(0);

    let mut players: Vec<_> = session.players.iter().collect();
    players.sort_by(|a, b| a.id.cmp(&b.id));

    for player in players {
        let name = player.display_name().unwrap_or(player.id.as_str());
        let mut tags = Vec::new();
        if player.id == session.host_id {
            tags.push("host");
        }
        if Some(player.id.as_str()) == local_player_id {
            tags.push("you");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" ({})", tags.join(", "))
        };
        output.push_str(&format!("  {:<width$}  {}{}\n", name, player.id, tags, width = width));
    }

    output
}

fn format_timer(remaining: Option<Duration>) -> String {
    match remaining {
        Some(d) => format!("{:.1}s", d.as_secs_f64()),
        None => "off".to_string(),
    }
}

/// One-line summary of phase, role and countdowns
pub fn render_status(phase: Phase, session: Option<&Session>, is_host: bool, timers: TimerStatus) -> String {
    match (phase, session) {
        (Phase::Active, Some(session)) => format!(
            "{} in '{}' (code {}, v{})  heartbeat {}  poll {}",
            if is_host { "hosting" } else { "member" },
            session.name,
            session.lobby_code,
            session.version,
            format_timer(timers.heartbeat),
            format_timer(timers.poll)
        ),
        (Phase::Establishing, _) => "establishing a session...".to_string(),
        _ => "not in a session".to_string(),
    }
}

pub fn render_event(event: &CoordinatorEvent) -> String {
    match event {
        CoordinatorEvent::RosterChanged(change) => {
            let mut added: Vec<_> = change.added.iter().map(String::as_str).collect();
            let mut removed: Vec<_> = change.removed.iter().map(String::as_str).collect();
            added.sort_unstable();
            removed.sort_unstable();

            let mut parts = Vec::new();
            if !added.is_empty() {
                parts.push(format!("+{}", added.join(" +")));
            }
            if !removed.is_empty() {
                parts.push(format!("-{}", removed.join(" -")));
            }
            format!("roster: {} players {}", change.players.len(), parts.join(" "))
        }
        CoordinatorEvent::NameUpdateRejected { requested, kept } => format!(
            "warning: name '{}' rejected, keeping '{}'",
            requested,
            kept.as_deref().unwrap_or("<none>")
        ),
        CoordinatorEvent::SessionLeft { session_id } => format!("left session {}", session_id),
    }
}
