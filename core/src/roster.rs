// SPDX-License-Identifier: MIT OR Apache-2.0

//! Roster reconciliation
//!
//! Compares membership snapshots by player id only. Field-level changes on a
//! player (a renamed display name, say) do not count as a roster change.

use std::collections::HashSet;

use crate::{Player, PlayerId};

/// Set difference between two membership snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    pub added: HashSet<PlayerId>,
    pub removed: HashSet<PlayerId>,
}

impl RosterDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Emitted when membership differs from the last snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterChange {
    /// Full new player list
    pub players: Vec<Player>,
    pub added: HashSet<PlayerId>,
    pub removed: HashSet<PlayerId>,
}

/// `added = next \ previous`, `removed = previous \ next`
pub fn diff_roster(previous: &HashSet<PlayerId>, next: &HashSet<PlayerId>) -> RosterDiff {
    RosterDiff {
        added: next.difference(previous).cloned().collect(),
        removed: previous.difference(next).cloned().collect(),
    }
}

/// Holds the last-seen id set and turns new player lists into change events
#[derive(Debug, Default)]
pub struct RosterTracker {
    snapshot: HashSet<PlayerId>,
}

impl RosterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &HashSet<PlayerId> {
        &self.snapshot
    }

    /// Replace the snapshot with `players`, returning a change only when the
    /// id sets differ.
    pub fn apply(&mut self, players: &[Player]) -> Option<RosterChange> {
        let next: HashSet<PlayerId> = players.iter().map(|p| p.id.clone()).collect();

        let change = if next == self.snapshot {
            None
        } else {
            let diff = diff_roster(&self.snapshot, &next);
            tracing::debug!(
                added = diff.added.len(),
                removed = diff.removed.len(),
                total = next.len(),
                "Roster changed"
            );
            Some(RosterChange {
                players: players.to_vec(),
                added: diff.added,
                removed: diff.removed,
            })
        };

        self.snapshot = next;
        change
    }

    /// Start from an empty snapshot and always report the initial roster
    pub fn seed(&mut self, players: &[Player]) -> RosterChange {
        self.snapshot.clear();
        let next: HashSet<PlayerId> = players.iter().map(|p| p.id.clone()).collect();
        let change = RosterChange {
            players: players.to_vec(),
            added: next.clone(),
            removed: HashSet::new(),
        };
        self.snapshot = next;
        change
    }

    pub fn clear(&mut self) {
        self.snapshot.clear();
    }
}
