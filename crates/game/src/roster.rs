use std::collections::HashMap;

use glam::Vec2;

use crate::color::Rgb;
use crate::net::PlayerEntry;

/// Last known state of one other player.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub id: String,
    pub name: String,
    pub color: Rgb,
    pub position: Vec2,
    pub map_id: String,
    /// Cleared when a snapshot pass begins; entries still cleared at the
    /// end of the pass are treated as departed and pruned.
    pub alive: bool,
}

impl From<PlayerEntry> for RemotePlayer {
    fn from(entry: PlayerEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name,
            color: entry.color,
            position: entry.position,
            map_id: entry.map_id,
            alive: true,
        }
    }
}

/// What applying a full snapshot changed.
#[derive(Debug, Default)]
pub struct SnapshotOutcome {
    /// Authoritative position for the local player, when the snapshot
    /// carried one. Never stored in the roster.
    pub local_position: Option<Vec2>,
    /// Ids that were known but absent from the snapshot.
    pub removed: Vec<String>,
    pub changed: bool,
}

/// Routing verdict for a single-player position report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionOutcome {
    Remote,
    Local,
    /// Id we have no snapshot entry for; the report is dropped rather
    /// than creating a ghost.
    Unknown,
}

/// The set of other players currently known, keyed by id. The local
/// player is deliberately excluded; their entries are routed back to
/// the caller instead.
#[derive(Debug, Default)]
pub struct Roster {
    players: HashMap<String, RemotePlayer>,
}

impl Roster {
    /// Reconciles a full snapshot: upserts every entry and prunes ids
    /// the snapshot no longer mentions. Absence means the player left,
    /// not that they idle.
    pub fn apply_snapshot(
        &mut self,
        entries: Vec<PlayerEntry>,
        local_id: Option<&str>,
    ) -> SnapshotOutcome {
        let mut outcome = SnapshotOutcome::default();
        for player in self.players.values_mut() {
            player.alive = false;
        }
        for entry in entries {
            if local_id.is_some_and(|id| id == entry.id) {
                outcome.local_position = Some(entry.position);
                continue;
            }
            match self.players.get_mut(&entry.id) {
                Some(player) => {
                    player.alive = true;
                    if player.name != entry.name
                        || player.color != entry.color
                        || player.position != entry.position
                        || player.map_id != entry.map_id
                    {
                        player.name = entry.name;
                        player.color = entry.color;
                        player.position = entry.position;
                        player.map_id = entry.map_id;
                        outcome.changed = true;
                    }
                }
                None => {
                    self.players
                        .insert(entry.id.clone(), RemotePlayer::from(entry));
                    outcome.changed = true;
                }
            }
        }
        outcome.removed = self
            .players
            .iter()
            .filter(|(_, player)| !player.alive)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &outcome.removed {
            self.players.remove(id);
        }
        if !outcome.removed.is_empty() {
            outcome.changed = true;
        }
        outcome
    }

    /// Applies a single-player position report.
    pub fn apply_position_delta(
        &mut self,
        id: &str,
        position: Vec2,
        local_id: Option<&str>,
    ) -> PositionOutcome {
        if local_id.is_some_and(|local| local == id) {
            return PositionOutcome::Local;
        }
        match self.players.get_mut(id) {
            Some(player) => {
                player.position = position;
                PositionOutcome::Remote
            }
            None => PositionOutcome::Unknown,
        }
    }

    pub fn get(&self, id: &str) -> Option<&RemotePlayer> {
        self.players.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }
}
