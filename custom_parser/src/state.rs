use ahash::AHashMap as HashMap;
use log::trace;

use crate::{
    bombsite::BoundingBoxInformation,
    common::{Team, Vector},
    equipment::{new_weapon_arena, Equipment, EquipmentElement},
    error::{check_capacity, Result},
    player::{AdditionalPlayerInformation, Player, PlayerInfo},
    team::{PendingTeam, TeamState},
    MAX_ENTITIES, MAX_PLAYERS, MAX_WEAPONS,
};

/// Reconstructed match state. Every table is fixed-size and indexed by a
/// validated slot or entity id.
#[derive(Debug, Clone)]
pub struct GameState {
    /// Indexed by entity id - 1.
    pub players: Vec<Option<Player>>,
    /// `userinfo` records, indexed by string table slot.
    pub raw_players: Vec<Option<PlayerInfo>>,
    /// Indexed by entity id.
    pub additional_player_info: Vec<AdditionalPlayerInformation>,
    /// Indexed by entity id.
    pub weapons: Vec<Equipment>,

    pub t_state: TeamState,
    pub ct_state: TeamState,

    pub bombsite_a: Vector,
    pub bombsite_b: Vector,
    /// Keyed by entity id.
    pub triggers: HashMap<i32, BoundingBoxInformation>,

    pub model_precache: Vec<String>,
    /// Weapon identity per server class index.
    pub equipment_mapping: HashMap<usize, EquipmentElement>,

    pub(crate) pending_teams: HashMap<i32, PendingTeam>,
    pub(crate) weapon_prefix: Option<&'static str>,
    connected: Vec<bool>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    pub fn new() -> Self {
        Self {
            players: vec![None; MAX_PLAYERS],
            raw_players: vec![None; MAX_PLAYERS],
            additional_player_info: vec![AdditionalPlayerInformation::default(); MAX_PLAYERS + 1],
            weapons: new_weapon_arena(),
            t_state: TeamState::default(),
            ct_state: TeamState::default(),
            bombsite_a: Vector::ZERO,
            bombsite_b: Vector::ZERO,
            triggers: HashMap::new(),
            model_precache: Vec::new(),
            equipment_mapping: HashMap::new(),
            pending_teams: HashMap::new(),
            weapon_prefix: None,
            connected: vec![false; MAX_PLAYERS],
        }
    }

    pub fn player(&self, slot: usize) -> Option<&Player> {
        self.players.get(slot).and_then(Option::as_ref)
    }

    /// Players that currently exist, in slot order.
    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().flatten()
    }

    pub fn player_mut(&mut self, slot: usize) -> Result<&mut Option<Player>> {
        let slot = check_capacity("player", slot as i64, MAX_PLAYERS)?;
        Ok(&mut self.players[slot])
    }

    pub fn weapon_mut(&mut self, entity_id: i64) -> Result<&mut Equipment> {
        let idx = check_capacity("weapon", entity_id, MAX_ENTITIES)?;
        Ok(&mut self.weapons[idx])
    }

    pub fn team_state_mut(&mut self, team: Team) -> Option<&mut TeamState> {
        match team {
            Team::Terrorists => Some(&mut self.t_state),
            Team::CounterTerrorists => Some(&mut self.ct_state),
            _ => None,
        }
    }

    pub fn is_connected(&self, slot: usize) -> bool {
        self.connected.get(slot).copied().unwrap_or(false)
    }

    /// Empties a weapon slot of a player, dropping the back-reference of the
    /// previous occupant if it still points at this player.
    pub fn clear_weapon_slot(&mut self, player: usize, slot: usize) -> Result<()> {
        let slot = check_capacity("weapon slot", slot as i64, MAX_WEAPONS)?;
        let previous = match self.player_mut(player)? {
            Some(pl) => pl.weapon_slots[slot].take(),
            None => None,
        };

        if let Some(prev) = previous {
            let eq = self.weapon_mut(prev as i64)?;
            if eq.owner == Some(player) {
                eq.owner = None;
            }
        }
        Ok(())
    }

    /// Puts a weapon into a player's slot. The slot is cleared first and the
    /// weapon is taken away from any slot it occupied before.
    pub fn attribute_weapon(&mut self, player: usize, slot: usize, weapon: usize) -> Result<()> {
        self.clear_weapon_slot(player, slot)?;
        let weapon = check_capacity("weapon", weapon as i64, MAX_ENTITIES)?;

        if let Some(prev_owner) = self.weapons[weapon].owner {
            if let Some(Some(pl)) = self.players.get_mut(prev_owner) {
                for occupant in pl.weapon_slots.iter_mut() {
                    if *occupant == Some(weapon) {
                        *occupant = None;
                    }
                }
            }
        }

        self.weapons[weapon].owner = Some(player);
        if let Some(pl) = self.player_mut(player)? {
            pl.weapon_slots[slot] = Some(weapon);
        }
        trace!("player {player} slot {slot} <- weapon {weapon}");
        Ok(())
    }

    /// Merges `userinfo` records into the live players. Returns the slots that
    /// became connected during this call.
    pub fn reconcile_players(&mut self) -> Vec<usize> {
        let mut newly_connected = Vec::new();
        let info_len = self.additional_player_info.len();
        for (slot, raw) in self.raw_players.iter().enumerate() {
            let (Some(raw), Some(pl)) = (raw, self.players[slot].as_mut()) else {
                continue;
            };

            pl.name = raw.name.clone();
            pl.steam_id = raw.xuid;
            pl.is_bot = raw.is_fake_player;
            pl.additional_info = usize::try_from(pl.entity_id)
                .ok()
                .filter(|idx| *idx < info_len);

            if pl.is_alive() {
                pl.last_alive_position = pl.position;
            }

            if pl.steam_id != 0 && !self.connected[slot] {
                self.connected[slot] = true;
                newly_connected.push(slot);
            }
        }
        newly_connected
    }
}
