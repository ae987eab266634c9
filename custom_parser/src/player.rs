use custom_bitreader::{BitReader, BitWriter};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    common::{Team, Vector},
    error::{check_capacity, Result},
    serverclass::ServerClasses,
    state::GameState,
    subscription::{BindingContext, Subscriptions},
    INDEX_MASK, MAX_AMMO, MAX_PLAYERS, MAX_WEAPONS,
};

pub const PLAYER_NAME_MAX_LENGTH: usize = 128;
pub const GUID_LENGTH: usize = 33;
pub const PLAYER_INFO_LENGTH: usize = 335;

const WEAPON_PREFIX: &str = "m_hMyWeapons.";
const NON_LOCAL_WEAPON_PREFIX: &str = "bcc_nonlocaldata.m_hMyWeapons.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub steam_id: u64,
    pub is_bot: bool,
    pub entity_id: i32,

    pub position: Vector,
    pub last_alive_position: Vector,
    pub velocity: Vector,

    pub team_id: i32,
    pub team: Team,

    pub hp: i32,
    pub armor: i32,
    pub has_defuse_kit: bool,
    pub has_helmet: bool,
    pub is_ducking: bool,
    pub money: i32,

    pub view_direction_x: f64,
    pub view_direction_y: f64,
    pub flash_duration: f64,

    pub current_equipment_value: i32,
    pub round_start_equipment_value: i32,
    pub freezetime_end_equipment_value: i32,

    pub active_weapon_id: i32,
    pub ammo_left: Vec<i32>,
    /// Entity ids of the weapons held, by slot.
    pub weapon_slots: Vec<Option<usize>>,
    /// Index into the additional info table.
    pub additional_info: Option<usize>,
}

impl Player {
    pub fn new(entity_id: i32) -> Self {
        Self {
            name: "unconnected".to_string(),
            steam_id: 0,
            is_bot: false,
            entity_id,
            position: Vector::ZERO,
            last_alive_position: Vector::ZERO,
            velocity: Vector::ZERO,
            team_id: -1,
            team: Team::default(),
            hp: 0,
            armor: 0,
            has_defuse_kit: false,
            has_helmet: false,
            is_ducking: false,
            money: 0,
            view_direction_x: 0.0,
            view_direction_y: 0.0,
            flash_duration: 0.0,
            current_equipment_value: 0,
            round_start_equipment_value: 0,
            freezetime_end_equipment_value: 0,
            active_weapon_id: 0,
            ammo_left: vec![0; MAX_AMMO],
            weapon_slots: vec![None; MAX_WEAPONS],
            additional_info: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }
}

/// Scoreboard data kept by the player resource entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalPlayerInformation {
    pub clan_tag: String,
    pub ping: i32,
    pub score: i32,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    pub mvps: i32,
    pub total_cash_spent: i32,
}

/// A `userinfo` string table record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub version: u64,
    pub xuid: u64,
    pub name: String,
    pub user_id: u32,
    pub guid: String,
    pub friends_id: u32,
    pub friends_name: String,
    pub is_fake_player: bool,
    pub is_hltv: bool,
    pub custom_files: [u32; 4],
    pub files_downloaded: u8,
}

impl PlayerInfo {
    /// Decodes the fixed-size record. Multi-byte integers are big-endian.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut br = BitReader::new(bytes);

        let version = read_u64(&mut br)?;
        let xuid = read_u64(&mut br)?;
        let name = br.read_cstring(PLAYER_NAME_MAX_LENGTH)?;
        let user_id = read_u32(&mut br)?;
        let guid = br.read_cstring(GUID_LENGTH)?;
        br.skip(24)?;
        let friends_id = read_u32(&mut br)?;
        let friends_name = br.read_cstring(PLAYER_NAME_MAX_LENGTH)?;
        let is_fake_player = br.read_single_byte()? != 0;
        let is_hltv = br.read_single_byte()? != 0;

        let mut custom_files = [0; 4];
        for crc in custom_files.iter_mut() {
            *crc = br.read_int(32)?;
        }
        let files_downloaded = br.read_single_byte()?;

        Ok(Self {
            version,
            xuid,
            name,
            user_id,
            guid,
            friends_id,
            friends_name,
            is_fake_player,
            is_hltv,
            custom_files,
            files_downloaded,
        })
    }

    pub fn write(&self, w: &mut BitWriter) {
        w.write_bytes(&self.version.to_be_bytes());
        w.write_bytes(&self.xuid.to_be_bytes());
        w.write_cstring(&self.name, PLAYER_NAME_MAX_LENGTH);
        w.write_bytes(&self.user_id.to_be_bytes());
        w.write_cstring(&self.guid, GUID_LENGTH);
        w.write_bytes(&[0; 3]);
        w.write_bytes(&self.friends_id.to_be_bytes());
        w.write_cstring(&self.friends_name, PLAYER_NAME_MAX_LENGTH);
        w.write_single_byte(self.is_fake_player as u8);
        w.write_single_byte(self.is_hltv as u8);
        for crc in self.custom_files {
            w.write_int(crc, 32);
        }
        w.write_single_byte(self.files_downloaded);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        self.write(&mut w);
        w.into_bytes()
    }
}

fn read_u64(br: &mut BitReader<'_>) -> Result<u64> {
    let mut buf = [0; 8];
    br.read_bytes_into(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

fn read_u32(br: &mut BitReader<'_>) -> Result<u32> {
    let mut buf = [0; 4];
    br.read_bytes_into(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub(crate) fn bind_players(classes: &ServerClasses, subs: &mut Subscriptions) {
    match classes.find_by_name("CCSPlayer") {
        Some(idx) => subs.on_created(idx, bind_new_player),
        None => debug!("no CCSPlayer class, players stay unbound"),
    }
    if let Some(idx) = classes.find_by_name("CCSPlayerResource") {
        subs.on_created(idx, bind_player_resource);
    }
}

fn player_slot(entity_id: i32) -> Result<usize> {
    check_capacity("player", entity_id as i64 - 1, MAX_PLAYERS)
}

fn player_entry(state: &mut GameState, entity_id: i32) -> Result<Option<&mut Player>> {
    Ok(state.player_mut(player_slot(entity_id)?)?.as_mut())
}

fn set_int(ctx: &mut BindingContext<'_>, prop: &str, setter: fn(&mut Player, i32)) {
    ctx.on_update(prop, move |ctx, u| {
        if let Some(pl) = player_entry(ctx.state, u.entity_id)? {
            setter(pl, u.int()?);
        }
        Ok(())
    });
}

fn set_float(ctx: &mut BindingContext<'_>, prop: &str, setter: fn(&mut Player, f64)) {
    ctx.on_update(prop, move |ctx, u| {
        if let Some(pl) = player_entry(ctx.state, u.entity_id)? {
            setter(pl, u.float()?);
        }
        Ok(())
    });
}

fn bind_new_player(ctx: &mut BindingContext<'_>) -> Result<()> {
    let slot = player_slot(ctx.entity_id)?;
    let entity_id = ctx.entity_id;
    let entry = ctx.state.player_mut(slot)?;
    match entry {
        Some(pl) => pl.entity_id = entity_id,
        None => *entry = Some(Player::new(entity_id)),
    }
    // A re-created entity starts with empty slots.
    for weapon_slot in 0..MAX_WEAPONS {
        ctx.state.clear_weapon_slot(slot, weapon_slot)?;
    }

    ctx.on_update("cslocaldata.m_vecOrigin", |ctx, u| {
        if let Some(pl) = player_entry(ctx.state, u.entity_id)? {
            let v = u.vector()?;
            pl.position.x = v.x;
            pl.position.y = v.y;
        }
        Ok(())
    });
    set_float(ctx, "cslocaldata.m_vecOrigin[2]", |pl, v| pl.position.z = v);

    ctx.on_update("m_iTeamNum", |ctx, u| {
        let team_id = u.int()?;
        let team = if team_id == ctx.state.ct_state.id {
            Team::CounterTerrorists
        } else if team_id == ctx.state.t_state.id {
            Team::Terrorists
        } else {
            Team::Spectators
        };
        if let Some(pl) = player_entry(ctx.state, u.entity_id)? {
            pl.team_id = team_id;
            pl.team = team;
        }
        Ok(())
    });

    set_int(ctx, "m_iHealth", |pl, v| pl.hp = v);
    set_int(ctx, "m_ArmorValue", |pl, v| pl.armor = v);
    set_int(ctx, "m_bHasDefuser", |pl, v| pl.has_defuse_kit = v == 1);
    set_int(ctx, "m_bHasHelmet", |pl, v| pl.has_helmet = v == 1);
    set_int(ctx, "localdata.m_Local.m_bDucking", |pl, v| pl.is_ducking = v == 1);
    set_int(ctx, "m_iAccount", |pl, v| pl.money = v);

    set_float(ctx, "m_angEyeAngles[1]", |pl, v| pl.view_direction_x = v);
    set_float(ctx, "m_angEyeAngles[0]", |pl, v| pl.view_direction_y = v);
    set_float(ctx, "m_flFlashDuration", |pl, v| pl.flash_duration = v);

    set_float(ctx, "localdata.m_vecVelocity[0]", |pl, v| pl.velocity.x = v);
    set_float(ctx, "localdata.m_vecVelocity[1]", |pl, v| pl.velocity.y = v);
    set_float(ctx, "localdata.m_vecVelocity[2]", |pl, v| pl.velocity.z = v);

    set_int(ctx, "m_unCurrentEquipmentValue", |pl, v| pl.current_equipment_value = v);
    set_int(ctx, "m_unRoundStartEquipmentValue", |pl, v| {
        pl.round_start_equipment_value = v
    });
    set_int(ctx, "m_unFreezetimeEndEquipmentValue", |pl, v| {
        pl.freezetime_end_equipment_value = v
    });

    let prefix = match ctx.state.weapon_prefix {
        Some(prefix) => prefix,
        None => {
            let prefix = if ctx.declares(&format!("{WEAPON_PREFIX}000")) {
                WEAPON_PREFIX
            } else {
                NON_LOCAL_WEAPON_PREFIX
            };
            debug!("player weapons are networked as {prefix}");
            ctx.state.weapon_prefix = Some(prefix);
            prefix
        }
    };

    for weapon_slot in 0..MAX_WEAPONS {
        ctx.on_update(&format!("{prefix}{weapon_slot:03}"), move |ctx, u| {
            let slot = player_slot(u.entity_id)?;
            let idx = u.int()? & INDEX_MASK;
            if idx == INDEX_MASK {
                ctx.state.clear_weapon_slot(slot, weapon_slot)
            } else {
                ctx.state.attribute_weapon(slot, weapon_slot, idx as usize)
            }
        });
    }

    set_int(ctx, "m_hActiveWeapon", |pl, v| pl.active_weapon_id = v & INDEX_MASK);

    for ammo_slot in 0..MAX_AMMO {
        ctx.on_update(&format!("m_iAmmo.{ammo_slot:03}"), move |ctx, u| {
            if let Some(pl) = player_entry(ctx.state, u.entity_id)? {
                pl.ammo_left[ammo_slot] = u.int()?;
            }
            Ok(())
        });
    }
    Ok(())
}

fn bind_player_resource(ctx: &mut BindingContext<'_>) -> Result<()> {
    type InfoSetter = fn(&mut AdditionalPlayerInformation, i32);
    let int_props: [(&str, InfoSetter); 7] = [
        ("m_iPing", |info, v| info.ping = v),
        ("m_iScore", |info, v| info.score = v),
        ("m_iKills", |info, v| info.kills = v),
        ("m_iDeaths", |info, v| info.deaths = v),
        ("m_iAssists", |info, v| info.assists = v),
        ("m_iMVPs", |info, v| info.mvps = v),
        ("m_iTotalCashSpent", |info, v| info.total_cash_spent = v),
    ];

    for i in 0..=MAX_PLAYERS {
        ctx.on_update(&format!("m_szClan.{i:03}"), move |ctx, u| {
            if let Some(info) = ctx.state.additional_player_info.get_mut(i) {
                info.clan_tag = u.string()?.to_string();
            }
            Ok(())
        });

        for (prop, setter) in int_props {
            ctx.on_update(&format!("{prop}.{i:03}"), move |ctx, u| {
                if let Some(info) = ctx.state.additional_player_info.get_mut(i) {
                    setter(info, u.int()?);
                }
                Ok(())
            });
        }
    }
    Ok(())
}
