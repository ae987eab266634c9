#![allow(dead_code)]

use csgo_demofile::{
    header::{Header, DEMO_FILE_STAMP},
    netmessage::{CsvcMsgPacketEntities, MessageType},
    player::PlayerInfo,
    sendtable::{CsvcMsgSendTable, SendPropType, SendpropT, PROP_FLAG_COLLAPSIBLE, PROP_FLAG_UNSIGNED},
    COMMAND_INFO_BYTES,
};
use custom_bitreader::BitWriter;
use prost::Message;

pub const SIGNON: u8 = 1;
pub const PACKET: u8 = 2;
pub const SYNCTICK: u8 = 3;
pub const CONSOLE_COMMAND: u8 = 4;
pub const USER_COMMAND: u8 = 5;
pub const DATA_TABLES: u8 = 6;
pub const STOP: u8 = 7;
pub const STRING_TABLES: u8 = 9;

pub const CLASS_BASE_ENTITY: u32 = 0;
pub const CLASS_PLAYER: u32 = 1;
pub const CLASS_TEAM: u32 = 2;
pub const CLASS_BITS: usize = 2;

pub const PLAYER_TEAM_NUM: usize = 0;
pub const PLAYER_HEALTH: usize = 1;

pub const TEAM_NUM: usize = 0;
pub const TEAM_CLAN_NAME: usize = 1;
pub const TEAM_FLAG: usize = 2;
pub const TEAM_SCORE: usize = 3;
pub const TEAM_NAME: usize = 4;

pub fn sample_header() -> Header {
    Header {
        demo_type: DEMO_FILE_STAMP.to_string(),
        version: 4,
        protocol: 13881,
        server: "Valve CS:GO EU West Server".to_string(),
        nick: "GOTV Demo".to_string(),
        map: "de_nuke".to_string(),
        game: "csgo".to_string(),
        duration: 2.0,
        ticks: 256,
        frames: 250,
        signon: 420,
    }
}

/// Assembles a demo stream one command at a time.
pub struct DemoBuilder {
    w: BitWriter,
    tick: i32,
}

impl DemoBuilder {
    pub fn new() -> Self {
        Self::with_header(&sample_header())
    }

    pub fn with_header(header: &Header) -> Self {
        let mut w = BitWriter::new();
        header.write(&mut w);
        Self { w, tick: 0 }
    }

    /// A stream with no header at all.
    pub fn headerless() -> Self {
        Self {
            w: BitWriter::new(),
            tick: 0,
        }
    }

    pub fn command(&mut self, cmd: u8) -> &mut Self {
        self.w.write_single_byte(cmd);
        self.w.write_signed_int(self.tick, 32);
        self.w.write_single_byte(0);
        self.tick += 1;
        self
    }

    pub fn region(&mut self, payload: &[u8]) -> &mut Self {
        self.w.write_signed_int(payload.len() as i32, 32);
        self.w.write_bytes(payload);
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.w.write_bytes(bytes);
        self
    }

    pub fn synctick(&mut self) -> &mut Self {
        self.command(SYNCTICK)
    }

    pub fn console_command(&mut self, payload: &[u8]) -> &mut Self {
        self.command(CONSOLE_COMMAND).region(payload)
    }

    pub fn user_command(&mut self, payload: &[u8]) -> &mut Self {
        self.command(USER_COMMAND);
        self.w.write_signed_int(0, 32);
        self.region(payload)
    }

    pub fn data_tables(&mut self, payload: &[u8]) -> &mut Self {
        self.command(DATA_TABLES).region(payload)
    }

    pub fn string_tables(&mut self, payload: &[u8]) -> &mut Self {
        self.command(STRING_TABLES).region(payload)
    }

    /// A Packet command carrying the given `(message type, payload)` pairs.
    pub fn packet(&mut self, messages: &[(MessageType, Vec<u8>)]) -> &mut Self {
        self.command(PACKET);
        self.w.write_bytes(&[0; COMMAND_INFO_BYTES + 8]);

        let mut body = BitWriter::new();
        for (cmd, payload) in messages {
            body.write_varint32(u32::from(*cmd));
            body.write_varint32(payload.len() as u32);
            body.write_bytes(payload);
        }
        self.region(&body.into_bytes())
    }

    pub fn stop(&mut self) -> &mut Self {
        self.command(STOP)
    }

    pub fn build(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.w).into_bytes()
    }
}

fn int_prop(name: &str, bits: i32) -> SendpropT {
    SendpropT {
        r#type: SendPropType::Int as i32,
        var_name: name.to_string(),
        flags: PROP_FLAG_UNSIGNED,
        priority: 128,
        num_bits: bits,
        ..Default::default()
    }
}

fn string_prop(name: &str) -> SendpropT {
    SendpropT {
        r#type: SendPropType::String as i32,
        var_name: name.to_string(),
        priority: 128,
        ..Default::default()
    }
}

fn table(name: &str, props: Vec<SendpropT>) -> CsvcMsgSendTable {
    CsvcMsgSendTable {
        net_table_name: Some(name.to_string()),
        props,
        ..Default::default()
    }
}

/// Three classes: a base entity, a player deriving from it, and a team.
pub fn schema() -> Vec<u8> {
    let tables = [
        table("DT_BaseEntity", vec![int_prop("m_iTeamNum", 6)]),
        table(
            "DT_CSPlayer",
            vec![
                SendpropT {
                    r#type: SendPropType::DataTable as i32,
                    var_name: "baseclass".to_string(),
                    flags: PROP_FLAG_COLLAPSIBLE,
                    dt_name: Some("DT_BaseEntity".to_string()),
                    ..Default::default()
                },
                int_prop("m_iHealth", 8),
            ],
        ),
        table(
            "DT_CSTeam",
            vec![
                int_prop("m_iTeamNum", 6),
                string_prop("m_szClanTeamname"),
                string_prop("m_szTeamFlagImage"),
                int_prop("m_scoreTotal", 8),
                string_prop("m_szTeamname"),
            ],
        ),
        CsvcMsgSendTable {
            is_end: Some(true),
            ..Default::default()
        },
    ];
    let classes = [
        ("CBaseEntity", "DT_BaseEntity"),
        ("CCSPlayer", "DT_CSPlayer"),
        ("CCSTeam", "DT_CSTeam"),
    ];

    let mut w = BitWriter::new();
    for t in tables.iter() {
        let bytes = t.encode_to_vec();
        w.write_varint32(9);
        w.write_varint32(bytes.len() as u32);
        w.write_bytes(&bytes);
    }
    w.write_int(classes.len() as u32, 16);
    for (id, (name, dt_name)) in classes.iter().enumerate() {
        w.write_int(id as u32, 16);
        w.write_string(name);
        w.write_string(dt_name);
    }
    w.into_bytes()
}

pub fn player_info(name: &str, xuid: u64) -> PlayerInfo {
    PlayerInfo {
        name: name.to_string(),
        xuid,
        user_id: 2,
        guid: format!("STEAM_1:0:{}", xuid & 0xffff),
        ..Default::default()
    }
}

/// A StringTables payload with one `userinfo` table.
pub fn userinfo_tables(entries: &[(&str, PlayerInfo)]) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_single_byte(1);
    w.write_string("userinfo");
    w.write_signed_int(entries.len() as i32, 16);
    for (slot, info) in entries {
        let blob = info.to_bytes();
        w.write_string(slot);
        w.write_bit(true);
        w.write_signed_int(blob.len() as i32, 16);
        w.write_bytes(&blob);
    }
    w.write_bit(false);
    w.into_bytes()
}

#[derive(Debug, Clone)]
pub enum Field<'a> {
    Int(u32, usize),
    Str(&'a str),
}

/// Builds the entity stream of one PacketEntities message.
pub struct EntityData {
    w: BitWriter,
    last_id: i32,
    updated: i32,
}

impl EntityData {
    pub fn new() -> Self {
        Self {
            w: BitWriter::new(),
            last_id: -1,
            updated: 0,
        }
    }

    fn header(&mut self, id: i32, leave: bool, flag: bool) {
        self.w.write_ubitint((id - self.last_id - 1) as u32);
        self.w.write_bit(leave);
        self.w.write_bit(flag);
        self.last_id = id;
        self.updated += 1;
    }

    fn fields(&mut self, fields: &[(usize, Field<'_>)]) {
        self.w.write_bit(true);
        let mut last = -1_i32;
        for (idx, _) in fields {
            self.w.write_field_index_gap((*idx as i32 - last - 1) as u32);
            last = *idx as i32;
        }
        self.w.write_field_index_end();

        for (_, value) in fields {
            match value {
                Field::Int(v, bits) => self.w.write_int(*v, *bits),
                Field::Str(s) => {
                    self.w.write_int(s.len() as u32, 9);
                    self.w.write_bytes(s.as_bytes());
                }
            }
        }
    }

    pub fn enter(&mut self, id: i32, class_id: u32, fields: &[(usize, Field<'_>)]) -> &mut Self {
        self.header(id, false, true);
        self.w.write_int(class_id, CLASS_BITS);
        self.w.write_int(1, 10);
        self.fields(fields);
        self
    }

    pub fn update(&mut self, id: i32, fields: &[(usize, Field<'_>)]) -> &mut Self {
        self.header(id, false, false);
        self.fields(fields);
        self
    }

    pub fn delete(&mut self, id: i32) -> &mut Self {
        self.header(id, true, true);
        self
    }

    pub fn message(&mut self) -> (MessageType, Vec<u8>) {
        let data = std::mem::take(&mut self.w).into_bytes();
        let msg = CsvcMsgPacketEntities {
            max_entries: Some(2048),
            updated_entries: Some(self.updated),
            is_delta: Some(false),
            entity_data: Some(data),
            ..Default::default()
        };
        self.last_id = -1;
        self.updated = 0;
        (MessageType::PacketEntities, msg.encode_to_vec())
    }
}

/// Header, schema, one connected player on slot 0 and a resolved CT team.
pub fn match_demo() -> Vec<u8> {
    let mut entities = EntityData::new();
    entities
        .enter(
            1,
            CLASS_PLAYER,
            &[(PLAYER_TEAM_NUM, Field::Int(3, 6)), (PLAYER_HEALTH, Field::Int(100, 8))],
        )
        .enter(
            10,
            CLASS_TEAM,
            &[
                (TEAM_NUM, Field::Int(3, 6)),
                (TEAM_CLAN_NAME, Field::Str("Natus Vincere")),
                (TEAM_FLAG, Field::Str("UA")),
                (TEAM_SCORE, Field::Int(16, 8)),
                (TEAM_NAME, Field::Str("CT")),
            ],
        );

    DemoBuilder::new()
        .data_tables(&schema())
        .string_tables(&userinfo_tables(&[("0", player_info("s1mple", 76561198034202275))]))
        .packet(&[entities.message()])
        .synctick()
        .stop()
        .build()
}
