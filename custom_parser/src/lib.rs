pub mod bombsite;
pub mod commands;
pub mod common;
pub mod entity;
pub mod equipment;
mod error;
pub mod events;
pub mod header;
pub mod netmessage;
pub mod player;
pub mod sendtable;
pub mod serverclass;
pub mod state;
pub mod stringtable;
pub mod subscription;
pub mod team;

use std::{
    borrow::Cow,
    fs::File,
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use ahash::AHashMap as HashMap;
use custom_bitreader::BitReader;
use custom_dispatcher::EventEmitter;
use log::{debug, info, trace, warn};
use prost::Message;

use commands::DemoCommand;
use entity::{decode_prop, flattened_prop, read_field_indices, Entity};
use equipment::{bind_weapons, map_equipment};
use events::{HeaderParsed, PlayerConnected, TickDone, HEADER_PARSED, PLAYER_CONNECTED, TICK_DONE};
use header::Header;
use netmessage::{CnetMsgSetConVar, CsvcMsgPacketEntities, CsvcMsgServerInfo, MessageType};
use serverclass::ServerClasses;
use state::GameState;
use stringtable::{parse_string_tables, StringTables};
use subscription::{BindingContext, Subscriptions};

pub use error::{ErrorKind, ParserError, Result};

pub const MAX_PLAYERS: usize = 64;
pub const MAX_ENTITIES: usize = 2048;
pub const MAX_WEAPONS: usize = 64;
pub const MAX_AMMO: usize = 32;
pub const INDEX_MASK: i32 = 2047;
pub const MAX_OS_PATH: usize = 260;
pub const STRING_TABLE_NAME_MAX: usize = 100;
pub const COMMAND_INFO_BYTES: usize = 152;

const ENTITIES_MIN: usize = 531;
const PROP_INDICES_VEC_CAP: usize = 64;
const ENTITY_SERIAL_BITS: usize = 10;
const SEQUENCE_NUMBER_BYTES: usize = 4 + 4;
const BEGIN_CHUNK_SHIFT: usize = 3;

/// Demo decoder. Owns the byte stream, the decoded schema, every live entity
/// and the reconstructed [`GameState`].
pub struct Parser {
    bitreader: BitReader<'static>,

    header: Option<Header>,
    current_tick: usize,
    ingame_tick: i32,

    classes: ServerClasses,
    entities: HashMap<i32, Entity>,
    subscriptions: Subscriptions,
    state: GameState,
    string_tables: StringTables,

    data_tables_parsed: bool,
    finished: bool,
    poisoned: bool,

    tick_rate: Option<f32>,
    server_convars: HashMap<String, String>,

    dispatcher: EventEmitter,
    field_indices: Vec<usize>,
}

impl Parser {
    pub fn new(bytes: impl Into<Cow<'static, [u8]>>) -> Self {
        Self::with_reader(BitReader::new(bytes))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::open(path)?;
        Ok(Self::with_reader(BitReader::from_reader(f)?))
    }

    fn with_reader(bitreader: BitReader<'static>) -> Self {
        Self {
            bitreader,
            header: None,
            current_tick: 0,
            ingame_tick: -1,
            classes: ServerClasses::default(),
            entities: HashMap::with_capacity(ENTITIES_MIN),
            subscriptions: Subscriptions::default(),
            state: GameState::new(),
            string_tables: StringTables::new(),
            data_tables_parsed: false,
            finished: false,
            poisoned: false,
            tick_rate: None,
            server_convars: HashMap::new(),
            dispatcher: EventEmitter::new(),
            field_indices: Vec::with_capacity(PROP_INDICES_VEC_CAP),
        }
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// Number of commands read so far, the Stop command included.
    pub fn current_tick(&self) -> usize {
        self.current_tick
    }

    /// Tick number recorded in the most recent tick record.
    pub fn ingame_tick(&self) -> i32 {
        self.ingame_tick
    }

    pub fn game_state(&self) -> &GameState {
        &self.state
    }

    pub fn server_classes(&self) -> &ServerClasses {
        &self.classes
    }

    pub fn entity(&self, id: i32) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Server tick rate, taken from the server info message when one was
    /// seen and from the header otherwise.
    pub fn tick_rate(&self) -> f32 {
        match (self.tick_rate, &self.header) {
            (Some(rate), _) => rate,
            (None, Some(header)) => header.tick_rate(),
            (None, None) => 0.0,
        }
    }

    pub fn server_convars(&self) -> &HashMap<String, String> {
        &self.server_convars
    }

    pub fn dispatcher_mut(&mut self) -> &mut EventEmitter {
        &mut self.dispatcher
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn parse_header(&mut self) -> Result<&Header> {
        if self.poisoned {
            return Err(ParserError::Poisoned);
        }
        if self.header.is_some() {
            return Err(ParserError::HeaderAlreadyParsed);
        }

        let header = self.poison_on_err(|p| Header::parse(&mut p.bitreader))?;
        info!(
            "{} on {} ({} ticks, {:.1}s, protocol {})",
            header.server, header.map, header.ticks, header.duration, header.protocol
        );

        let event = HeaderParsed { header };
        self.poison_on_err(|p| p.dispatcher.emit(HEADER_PARSED, &event).map_err(Into::into))?;
        Ok(&*self.header.insert(event.header))
    }

    /// Decodes one tick. Returns `false` once the Stop command was read.
    pub fn parse_next_tick(&mut self) -> Result<bool> {
        if self.poisoned {
            return Err(ParserError::Poisoned);
        }
        if self.header.is_none() {
            return Err(ParserError::HeaderNotParsed);
        }
        if self.finished {
            return Err(ParserError::StreamClosed);
        }

        self.poison_on_err(Self::advance)
    }

    /// Decodes ticks until Stop. `cancel` is checked before every tick.
    pub fn parse_to_end(&mut self, cancel: Option<&AtomicBool>) -> Result<()> {
        loop {
            if cancel.map_or(false, |c| c.load(Ordering::Relaxed)) {
                warn!("parse cancelled after {} ticks", self.current_tick);
                self.poisoned = true;
                return Err(ParserError::Cancelled);
            }
            if !self.parse_next_tick()? {
                return Ok(());
            }
        }
    }

    fn poison_on_err<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let res = f(self);
        if res.is_err() {
            self.poisoned = true;
        }
        res
    }

    fn advance(&mut self) -> Result<bool> {
        let cmd = self.bitreader.read_single_byte()?;
        let tick = self.bitreader.read_signed_int(32)?;
        self.bitreader.skip(8)?;
        self.ingame_tick = tick;
        self.current_tick += 1;

        let command = DemoCommand::try_from(cmd)?;
        if command == DemoCommand::Stop {
            self.finished = true;
            info!("end of demo at tick {}", self.current_tick);
            return Ok(false);
        }
        trace!("tick {} ({tick}): {command:?}", self.current_tick);

        match command {
            DemoCommand::Synctick | DemoCommand::Stop => {}
            DemoCommand::ConsoleCommand => self.skip_region()?,
            DemoCommand::UserCommand => {
                self.bitreader.skip(32)?;
                self.skip_region()?;
            }
            DemoCommand::DataTables => self.handle_data_tables()?,
            DemoCommand::StringTables => {
                self.begin_region()?;
                parse_string_tables(&mut self.bitreader, &mut self.state, &mut self.classes)?;
                self.bitreader.end_chunk()?;
            }
            DemoCommand::Signon | DemoCommand::Packet => self.handle_packet()?,
        }

        for slot in self.state.reconcile_players() {
            if let Some(player) = self.state.player(slot) {
                info!("player connected: {} ({})", player.name, player.steam_id);
                let event = PlayerConnected {
                    player: player.clone(),
                };
                self.dispatcher.emit(PLAYER_CONNECTED, &event)?;
            }
        }
        self.dispatcher.emit(TICK_DONE, &TickDone)?;
        Ok(true)
    }

    fn begin_region(&mut self) -> Result<()> {
        let len = self.bitreader.read_signed_int(32)?;
        let len = usize::try_from(len).map_err(|_| ParserError::InvalidLength(len))?;
        self.bitreader.begin_chunk(len << BEGIN_CHUNK_SHIFT);
        Ok(())
    }

    fn skip_region(&mut self) -> Result<()> {
        self.begin_region()?;
        self.bitreader.end_chunk()?;
        Ok(())
    }

    fn handle_data_tables(&mut self) -> Result<()> {
        self.begin_region()?;
        if self.data_tables_parsed {
            warn!("ignoring repeated data tables block");
            self.bitreader.end_chunk()?;
            return Ok(());
        }

        self.classes.parse_data_tables(&mut self.bitreader)?;
        self.bitreader.end_chunk()?;
        self.data_tables_parsed = true;

        self.state.equipment_mapping = map_equipment(&self.classes);
        self.bind_entities();
        Ok(())
    }

    fn bind_entities(&mut self) {
        let classes = &self.classes;
        let subs = &mut self.subscriptions;
        team::bind_team_states(classes, subs);
        bombsite::bind_bomb_sites(classes, subs);
        player::bind_players(classes, subs);
        bind_weapons(classes, subs);
        debug!(
            "bound entity handlers, {} weapon classes mapped",
            self.state.equipment_mapping.len()
        );
    }

    fn handle_packet(&mut self) -> Result<()> {
        self.bitreader
            .skip((COMMAND_INFO_BYTES + SEQUENCE_NUMBER_BYTES) << BEGIN_CHUNK_SHIFT)?;
        self.begin_region()?;

        while !self.bitreader.chunk_finished() {
            let cmd = MessageType::from(self.bitreader.read_varint32()?);
            let size = self.bitreader.read_varint32()? as usize;
            self.bitreader.begin_chunk(size << BEGIN_CHUNK_SHIFT);

            if let MessageType::Other(id) = cmd {
                trace!("skipping net message {id} ({size} bytes)");
            } else {
                let bytes = self.bitreader.read_bytes(size)?;
                self.handle_message(cmd, &bytes)?;
            }
            self.bitreader.end_chunk()?;
        }

        self.bitreader.end_chunk()?;
        Ok(())
    }

    fn handle_message(&mut self, cmd: MessageType, bytes: &[u8]) -> Result<()> {
        match cmd {
            MessageType::SetConVar => {
                let msg = CnetMsgSetConVar::decode(bytes)?;
                for cvar in msg.convars.into_iter().flat_map(|c| c.cvars) {
                    trace!("convar {} = {}", cvar.name, cvar.value);
                    self.server_convars.insert(cvar.name, cvar.value);
                }
            }
            MessageType::ServerInfo => {
                let msg = CsvcMsgServerInfo::decode(bytes)?;
                let rate = msg.tick_rate();
                debug!("server info: map {}, tick rate {rate}", msg.map_name());
                self.tick_rate = Some(rate);
            }
            MessageType::CreateStringTable => {
                self.string_tables
                    .handle_create(bytes, &mut self.state, &mut self.classes)?;
            }
            MessageType::UpdateStringTable => {
                self.string_tables
                    .handle_update(bytes, &mut self.state, &mut self.classes)?;
            }
            MessageType::PacketEntities => self.handle_packet_entities(bytes)?,
            MessageType::Other(_) => {}
        }
        Ok(())
    }

    fn handle_packet_entities(&mut self, bytes: &[u8]) -> Result<()> {
        let pe = CsvcMsgPacketEntities::decode(bytes)?;
        let mut r = BitReader::new(pe.entity_data());

        let mut entity_id = -1_i32;
        for _ in 0..pe.updated_entries() {
            let next = i64::from(entity_id) + 1 + i64::from(r.read_ubitint()?);
            entity_id = match i32::try_from(next) {
                Ok(id) if next < MAX_ENTITIES as i64 => id,
                _ => return Err(ParserError::EntityIndexOutOfRange(next)),
            };

            let cmd = r.read_int(2)?;
            if cmd & 1 == 0 {
                if cmd & 2 != 0 {
                    self.enter_pvs(&mut r, entity_id)?;
                } else {
                    self.update_entity(&mut r, entity_id)?;
                }
            } else if cmd & 2 != 0 {
                if self.entities.remove(&entity_id).is_some() {
                    trace!("entity {entity_id} deleted");
                }
                self.subscriptions.clear_entity(entity_id);
            }
        }
        Ok(())
    }

    fn enter_pvs(&mut self, r: &mut BitReader<'_>, entity_id: i32) -> Result<()> {
        let class_id = r.read_int(self.classes.class_bits())? as usize;
        let serial = r.read_int(ENTITY_SERIAL_BITS)?;

        self.classes.prepare_baseline(class_id)?;
        self.subscriptions.clear_entity(entity_id);

        let Self {
            classes,
            state,
            subscriptions,
            entities,
            field_indices,
            ..
        } = self;

        let class = classes.get(class_id)?;
        trace!("entity {entity_id} created: {} (serial {serial})", class.name);

        let baseline = classes.baseline(class_id);
        let mut entity = Entity::new(entity_id, class_id, serial, class.flattened_props.len());
        for (idx, value) in baseline {
            if let Some(slot) = entity.props.get_mut(*idx) {
                *slot = value.clone();
            }
        }

        let mut ctx = BindingContext::new(state, subscriptions, class, class_id, entity_id);
        ctx.fire_created()?;
        for (idx, value) in baseline {
            ctx.dispatch(*idx, value)?;
        }
        apply_delta(r, &mut entity, &mut ctx, field_indices)?;

        entities.insert(entity_id, entity);
        Ok(())
    }

    fn update_entity(&mut self, r: &mut BitReader<'_>, entity_id: i32) -> Result<()> {
        let Self {
            classes,
            state,
            subscriptions,
            entities,
            field_indices,
            ..
        } = self;

        let entity = entities
            .get_mut(&entity_id)
            .ok_or(ParserError::UnknownEntity(entity_id))?;
        let class_index = entity.class_index;
        let class = classes.get(class_index)?;

        let mut ctx = BindingContext::new(state, subscriptions, class, class_index, entity_id);
        apply_delta(r, entity, &mut ctx, field_indices)
    }
}

/// Decodes one entity delta, storing and dispatching values in field order.
fn apply_delta(
    r: &mut BitReader<'_>,
    entity: &mut Entity,
    ctx: &mut BindingContext<'_>,
    indices: &mut Vec<usize>,
) -> Result<()> {
    read_field_indices(r, indices)?;

    let class = ctx.class;
    for &idx in indices.iter() {
        let entry = flattened_prop(&class.name, &class.flattened_props, idx)?;
        let value = decode_prop(entry, r)?;
        ctx.dispatch(idx, &value)?;
        entity.props[idx] = value;
    }
    Ok(())
}
