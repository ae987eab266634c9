use custom_bitreader::BitReader;
use log::{debug, trace};
use prost::Message;

use crate::{
    error::{check_capacity, Result},
    player::PlayerInfo,
    serverclass::ServerClasses,
    state::GameState,
    ParserError, MAX_PLAYERS, STRING_TABLE_NAME_MAX,
};

pub const MAX_HISTORY_LENGTH: usize = 31;
pub const N_USER_DATA_BITS: usize = 14;

const HISTORY_INDEX_BITS: usize = 5;
const STRING_TABLES_MIN: usize = 19;

const ST_NAME_INSTANCE_BASELINE: &str = "instancebaseline";
const ST_NAME_MODEL_PRECACHE: &str = "modelprecache";
const ST_NAME_USER_INFO: &str = "userinfo";

#[derive(Clone, PartialEq, Eq, Message)]
pub struct CsvcMsgCreateStringTable {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub max_entries: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub num_entries: Option<i32>,
    #[prost(bool, optional, tag = "4")]
    pub user_data_fixed_size: Option<bool>,
    #[prost(int32, optional, tag = "5")]
    pub user_data_size: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub user_data_size_bits: Option<i32>,
    #[prost(int32, optional, tag = "7")]
    pub flags: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub string_data: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Eq, Message)]
pub struct CsvcMsgUpdateStringTable {
    #[prost(int32, optional, tag = "1")]
    pub table_id: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub num_changed_entries: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub string_data: Option<Vec<u8>>,
}

/// In-packet string tables, indexed by creation order.
#[derive(Debug, Default)]
pub struct StringTables {
    tables: Vec<CsvcMsgCreateStringTable>,
}

impl StringTables {
    pub fn new() -> Self {
        Self {
            tables: Vec::with_capacity(STRING_TABLES_MIN),
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn handle_create(
        &mut self,
        bytes: &[u8],
        state: &mut GameState,
        classes: &mut ServerClasses,
    ) -> Result<()> {
        let msg = CsvcMsgCreateStringTable::decode(bytes)?;
        debug!(
            "string table {} created ({} entries)",
            msg.name(),
            msg.num_entries()
        );
        process_string_table(&msg, state, classes)?;
        self.tables.push(msg);
        Ok(())
    }

    pub fn handle_update(
        &mut self,
        bytes: &[u8],
        state: &mut GameState,
        classes: &mut ServerClasses,
    ) -> Result<()> {
        let msg = CsvcMsgUpdateStringTable::decode(bytes)?;
        let table_id = msg.table_id();
        let create_msg = usize::try_from(table_id)
            .ok()
            .and_then(|idx| self.tables.get_mut(idx))
            .ok_or(ParserError::UnknownStringTable(table_id))?;

        match create_msg.name() {
            ST_NAME_USER_INFO | ST_NAME_INSTANCE_BASELINE | ST_NAME_MODEL_PRECACHE => {
                create_msg.num_entries = msg.num_changed_entries;
                create_msg.string_data = msg.string_data;
                process_string_table(create_msg, state, classes)
            }
            _ => Ok(()),
        }
    }
}

/// Decodes the payload of a StringTables demo command.
pub fn parse_string_tables(
    r: &mut BitReader<'_>,
    state: &mut GameState,
    classes: &mut ServerClasses,
) -> Result<()> {
    let tables = r.read_single_byte()?;
    for _ in 0..tables {
        let name = r.read_string()?;
        parse_single_string_table(r, &name, state, classes)?;
    }
    Ok(())
}

fn read_length(r: &mut BitReader<'_>) -> Result<usize> {
    let len = r.read_signed_int(16)?;
    usize::try_from(len).map_err(|_| ParserError::InvalidLength(len))
}

fn parse_single_string_table(
    r: &mut BitReader<'_>,
    name: &str,
    state: &mut GameState,
    classes: &mut ServerClasses,
) -> Result<()> {
    let entries = r.read_signed_int(16)?;
    trace!("string table {name}: {entries} entries");

    for index in 0..entries.max(0) as usize {
        let entry = r.read_string()?;
        if entry.len() >= STRING_TABLE_NAME_MAX {
            return Err(ParserError::NameTooLong(entry.len()));
        }

        let data = if r.read_bit()? {
            let size = read_length(r)?;
            Some(r.read_bytes(size)?)
        } else {
            None
        };
        match (name, data) {
            // Model indices are table positions, shared with in-packet updates.
            (ST_NAME_MODEL_PRECACHE, _) => set_model(state, index, entry),
            (_, Some(data)) => apply_entry(name, &entry, &data, state, classes)?,
            (_, None) => {}
        }
    }

    // Client side mirror, consumed and dropped.
    if r.read_bit()? {
        let entries = r.read_signed_int(16)?;
        for _ in 0..entries {
            r.read_string()?;
            if r.read_bit()? {
                let size = read_length(r)?;
                r.skip(size << 3)?;
            }
        }
    }
    Ok(())
}

fn set_model(state: &mut GameState, index: usize, name: String) {
    if state.model_precache.len() <= index {
        state.model_precache.resize(index + 1, String::new());
    }
    state.model_precache[index] = name;
}

/// Stores `userinfo` and `instancebaseline` payloads; other tables are ignored.
fn apply_entry(
    table: &str,
    entry: &str,
    data: &[u8],
    state: &mut GameState,
    classes: &mut ServerClasses,
) -> Result<()> {
    match table {
        ST_NAME_USER_INFO => {
            let slot = entry
                .parse::<i64>()
                .map_err(|_| ParserError::SlotIdParse(entry.to_string()))?;
            let slot = check_capacity("raw player", slot, MAX_PLAYERS)?;
            let info = PlayerInfo::parse(data)?;
            trace!("userinfo slot {slot}: {} ({})", info.name, info.xuid);
            state.raw_players[slot] = Some(info);
        }
        ST_NAME_INSTANCE_BASELINE => {
            let class_id = entry
                .parse::<usize>()
                .map_err(|_| ParserError::ClassIdParse(entry.to_string()))?;
            classes.set_instance_baseline(class_id, data.to_vec());
        }
        _ => {}
    }
    Ok(())
}

fn entry_index_bits(max_entries: i32) -> usize {
    let mut n_tmp = max_entries;
    let mut n_entry_bits = 0;
    while n_tmp > 0 {
        n_tmp >>= 1;
        n_entry_bits += 1;
    }
    n_entry_bits.max(1) - 1
}

/// Decodes the compressed entry list of an in-packet string table.
pub fn process_string_table(
    tab: &CsvcMsgCreateStringTable,
    state: &mut GameState,
    classes: &mut ServerClasses,
) -> Result<()> {
    let name = tab.name();
    let max_entries = tab.max_entries();

    if name == ST_NAME_MODEL_PRECACHE {
        let size = usize::try_from(max_entries).unwrap_or_default();
        if state.model_precache.len() < size {
            state.model_precache.resize(size, String::new());
        }
    }

    let mut br = BitReader::new(tab.string_data());
    if br.read_bit()? {
        return Err(ParserError::UnsupportedStringTableEncoding);
    }

    let n_entry_bits = entry_index_bits(max_entries);
    let mut hist: Vec<String> = Vec::with_capacity(MAX_HISTORY_LENGTH + 1);
    let mut last_entry = -1;

    for _ in 0..tab.num_entries() {
        let mut entry_index = last_entry + 1;
        if !br.read_bit()? {
            entry_index = br.read_int(n_entry_bits)? as i32;
        }
        last_entry = entry_index;

        if entry_index < 0 || entry_index >= max_entries {
            return Err(ParserError::StringTableEntryOutOfRange {
                index: entry_index,
                max: max_entries,
            });
        }

        let mut entry = String::new();
        if br.read_bit()? {
            if br.read_bit()? {
                let idx = br.read_int(HISTORY_INDEX_BITS)? as usize;
                let bytes_to_copy = br.read_int(HISTORY_INDEX_BITS)? as usize;
                let prefix = hist
                    .get(idx)
                    .and_then(|h| h.as_bytes().get(..bytes_to_copy))
                    .ok_or(ParserError::StringTableHistory(idx))?;
                entry.push_str(&String::from_utf8_lossy(prefix));
            }
            entry.push_str(&br.read_string()?);
        }

        if hist.len() > MAX_HISTORY_LENGTH {
            hist.remove(0);
        }
        hist.push(entry.clone());

        let mut user_data = Vec::new();
        if br.read_bit()? {
            user_data = if tab.user_data_fixed_size() {
                br.read_bits_to_bytes(tab.user_data_size_bits().max(0) as usize)?
            } else {
                let size = br.read_int(N_USER_DATA_BITS)? as usize;
                br.read_bytes(size)?
            };
        }

        if name == ST_NAME_MODEL_PRECACHE {
            set_model(state, entry_index as usize, entry);
            continue;
        }
        if user_data.is_empty() {
            continue;
        }
        apply_entry(name, &entry, &user_data, state, classes)?;
    }
    Ok(())
}
