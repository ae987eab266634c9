use custom_bitreader::BitReaderError;
use custom_dispatcher::DispatchError;

/// Coarse classification of a [`ParserError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The stream is not a demo, or it is malformed.
    Format,
    /// The stream is well-formed but violates an assumption about game data.
    ProtocolAssumption,
    /// The API was driven in the wrong order.
    Precedence,
    Cancelled,
    Io,
    /// An event listener rejected its payload.
    Sink,
}

#[derive(thiserror::Error, Debug)]
pub enum ParserError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    BitReader(#[from] BitReaderError),
    #[error("failed to decode protobuf message: {0}")]
    Protobuf(#[from] prost::DecodeError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("invalid file stamp {0:?} (expecting HL2DEMO)")]
    InvalidSignature(String),
    #[error("unknown demo command {0}")]
    UnknownCommand(u8),
    #[error("invalid region length {0}")]
    InvalidLength(i32),
    #[error("expected send table message ({expected}), got {got}")]
    UnexpectedDataTableMessage { expected: u32, got: u32 },
    #[error("unknown send table {0:?}")]
    UnknownSendTable(String),
    #[error("invalid server class id {id} (class count {count})")]
    InvalidClassId { id: usize, count: usize },
    #[error("unknown property type {0}")]
    UnknownPropertyType(i32),
    #[error("array property {0:?} has no element template")]
    MissingArrayElement(String),
    #[error("field index {index} out of range for {class} ({len} properties)")]
    FieldIndexOutOfRange {
        class: String,
        index: usize,
        len: usize,
    },
    #[error("dictionary encoded string tables are not supported")]
    UnsupportedStringTableEncoding,
    #[error("string table entry {index} out of range (max entries {max})")]
    StringTableEntryOutOfRange { index: i32, max: i32 },
    #[error("string table history has no entry {0}")]
    StringTableHistory(usize),
    #[error("update for unknown string table {0}")]
    UnknownStringTable(i32),
    #[error("update for unknown entity {0}")]
    UnknownEntity(i32),
    #[error("entity index {0} out of range")]
    EntityIndexOutOfRange(i64),
    #[error("property {name} expected {expected} value, got {got}")]
    PropertyTypeMismatch {
        name: String,
        expected: &'static str,
        got: String,
    },

    #[error("unexpected team {0:?}")]
    UnexpectedTeam(String),
    #[error("unknown weapon model {0:?}")]
    UnknownWeaponModel(String),
    #[error("couldn't parse slot id from {0:?}")]
    SlotIdParse(String),
    #[error("couldn't parse class id from {0:?}")]
    ClassIdParse(String),
    #[error("string table entry name too long ({0} bytes)")]
    NameTooLong(usize),
    #[error("{what} index {index} exceeds capacity {capacity}")]
    CapacityExceeded {
        what: &'static str,
        index: i64,
        capacity: usize,
    },

    #[error("tried to parse tick before parsing header")]
    HeaderNotParsed,
    #[error("header has already been parsed")]
    HeaderAlreadyParsed,
    #[error("demo stream is closed")]
    StreamClosed,
    #[error("parser was aborted by an earlier error")]
    Poisoned,
    #[error("parsing has been cancelled")]
    Cancelled,
}

impl ParserError {
    pub fn kind(&self) -> ErrorKind {
        use ParserError::*;

        match self {
            Io(_) | BitReader(BitReaderError::Io(_)) => ErrorKind::Io,
            Dispatch(_) => ErrorKind::Sink,
            BitReader(_)
            | Protobuf(_)
            | InvalidSignature(_)
            | UnknownCommand(_)
            | InvalidLength(_)
            | UnexpectedDataTableMessage { .. }
            | UnknownSendTable(_)
            | InvalidClassId { .. }
            | UnknownPropertyType(_)
            | MissingArrayElement(_)
            | FieldIndexOutOfRange { .. }
            | UnsupportedStringTableEncoding
            | StringTableEntryOutOfRange { .. }
            | StringTableHistory(_)
            | UnknownStringTable(_)
            | UnknownEntity(_)
            | EntityIndexOutOfRange(_)
            | PropertyTypeMismatch { .. } => ErrorKind::Format,
            UnexpectedTeam(_)
            | UnknownWeaponModel(_)
            | SlotIdParse(_)
            | ClassIdParse(_)
            | NameTooLong(_)
            | CapacityExceeded { .. } => ErrorKind::ProtocolAssumption,
            HeaderNotParsed | HeaderAlreadyParsed | StreamClosed | Poisoned => {
                ErrorKind::Precedence
            }
            Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, ParserError>;

/// Checks `index` against a fixed capacity.
pub(crate) fn check_capacity(what: &'static str, index: i64, capacity: usize) -> Result<usize> {
    if index < 0 || index as usize >= capacity {
        return Err(ParserError::CapacityExceeded {
            what,
            index,
            capacity,
        });
    }
    Ok(index as usize)
}
