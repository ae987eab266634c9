use custom_bitreader::{BitReader, BitWriter};
use serde::{Deserialize, Serialize};

use crate::{error::Result, ParserError, MAX_OS_PATH};

pub const DEMO_FILE_STAMP: &str = "HL2DEMO";
const FILE_STAMP_LENGTH: usize = 8;

#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    pub demo_type: String,
    pub version: i32,
    pub protocol: i32,
    pub server: String,
    pub nick: String,
    pub map: String,
    pub game: String,
    pub duration: f32,
    pub ticks: i32,
    pub frames: i32,
    pub signon: i32,
}

impl Header {
    /// Reads the fixed-layout header. Nothing is returned unless the file
    /// stamp matches.
    pub fn parse(r: &mut BitReader<'_>) -> Result<Self> {
        let header = Self {
            demo_type: r.read_cstring(FILE_STAMP_LENGTH)?,
            version: r.read_signed_int(32)?,
            protocol: r.read_signed_int(32)?,
            server: r.read_cstring(MAX_OS_PATH)?,
            nick: r.read_cstring(MAX_OS_PATH)?,
            map: r.read_cstring(MAX_OS_PATH)?,
            game: r.read_cstring(MAX_OS_PATH)?,
            duration: r.read_float()?,
            ticks: r.read_signed_int(32)?,
            frames: r.read_signed_int(32)?,
            signon: r.read_signed_int(32)?,
        };

        if header.demo_type != DEMO_FILE_STAMP {
            return Err(ParserError::InvalidSignature(header.demo_type));
        }

        Ok(header)
    }

    pub fn write(&self, w: &mut BitWriter) {
        w.write_cstring(&self.demo_type, FILE_STAMP_LENGTH);
        w.write_signed_int(self.version, 32);
        w.write_signed_int(self.protocol, 32);
        w.write_cstring(&self.server, MAX_OS_PATH);
        w.write_cstring(&self.nick, MAX_OS_PATH);
        w.write_cstring(&self.map, MAX_OS_PATH);
        w.write_cstring(&self.game, MAX_OS_PATH);
        w.write_float(self.duration);
        w.write_signed_int(self.ticks, 32);
        w.write_signed_int(self.frames, 32);
        w.write_signed_int(self.signon, 32);
    }

    /// Ticks per second as recorded in the header, 0 for an empty recording.
    pub fn tick_rate(&self) -> f32 {
        if self.duration > 0.0 {
            self.ticks as f32 / self.duration
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn sample() -> Header {
        Header {
            demo_type: DEMO_FILE_STAMP.to_string(),
            version: 4,
            protocol: 13_765,
            server: "Valve CS:GO EU West".to_string(),
            nick: "GOTV Demo".to_string(),
            map: "de_nuke".to_string(),
            game: "csgo".to_string(),
            duration: 2_400.5,
            ticks: 307_264,
            frames: 153_550,
            signon: 520_112,
        }
    }

    #[test]
    fn header_round_trips_byte_for_byte() {
        let mut w = BitWriter::new();
        sample().write(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 8 + 4 + 4 + 4 * MAX_OS_PATH + 4 + 4 + 4 + 4);

        let header = Header::parse(&mut BitReader::new(bytes.as_slice())).unwrap();
        assert_eq!(header, sample());

        let mut w = BitWriter::new();
        header.write(&mut w);
        assert_eq!(w.into_bytes(), bytes);
    }

    #[test]
    fn wrong_stamp_is_a_format_error() {
        let mut w = BitWriter::new();
        Header {
            demo_type: "HL2DEMX".to_string(),
            ..sample()
        }
        .write(&mut w);

        let err = Header::parse(&mut BitReader::new(w.into_bytes())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(matches!(err, ParserError::InvalidSignature(s) if s == "HL2DEMX"));
    }

    #[test]
    fn truncated_header_is_a_format_error() {
        let err = Header::parse(&mut BitReader::new(b"HL2DEMO\0".to_vec())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn tick_rate_from_header() {
        let h = Header {
            duration: 10.0,
            ticks: 1_280,
            ..sample()
        };
        assert_eq!(h.tick_rate(), 128.0);
        assert_eq!(Header::default().tick_rate(), 0.0);
    }
}
