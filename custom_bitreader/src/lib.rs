mod writer;

use std::{borrow::Cow, io::Read};

pub use writer::BitWriter;

const MIN_STRING_BUFFER_LENGTH: usize = 256;
const VALVE_MAX_STRING_LENGTH: usize = 4096;

const COORD_INTEGER_BITS: usize = 14;
const COORD_FRACTIONAL_BITS: usize = 5;
const COORD_INTEGER_BITS_MP: usize = 11;
const COORD_FRACTIONAL_BITS_MP_LOWPRECISION: usize = 3;
const NORMAL_FRACTIONAL_BITS: usize = 11;

const COORD_RESOLUTION: f32 = 1.0 / (1 << COORD_FRACTIONAL_BITS) as f32;
const COORD_RESOLUTION_LOWPRECISION: f32 = 1.0 / (1 << COORD_FRACTIONAL_BITS_MP_LOWPRECISION) as f32;
const NORMAL_RESOLUTION: f32 = 1.0 / ((1 << NORMAL_FRACTIONAL_BITS) - 1) as f32;

const FIELD_INDEX_END: usize = 0xfff;

#[derive(thiserror::Error, Debug)]
pub enum BitReaderError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unexpected end of data (position {position}, requested {requested} bits, length {length} bits)")]
    UnexpectedEof {
        position: usize,
        requested: usize,
        length: usize,
    },
    #[error("read beyond chunk boundary (position {position}, chunk end {target})")]
    ChunkOverrun { position: usize, target: usize },
    #[error("end_chunk called without an open chunk")]
    NoOpenChunk,
    #[error("can't read {0} bits into a 32 bit integer")]
    TooManyBits(usize),
}

pub type Result<T> = std::result::Result<T, BitReaderError>;

#[derive(Clone, Debug)]
pub struct Stack(pub Vec<usize>);

impl Default for Stack {
    fn default() -> Self {
        Self(Vec::with_capacity(2))
    }
}

impl Stack {
    fn push(&mut self, v: usize) {
        self.0.push(v);
    }

    fn pop(&mut self) -> Option<usize> {
        self.0.pop()
    }

    fn top(&self) -> Option<usize> {
        self.0.last().copied()
    }
}

/// Forward-only reader over an in-memory byte stream with bit granularity.
///
/// Bits are consumed least-significant first, the way the Source engine
/// writes them. Every read is bounds-checked; running past the end of the
/// data yields [`BitReaderError::UnexpectedEof`] instead of panicking.
#[derive(Clone, Debug)]
pub struct BitReader<'a> {
    buffer: Cow<'a, [u8]>,
    position: usize,
    chunk_targets: Stack,
}

impl<'a> BitReader<'a> {
    pub fn new(buffer: impl Into<Cow<'a, [u8]>>) -> Self {
        Self {
            buffer: buffer.into(),
            position: 0,
            chunk_targets: Stack::default(),
        }
    }

    /// Drains `underlying` into memory and reads from the owned copy.
    pub fn from_reader<T: Read>(mut underlying: T) -> Result<BitReader<'static>> {
        let mut buffer = Vec::new();
        underlying.read_to_end(&mut buffer)?;
        Ok(BitReader::new(buffer))
    }

    pub fn actual_position(&self) -> usize {
        self.position
    }

    pub fn len_bits(&self) -> usize {
        self.buffer.len() << 3
    }

    pub fn bits_left(&self) -> usize {
        self.len_bits().saturating_sub(self.position)
    }

    pub fn end_reached(&self) -> bool {
        self.bits_left() == 0
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.position + n > self.len_bits() {
            return Err(BitReaderError::UnexpectedEof {
                position: self.position,
                requested: n,
                length: self.len_bits(),
            });
        }
        Ok(())
    }

    fn read_bits(&mut self, n: usize) -> Result<u64> {
        debug_assert!(n <= 64);
        self.ensure(n)?;

        let mut res = 0_u64;
        let mut written = 0;
        while written < n {
            let byte = self.buffer[self.position >> 3];
            let bit_offset = self.position & 7;
            let take = (8 - bit_offset).min(n - written);
            let bits = ((byte >> bit_offset) as u64) & ((1_u64 << take) - 1);
            res |= bits << written;
            written += take;
            self.position += take;
        }
        Ok(res)
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    pub fn read_int(&mut self, n: usize) -> Result<u32> {
        if n > 32 {
            return Err(BitReaderError::TooManyBits(n));
        }
        Ok(self.read_bits(n)? as u32)
    }

    pub fn read_signed_int(&mut self, n: usize) -> Result<i32> {
        if n > 32 {
            return Err(BitReaderError::TooManyBits(n));
        }
        if n == 0 {
            return Ok(0);
        }
        let shift = 64 - n;
        Ok(((self.read_bits(n)? << shift) as i64 >> shift) as i32)
    }

    pub fn read_single_byte(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut res = vec![0; n];
        self.read_bytes_into(&mut res)?;
        Ok(res)
    }

    pub fn read_bytes_into(&mut self, out: &mut [u8]) -> Result<()> {
        self.ensure(out.len() << 3)?;
        if self.position & 7 == 0 {
            let start = self.position >> 3;
            out.copy_from_slice(&self.buffer[start..start + out.len()]);
            self.position += out.len() << 3;
        } else {
            for item in out.iter_mut() {
                *item = self.read_single_byte()?;
            }
        }
        Ok(())
    }

    /// Reads `n` bits into bytes; a trailing partial byte holds the low bits.
    pub fn read_bits_to_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut res = self.read_bytes(n >> 3)?;
        if n & 7 != 0 {
            res.push(self.read_bits(n & 7)? as u8);
        }
        Ok(res)
    }

    /// Reads a fixed-size field of `n` bytes holding a NUL-terminated string.
    pub fn read_cstring(&mut self, n: usize) -> Result<String> {
        let b = self.read_bytes(n)?;
        let end = b.iter().position(|v| *v == 0).unwrap_or(n);
        Ok(String::from_utf8_lossy(&b[..end]).into_owned())
    }

    /// Reads a NUL-terminated string of unknown length.
    pub fn read_string(&mut self) -> Result<String> {
        self.read_string_limited(VALVE_MAX_STRING_LENGTH, false)
    }

    fn read_string_limited(&mut self, limit: usize, end_on_new_line: bool) -> Result<String> {
        let mut result = Vec::with_capacity(MIN_STRING_BUFFER_LENGTH);
        for _ in 0..limit {
            let b = self.read_single_byte()?;
            if b == 0 || (end_on_new_line && b == b'\n') {
                break;
            }
            result.push(b);
        }
        Ok(String::from_utf8_lossy(&result).into_owned())
    }

    pub fn read_float(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_int(32)?))
    }

    pub fn read_varint32(&mut self) -> Result<u32> {
        let mut result = 0_u32;
        for i in 0..5 {
            let b = self.read_single_byte()? as u32;
            result |= (b & 0x7F) << (7 * i);
            if (b & 0x80) == 0 {
                break;
            }
        }
        Ok(result)
    }

    pub fn read_signed_varint32(&mut self) -> Result<i32> {
        let res = self.read_varint32()?;
        Ok(((res >> 1) as i32) ^ -((res & 1) as i32))
    }

    pub fn read_ubitint(&mut self) -> Result<u32> {
        let res = self.read_int(6)?;
        Ok(match res & (16 | 32) {
            16 => (res & 15) | (self.read_int(4)? << 4),
            32 => (res & 15) | (self.read_int(8)? << 4),
            48 => (res & 15) | (self.read_int(28)? << 4),
            _ => res,
        })
    }

    /// Reads the next entity field index. `None` marks the end of the list.
    pub fn read_field_index(&mut self, last_idx: i32, new_way: bool) -> Result<Option<i32>> {
        if new_way && self.read_bit()? {
            return Ok(Some(last_idx + 1));
        }

        let mut ret: usize;
        if new_way && self.read_bit()? {
            ret = self.read_int(3)? as usize;
        } else {
            ret = self.read_int(7)? as usize;
            match ret & (32 | 64) {
                32 => ret = (ret & !96) | ((self.read_int(2)? as usize) << 5),
                64 => ret = (ret & !96) | ((self.read_int(4)? as usize) << 5),
                96 => ret = (ret & !96) | ((self.read_int(7)? as usize) << 5),
                _ => {}
            }
        }

        if ret == FIELD_INDEX_END {
            return Ok(None);
        }

        Ok(Some(last_idx + 1 + ret as i32))
    }

    pub fn read_bitcoord(&mut self) -> Result<f32> {
        let mut int_val = self.read_int(1)?;
        let mut fract_val = self.read_int(1)?;

        if int_val | fract_val == 0 {
            return Ok(0.0);
        }

        let is_neg = self.read_bit()?;
        if int_val == 1 {
            int_val = self.read_int(COORD_INTEGER_BITS)? + 1;
        }
        if fract_val == 1 {
            fract_val = self.read_int(COORD_FRACTIONAL_BITS)?;
        }

        let res = int_val as f32 + fract_val as f32 * COORD_RESOLUTION;
        Ok(if is_neg { -res } else { res })
    }

    pub fn read_bitcoordmp(&mut self, is_integ: bool, is_lp: bool) -> Result<f32> {
        let mut res = 0.0_f32;
        let mut is_neg = false;

        let in_bounds = self.read_bit()?;
        let int_bits = if in_bounds {
            COORD_INTEGER_BITS_MP
        } else {
            COORD_INTEGER_BITS
        };

        if is_integ {
            if self.read_bit()? {
                is_neg = self.read_bit()?;
                res = (self.read_int(int_bits)? + 1) as f32;
            }
        } else {
            let read_int_val = self.read_bit()?;
            is_neg = self.read_bit()?;

            let mut int_val = 0;
            if read_int_val {
                int_val = self.read_int(int_bits)? + 1;
            }

            res = int_val as f32
                + if is_lp {
                    self.read_int(COORD_FRACTIONAL_BITS_MP_LOWPRECISION)? as f32
                        * COORD_RESOLUTION_LOWPRECISION
                } else {
                    self.read_int(COORD_FRACTIONAL_BITS)? as f32 * COORD_RESOLUTION
                };
        }

        Ok(if is_neg { -res } else { res })
    }

    pub fn read_bitnormal(&mut self) -> Result<f32> {
        let is_neg = self.read_bit()?;
        let res = self.read_int(NORMAL_FRACTIONAL_BITS)? as f32 * NORMAL_RESOLUTION;
        Ok(if is_neg { -res } else { res })
    }

    pub fn read_bitcellcoord(&mut self, bits: usize, is_integ: bool, is_lp: bool) -> Result<f32> {
        let int_val = self.read_int(bits)? as f32;
        if is_integ {
            return Ok(int_val);
        }
        Ok(if is_lp {
            int_val
                + self.read_int(COORD_FRACTIONAL_BITS_MP_LOWPRECISION)? as f32
                    * COORD_RESOLUTION_LOWPRECISION
        } else {
            int_val + self.read_int(COORD_FRACTIONAL_BITS)? as f32 * COORD_RESOLUTION
        })
    }

    /// Opens a sub-region of `n` bits starting at the current position.
    pub fn begin_chunk(&mut self, n: usize) {
        self.chunk_targets.push(self.position + n);
    }

    /// Closes the innermost region and moves to its end, however much of it
    /// was consumed.
    pub fn end_chunk(&mut self) -> Result<()> {
        let target = self.chunk_targets.pop().ok_or(BitReaderError::NoOpenChunk)?;

        match target.cmp(&self.position) {
            std::cmp::Ordering::Less => Err(BitReaderError::ChunkOverrun {
                position: self.position,
                target,
            }),
            std::cmp::Ordering::Greater => self.skip(target - self.position),
            std::cmp::Ordering::Equal => Ok(()),
        }
    }

    pub fn chunk_finished(&self) -> bool {
        match self.chunk_targets.top() {
            Some(target) => target <= self.position,
            None => self.end_reached(),
        }
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.position += n;
        Ok(())
    }
}
