/// Bit-granular writer producing streams that [`crate::BitReader`] reads back.
/// Used to assemble synthetic demo data.
#[derive(Clone, Debug, Default)]
pub struct BitWriter {
    buffer: Vec<u8>,
    position: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn write_bit(&mut self, bit: bool) {
        let byte = self.position >> 3;
        if byte == self.buffer.len() {
            self.buffer.push(0);
        }
        if bit {
            self.buffer[byte] |= 1 << (self.position & 7);
        }
        self.position += 1;
    }

    pub fn write_bits(&mut self, value: u64, n: usize) {
        for i in 0..n {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    pub fn write_int(&mut self, value: u32, n: usize) {
        self.write_bits(value as u64, n);
    }

    pub fn write_signed_int(&mut self, value: i32, n: usize) {
        self.write_bits(value as u32 as u64, n);
    }

    pub fn write_single_byte(&mut self, value: u8) {
        self.write_bits(value as u64, 8);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.write_single_byte(*b);
        }
    }

    /// Writes `s` into a fixed field of `n` bytes, NUL-padded and truncated to fit.
    pub fn write_cstring(&mut self, s: &str, n: usize) {
        let bytes = s.as_bytes();
        let len = bytes.len().min(n);
        self.write_bytes(&bytes[..len]);
        for _ in len..n {
            self.write_single_byte(0);
        }
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.write_single_byte(0);
    }

    pub fn write_float(&mut self, value: f32) {
        self.write_int(value.to_bits(), 32);
    }

    pub fn write_varint32(&mut self, mut value: u32) {
        loop {
            let b = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.write_single_byte(b);
                break;
            }
            self.write_single_byte(b | 0x80);
        }
    }

    pub fn write_ubitint(&mut self, value: u32) {
        let low = value & 15;
        let high = value >> 4;
        if high == 0 {
            self.write_int(low, 6);
        } else if high < (1 << 4) {
            self.write_int(low | 16, 6);
            self.write_int(high, 4);
        } else if high < (1 << 8) {
            self.write_int(low | 32, 6);
            self.write_int(high, 8);
        } else {
            self.write_int(low | 48, 6);
            self.write_int(high, 28);
        }
    }

    /// Writes the gap to the next field index using the long form.
    pub fn write_field_index_gap(&mut self, gap: u32) {
        self.write_bit(false);
        self.write_bit(false);
        if gap < 32 {
            self.write_int(gap, 7);
        } else if gap < (1 << 7) {
            self.write_int((gap & 31) | 32, 7);
            self.write_int(gap >> 5, 2);
        } else if gap < (1 << 9) {
            self.write_int((gap & 31) | 64, 7);
            self.write_int(gap >> 5, 4);
        } else {
            self.write_int((gap & 31) | 96, 7);
            self.write_int(gap >> 5, 7);
        }
    }

    pub fn write_field_index_end(&mut self) {
        self.write_field_index_gap(0xfff);
    }

    /// Pads to the next byte boundary.
    pub fn align(&mut self) {
        while self.position & 7 != 0 {
            self.write_bit(false);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BitReader;

    #[test]
    fn field_index_gaps_of_every_width() {
        let mut w = BitWriter::new();
        for gap in [0, 31, 100, 300, 2000] {
            w.write_field_index_gap(gap);
        }
        w.write_field_index_end();

        let mut r = BitReader::new(w.into_bytes());
        let mut last = -1;
        let mut seen = Vec::new();
        while let Some(idx) = r.read_field_index(last, true).unwrap() {
            seen.push(idx - last - 1);
            last = idx;
        }
        assert_eq!(seen, vec![0, 31, 100, 300, 2000]);
    }

    #[test]
    fn cstring_field_is_padded() {
        let mut w = BitWriter::new();
        w.write_cstring("de_dust2", 260);
        assert_eq!(w.position(), 260 * 8);
        let mut r = BitReader::new(w.into_bytes());
        assert_eq!(r.read_cstring(260).unwrap(), "de_dust2");
    }
}
