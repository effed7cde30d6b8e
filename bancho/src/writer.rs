use byteorder::{ByteOrder, LittleEndian};

use crate::types::ServerPacketId;

/// Wrap a payload in the `id:u16, _pad:u8, length:u32` frame header.
pub fn frame(id: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(7 + payload.len());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.push(0);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Accumulates one packet's payload, then frames it.
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Writer {
        Writer { buf: Vec::new() }
    }

    pub fn finish(self, id: ServerPacketId) -> Vec<u8> {
        frame(id as u16, &self.buf)
    }

    pub fn u8(mut self, v: u8) -> Writer {
        self.buf.push(v);
        self
    }

    pub fn i16(mut self, v: i16) -> Writer {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u16(mut self, v: u16) -> Writer {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(mut self, v: i32) -> Writer {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(mut self, v: u32) -> Writer {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i64(mut self, v: i64) -> Writer {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32(mut self, v: f32) -> Writer {
        let mut bytes = [0u8; 4];
        LittleEndian::write_f32(&mut bytes, v);
        self.buf.extend_from_slice(&bytes);
        self
    }

    /// A marker-prefixed, ULEB128-length string.
    pub fn string(mut self, v: &str) -> Writer {
        if v.is_empty() {
            self.buf.push(0x00);
            return self;
        }
        self.buf.push(0x0b);
        let mut len = v.len();
        loop {
            let mut byte = (len & 0x7f) as u8;
            len >>= 7;
            if len != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if len == 0 {
                break;
            }
        }
        self.buf.extend_from_slice(v.as_bytes());
        self
    }

    /// An empty-but-present string (`0x0b 0x00`); used to signal that a
    /// match has a password without revealing it.
    pub fn string_present_empty(mut self) -> Writer {
        self.buf.extend_from_slice(&[0x0b, 0x00]);
        self
    }

    pub fn i32_list(mut self, values: &[i32]) -> Writer {
        self.buf.extend_from_slice(&(values.len() as u16).to_le_bytes());
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Writer {
        self.buf.extend_from_slice(bytes);
        self
    }
}
