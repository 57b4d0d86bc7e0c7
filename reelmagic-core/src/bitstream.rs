//! MPEG-1 video bitstream access
//!
//! An in-memory [`BitReader`] plus the few header parsers the probe tool needs.
//! Start codes are byte aligned: `00 00 01 xx`.

use crate::codec::{BitReader, PICTURE_RATES, SEQUENCE_HEADER_CODE};

/// In-memory bit buffer, MSB first
#[derive(Debug, Clone, Default)]
pub struct BitBuffer {
    bytes: Vec<u8>,
    bit_index: usize,
}

impl BitBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, bit_index: 0 }
    }

    pub fn rewind(&mut self) {
        self.bit_index = 0;
    }

    /// Current position in bits
    pub fn position(&self) -> usize {
        self.bit_index
    }

    pub fn has_ended(&self) -> bool {
        self.bit_index >= self.bytes.len() * 8
    }

    fn align(&mut self) {
        self.bit_index = (self.bit_index + 7) & !7;
    }
}

impl BitReader for BitBuffer {
    fn find_start_code(&mut self, code: u8) -> bool {
        self.align();
        let mut pos = self.bit_index >> 3;
        while pos + 3 < self.bytes.len() {
            if self.bytes[pos] == 0
                && self.bytes[pos + 1] == 0
                && self.bytes[pos + 2] == 1
                && self.bytes[pos + 3] == code
            {
                self.bit_index = (pos + 4) << 3;
                return true;
            }
            pos += 1;
        }
        self.bit_index = self.bytes.len() << 3;
        false
    }

    fn read(&mut self, bits: u32) -> u32 {
        let mut value = 0u32;
        for _ in 0..bits.min(32) {
            let byte = self.bit_index >> 3;
            let bit = match self.bytes.get(byte) {
                Some(b) => (b >> (7 - (self.bit_index & 7))) & 1,
                None => 0,
            };
            value = (value << 1) | bit as u32;
            self.bit_index += 1;
        }
        value
    }

    fn skip(&mut self, bits: u32) {
        self.bit_index += bits as usize;
    }
}

// ============================================================================
// Sequence Header
// ============================================================================

/// Fields of an MPEG-1 sequence header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    pub width: u16,
    pub height: u16,
    pub aspect_ratio_code: u8,
    /// May be >= 9 on ReelMagic assets
    pub picture_rate_code: u8,
    pub bit_rate: u32,
}

impl SequenceHeader {
    /// Scan forward to the next sequence header and parse it
    pub fn find(bits: &mut dyn BitReader) -> Option<Self> {
        if !bits.find_start_code(SEQUENCE_HEADER_CODE) {
            return None;
        }
        let width = bits.read(12) as u16;
        let height = bits.read(12) as u16;
        let aspect_ratio_code = bits.read(4) as u8;
        let picture_rate_code = bits.read(4) as u8;
        let bit_rate = bits.read(18);
        Some(Self {
            width,
            height,
            aspect_ratio_code,
            picture_rate_code,
            bit_rate,
        })
    }

    /// Out-of-range rate codes mark a scrambled ReelMagic header
    pub fn is_magical(&self) -> bool {
        self.picture_rate_code >= 0x9
    }

    /// Frame rate the card actually plays at (`code & 7` for magical headers)
    pub fn effective_framerate(&self) -> f64 {
        if self.is_magical() {
            PICTURE_RATES[(self.picture_rate_code & 0x7) as usize]
        } else {
            PICTURE_RATES[(self.picture_rate_code & 0xF) as usize]
        }
    }
}
