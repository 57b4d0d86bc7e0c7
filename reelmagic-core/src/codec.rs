//! # Codec Interface
//!
//! The MPEG-1 decoder is an external collaborator. This module defines the
//! contract the player consumes, plus the byte-source plumbing that feeds it.
//!
//! ```text
//! ┌────────────┐    ┌────────────┐    ┌───────────┐    ┌─────────────┐
//! │ ByteSource │───►│ SourceFeed │───►│ MpegCodec │───►│ MediaPlayer │
//! │ (DOS file) │    │ (4k loads) │    │ (opaque)  │    │             │
//! └────────────┘    └────────────┘    └───────────┘    └─────────────┘
//! ```

use std::io;

use tracing::{debug, warn};

use crate::pixel::Rgb24Converter;

// ============================================================================
// Constants
// ============================================================================

/// Samples (per channel) in one MPEG-1 Layer II audio frame
pub const AUDIO_SAMPLES_PER_FRAME: usize = 1152;

/// Picture start code value (00 00 01 00)
pub const PICTURE_START_CODE: u8 = 0x00;

/// Sequence header start code value (00 00 01 B3)
pub const SEQUENCE_HEADER_CODE: u8 = 0xB3;

/// Frame rates indexed by the sequence header `picture_rate` code
pub const PICTURE_RATES: [f64; 16] = [
    0.000, 23.976, 24.000, 25.000, 29.970, 30.000, 50.000, 59.940, 60.000, 0.000, 0.000, 0.000,
    0.000, 0.000, 0.000, 0.000,
];

// ============================================================================
// Picture Types / Headers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureType {
    Intra,
    Predictive,
    B,
    DcOnly,
}

impl PictureType {
    /// Map the 3-bit `picture_coding_type` field
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Intra),
            2 => Some(Self::Predictive),
            3 => Some(Self::B),
            4 => Some(Self::DcOnly),
            _ => None,
        }
    }

    /// P and B pictures carry forward motion vectors (and an f_code)
    pub fn has_motion(&self) -> bool {
        matches!(self, Self::Predictive | Self::B)
    }
}

/// The motion-vector fields of a picture header the codec is about to consume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureHeader {
    pub picture_type: PictureType,
    pub temporal_sequence_number: u16,
    /// `forward_f_code - 1`
    pub forward_r_size: u8,
    /// `backward_f_code - 1`
    pub backward_r_size: u8,
}

/// Invoked by the codec after parsing each picture header, before decoding its slices
pub type PictureHeaderHook = Box<dyn FnMut(&mut PictureHeader) + Send>;

// ============================================================================
// Decoded Output
// ============================================================================

/// A decoded picture in planar YCbCr 4:2:0
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: usize,
    pub height: usize,
    pub y: Vec<u8>,
    pub cb: Vec<u8>,
    pub cr: Vec<u8>,
}

impl VideoFrame {
    /// A black frame of the given size
    pub fn new(width: usize, height: usize) -> Self {
        let chroma = Self::chroma_len(width) * Self::chroma_len(height);
        Self {
            width,
            height,
            y: vec![16; width * height],
            cb: vec![128; chroma],
            cr: vec![128; chroma],
        }
    }

    /// Chroma samples along one axis of a 4:2:0 picture
    pub fn chroma_len(luma: usize) -> usize {
        (luma + 1) / 2
    }
}

/// One decoded audio frame, interleaved left/right, nominally in [-1.0, 1.0]
#[derive(Debug, Clone, Default)]
pub struct AudioSamples {
    pub interleaved: Vec<f32>,
}

impl AudioSamples {
    pub fn new(interleaved: Vec<f32>) -> Self {
        Self { interleaved }
    }
}

// ============================================================================
// Byte Source
// ============================================================================

/// Emulated file handle backing an asset
pub trait ByteSource: Send {
    /// Read into `buf`. `Ok(0)` signals end of file.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Seek to an absolute offset
    fn seek(&mut self, offset: u64) -> io::Result<()>;

    fn size(&self) -> u64;

    fn name(&self) -> &str;
}

/// Adapts a [`ByteSource`] to the codec's buffer-load and buffer-seek requests.
///
/// Source failures never escape: a failed or empty read is end of stream for that
/// request, a failed seek is logged and ignored.
pub struct SourceFeed {
    source: Box<dyn ByteSource>,
}

impl SourceFeed {
    /// Largest single load request
    pub const LOAD_CHUNK: usize = 4096;

    pub fn new(source: Box<dyn ByteSource>) -> Self {
        Self { source }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn size(&self) -> u64 {
        self.source.size()
    }

    /// Append up to `min(room, LOAD_CHUNK)` bytes to `buffer`.
    ///
    /// Returns the number of bytes appended; 0 means the codec should treat the
    /// stream as ended.
    pub fn load(&mut self, buffer: &mut Vec<u8>, room: usize) -> usize {
        let want = room.min(Self::LOAD_CHUNK);
        if want == 0 {
            return 0;
        }

        let start = buffer.len();
        buffer.resize(start + want, 0);
        match self.source.read(&mut buffer[start..]) {
            Ok(n) => {
                let n = n.min(want);
                buffer.truncate(start + n);
                n
            }
            Err(e) => {
                debug!("Read failed on {}: {}", self.source.name(), e);
                buffer.truncate(start);
                0
            }
        }
    }

    pub fn seek(&mut self, offset: u64) {
        if let Err(e) = self.source.seek(offset) {
            warn!("Seek to {} failed on {}: {}", offset, self.source.name(), e);
        }
    }
}

// ============================================================================
// Bit Reader / Codec Traits
// ============================================================================

/// Bit-level access to the video elementary stream
pub trait BitReader {
    /// Advance past the next `00 00 01 <code>` start code. `false` when none is left.
    fn find_start_code(&mut self, code: u8) -> bool;

    /// Read `bits` (at most 32) bits MSB first. Reads past the end yield zeros.
    fn read(&mut self, bits: u32) -> u32;

    fn skip(&mut self, bits: u32);
}

/// MPEG-1 decoder consumed by the player
pub trait MpegCodec: Send {
    /// Whether a system (PS) stream with headers was detected
    fn has_headers(&mut self) -> bool;

    /// Re-initialize as a video elementary stream decoder (no demux, no audio)
    fn use_video_elementary_stream(&mut self);

    /// Whether the demux reads from a different buffer than the video decoder
    fn has_distinct_demux(&self) -> bool;

    fn video_enabled(&self) -> bool;

    fn audio_enabled(&self) -> bool;

    fn set_audio_enabled(&mut self, enabled: bool);

    /// Whether an audio decoder exists at all
    fn has_audio_decoder(&self) -> bool;

    fn width(&self) -> usize;

    fn height(&self) -> usize;

    fn framerate(&self) -> f64;

    fn set_framerate(&mut self, framerate: f64);

    /// Raw `picture_rate` code from the sequence header (may be out of range)
    fn picture_rate_code(&self) -> u8;

    fn samplerate(&self) -> u32;

    /// Decode the next picture. `None` at end of stream, and exactly once when looping wraps.
    fn decode_video(&mut self) -> Option<VideoFrame>;

    /// Decode the next audio frame from already buffered data
    fn decode_audio(&mut self) -> Option<AudioSamples>;

    /// Bytes still buffered for the audio decoder
    fn audio_bytes_remaining(&self) -> usize;

    /// Force the audio decoder to re-sync on its next frame header
    fn reset_audio_header(&mut self);

    fn rewind(&mut self);

    fn loop_enabled(&self) -> bool;

    fn set_loop(&mut self, enabled: bool);

    /// Seek the demux buffer to an absolute byte offset
    fn seek_demux(&mut self, offset: u64);

    /// Current read position of the demux buffer
    fn demux_position(&self) -> u64;

    /// Bit reader positioned on the video decoder's buffer
    fn video_bits(&mut self) -> &mut dyn BitReader;

    fn set_picture_header_hook(&mut self, hook: PictureHeaderHook);

    /// Convert `frame` to packed RGB24 with `stride` bytes per output row
    fn frame_to_rgb(&self, frame: &VideoFrame, out: &mut [u8], stride: usize) {
        Rgb24Converter::shared().convert(frame, out, stride);
    }
}

/// Creates a codec on top of a source feed. `None` when the decoder cannot be created.
pub trait CodecFactory: Send + Sync {
    fn create(&self, feed: SourceFeed) -> Option<Box<dyn MpegCodec>>;
}

// ============================================================================
// Tests
// ============================================================================
