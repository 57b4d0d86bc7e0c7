//! Test doubles: an in-memory byte source, a bit writer for synthetic
//! bitstreams, and a scripted codec with observable counters.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bitstream::BitBuffer;
use crate::codec::{
    AudioSamples, BitReader, ByteSource, CodecFactory, MpegCodec, PictureHeader,
    PictureHeaderHook, PictureType, SourceFeed, VideoFrame, AUDIO_SAMPLES_PER_FRAME,
    PICTURE_START_CODE,
};

// ============================================================================
// Byte Source
// ============================================================================

pub struct MemorySource {
    name: String,
    data: Vec<u8>,
    pos: usize,
    released: Arc<AtomicBool>,
}

impl MemorySource {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            data,
            pos: 0,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag set when the source is dropped
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.len().saturating_sub(self.pos));
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.pos = (offset as usize).min(self.data.len());
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for MemorySource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Bit Writer
// ============================================================================

#[derive(Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, value: u32, count: u32) {
        for i in (0..count).rev() {
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            let bit = ((value >> i) & 1) as u8;
            let last = self.bytes.len() - 1;
            self.bytes[last] |= bit << (7 - (self.bits % 8));
            self.bits += 1;
        }
    }

    pub fn start_code(&mut self, code: u8) {
        self.bits = self.bytes.len() * 8;
        self.bytes.extend_from_slice(&[0x00, 0x00, 0x01, code]);
        self.bits += 32;
    }

    /// Append a picture header up to and including forward_f_code
    pub fn picture(&mut self, temporal_sequence_number: u32, picture_type: u32, f_code: u32) {
        self.start_code(PICTURE_START_CODE);
        self.put(temporal_sequence_number, 10);
        self.put(picture_type, 3);
        self.put(0xFFFF, 16);
        if picture_type == 2 || picture_type == 3 {
            self.put(0, 1);
            self.put(f_code, 3);
        }
        // byte-aligned padding so the next start code is found cleanly
        self.put(0xFF, 8);
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

// ============================================================================
// Scripted Codec
// ============================================================================

#[derive(Debug, Clone)]
pub struct CodecScript {
    pub fail_create: bool,
    pub headers: bool,
    pub distinct_demux: bool,
    pub video: bool,
    pub audio: bool,
    pub width: usize,
    pub height: usize,
    pub framerate: f64,
    pub picture_rate_code: u8,
    pub samplerate: u32,
    pub total_frames: usize,
    pub audio_blocks_per_frame: usize,
    pub bytes_per_frame: u64,
    pub bitstream: Vec<u8>,
}

impl Default for CodecScript {
    /// MPEG-PS, 320x240 @ 30fps with 44.1kHz audio
    fn default() -> Self {
        Self {
            fail_create: false,
            headers: true,
            distinct_demux: true,
            video: true,
            audio: true,
            width: 320,
            height: 240,
            framerate: 30.0,
            picture_rate_code: 5,
            samplerate: 44100,
            total_frames: 100,
            audio_blocks_per_frame: 1,
            bytes_per_frame: 3000,
            bitstream: Vec::new(),
        }
    }
}

impl CodecScript {
    /// Video elementary stream only
    pub fn video_only() -> Self {
        Self {
            headers: false,
            distinct_demux: false,
            audio: false,
            samplerate: 0,
            ..Self::default()
        }
    }
}

/// Counters shared between a scripted codec and the test
#[derive(Default)]
pub struct CodecProbe {
    pub video_decodes: AtomicUsize,
    pub frames_returned: AtomicUsize,
    pub rewinds: AtomicUsize,
    pub audio_header_resets: AtomicUsize,
    pub es_fallback: AtomicBool,
    pub last_seek: AtomicU64,
    pub hooked_headers: Mutex<Vec<PictureHeader>>,
}

pub struct ScriptedCodec {
    script: CodecScript,
    probe: Arc<CodecProbe>,
    _feed: SourceFeed,
    frame_index: usize,
    looping: bool,
    audio_enabled: bool,
    audio_decoder: bool,
    audio_buffered: usize,
    demux_pos: u64,
    framerate: f64,
    bits: BitBuffer,
    hook: Option<PictureHeaderHook>,
}

impl ScriptedCodec {
    pub fn new(script: CodecScript, probe: Arc<CodecProbe>, feed: SourceFeed) -> Self {
        Self {
            looping: false,
            audio_enabled: script.audio,
            audio_decoder: script.audio,
            audio_buffered: 0,
            demux_pos: 0,
            framerate: script.framerate,
            bits: BitBuffer::new(script.bitstream.clone()),
            hook: None,
            frame_index: 0,
            _feed: feed,
            probe,
            script,
        }
    }
}

impl MpegCodec for ScriptedCodec {
    fn has_headers(&mut self) -> bool {
        self.script.headers
    }

    fn use_video_elementary_stream(&mut self) {
        self.probe.es_fallback.store(true, Ordering::SeqCst);
        self.audio_decoder = false;
        self.audio_enabled = false;
        self.script.distinct_demux = false;
    }

    fn has_distinct_demux(&self) -> bool {
        self.script.distinct_demux
    }

    fn video_enabled(&self) -> bool {
        self.script.video
    }

    fn audio_enabled(&self) -> bool {
        self.audio_decoder && self.audio_enabled
    }

    fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
    }

    fn has_audio_decoder(&self) -> bool {
        self.audio_decoder
    }

    fn width(&self) -> usize {
        self.script.width
    }

    fn height(&self) -> usize {
        self.script.height
    }

    fn framerate(&self) -> f64 {
        self.framerate
    }

    fn set_framerate(&mut self, framerate: f64) {
        self.framerate = framerate;
    }

    fn picture_rate_code(&self) -> u8 {
        self.script.picture_rate_code
    }

    fn samplerate(&self) -> u32 {
        self.script.samplerate
    }

    fn decode_video(&mut self) -> Option<VideoFrame> {
        self.probe.video_decodes.fetch_add(1, Ordering::SeqCst);
        if self.frame_index >= self.script.total_frames {
            if self.looping {
                self.frame_index = 0;
                self.demux_pos = 0;
            }
            return None;
        }

        if let Some(hook) = self.hook.as_mut() {
            let mut header = PictureHeader {
                picture_type: if self.frame_index % 2 == 0 {
                    PictureType::Predictive
                } else {
                    PictureType::B
                },
                temporal_sequence_number: self.frame_index as u16,
                forward_r_size: 6,
                backward_r_size: 6,
            };
            hook(&mut header);
            self.probe.hooked_headers.lock().push(header);
        }

        let mut frame = VideoFrame::new(self.script.width, self.script.height);
        frame.y.iter_mut().for_each(|y| *y = (100 + self.frame_index % 100) as u8);
        self.frame_index += 1;
        self.demux_pos += self.script.bytes_per_frame;
        if self.audio_enabled() {
            self.audio_buffered += self.script.audio_blocks_per_frame;
        }
        self.probe.frames_returned.fetch_add(1, Ordering::SeqCst);
        Some(frame)
    }

    fn decode_audio(&mut self) -> Option<AudioSamples> {
        if self.audio_buffered == 0 {
            return None;
        }
        self.audio_buffered -= 1;
        Some(AudioSamples::new(vec![0.25; AUDIO_SAMPLES_PER_FRAME * 2]))
    }

    fn audio_bytes_remaining(&self) -> usize {
        self.audio_buffered * 417
    }

    fn reset_audio_header(&mut self) {
        self.probe.audio_header_resets.fetch_add(1, Ordering::SeqCst);
    }

    fn rewind(&mut self) {
        self.probe.rewinds.fetch_add(1, Ordering::SeqCst);
        self.frame_index = 0;
        self.demux_pos = 0;
        self.audio_buffered = 0;
        self.bits.rewind();
    }

    fn loop_enabled(&self) -> bool {
        self.looping
    }

    fn set_loop(&mut self, enabled: bool) {
        self.looping = enabled;
    }

    fn seek_demux(&mut self, offset: u64) {
        self.probe.last_seek.store(offset, Ordering::SeqCst);
        self.demux_pos = offset;
        if self.script.bytes_per_frame > 0 {
            self.frame_index = (offset / self.script.bytes_per_frame) as usize;
        }
    }

    fn demux_position(&self) -> u64 {
        self.demux_pos
    }

    fn video_bits(&mut self) -> &mut dyn BitReader {
        &mut self.bits
    }

    fn set_picture_header_hook(&mut self, hook: PictureHeaderHook) {
        self.hook = Some(hook);
    }
}

pub struct ScriptedFactory {
    pub script: CodecScript,
    pub probe: Arc<CodecProbe>,
}

impl ScriptedFactory {
    pub fn new(script: CodecScript) -> Self {
        Self {
            script,
            probe: Arc::new(CodecProbe::default()),
        }
    }
}

impl CodecFactory for ScriptedFactory {
    fn create(&self, feed: SourceFeed) -> Option<Box<dyn MpegCodec>> {
        if self.script.fail_create {
            return None;
        }
        Some(Box::new(ScriptedCodec::new(
            self.script.clone(),
            self.probe.clone(),
            feed,
        )))
    }
}
