//! # Media Player
//!
//! One player per opened asset. The player owns the codec, its audio FIFO and its
//! configuration, and is driven from two sides:
//!
//! - Client commands (`play`, `pause`, `stop`, `seek_to_byte_offset`)
//! - The video refresh tick (`on_vertical_refresh`), which paces decoding to the
//!   display rate and feeds decoded audio into the FIFO
//!
//! ```text
//!            play(mode)              end of stream / stop()
//!   Stopped ───────────► Playing ─────────────────────────► Stopped
//!                         │  ▲
//!                 pause() │  │ play(mode)
//!                         ▼  │
//!                        Paused
//! ```
//!
//! Players are shared as [`SharedPlayer`]: the handle registry holds the strong
//! references, the active display and audio roles only hold weak ones.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::audio_fifo::{AudioSampleFifo, FifoSettings};
use crate::codec::{ByteSource, CodecFactory, MpegCodec, SourceFeed, VideoFrame, PICTURE_RATES};
use crate::config::PlayerConfiguration;
use crate::error::{ReelMagicError, ReelMagicResult};
use crate::magic_key::{r_size_override, MagicKeyResolver};
use crate::registry::{Handle, INVALID_HANDLE};
use crate::subsystem::ActiveRoles;

/// Registry-owned reference to a player
pub type SharedPlayer = Arc<Mutex<MediaPlayer>>;

/// Framerate used when the asset does not declare a usable one
const FALLBACK_FRAMERATE: f64 = 30.0;

/// `bytes_decoded` granularity
const DECODE_BLOCK: u64 = 4096;

// ============================================================================
// Public Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    Loop,
    StopOnComplete,
    FreeRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PictureSize {
    pub width: u16,
    pub height: u16,
}

/// Handles bound to a player. Unused entries are [`INVALID_HANDLE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerHandles {
    pub base: Handle,
    pub demux: Handle,
    pub video: Handle,
    pub audio: Handle,
}

impl Default for PlayerHandles {
    fn default() -> Self {
        Self {
            base: INVALID_HANDLE,
            demux: INVALID_HANDLE,
            video: INVALID_HANDLE,
            audio: INVALID_HANDLE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerAttributes {
    pub picture_size: PictureSize,
    pub handles: PlayerHandles,
}

/// Streams a player exposes, in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Demux,
    Video,
    Audio,
}

/// What the video mixer needs to know about the active display provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub name: String,
    pub config: PlayerConfiguration,
    pub attributes: PlayerAttributes,
}

// ============================================================================
// Refresh Pacing
// ============================================================================

/// Fractional display-frames-per-decoded-frame accumulator
#[derive(Debug, Clone, Copy)]
struct Pacing {
    display_fps: f64,
    ratio: f64,
    wait: f64,
    draw_pending: bool,
}

impl Pacing {
    fn new() -> Self {
        Self {
            display_fps: 0.0,
            ratio: 1.0,
            wait: 0.0,
            draw_pending: false,
        }
    }

    /// Force a timing reset and redraw on the next refresh
    fn reset(&mut self) {
        self.display_fps = 0.0;
    }

    /// Adopt a new display rate. `false` when the rate cannot pace decoding.
    fn retime(&mut self, display_fps: f64, framerate: f64) -> bool {
        let ratio = display_fps / framerate;
        if !(display_fps.is_finite() && ratio.is_finite() && ratio > 0.0) {
            return false;
        }
        if display_fps != self.display_fps {
            self.display_fps = display_fps;
            self.ratio = ratio;
            self.wait = ratio;
            self.draw_pending = true;
        }
        true
    }
}

// ============================================================================
// Media Player
// ============================================================================

pub struct MediaPlayer {
    self_ref: Weak<Mutex<MediaPlayer>>,
    roles: Arc<ActiveRoles>,
    name: String,
    config: PlayerConfiguration,
    attrs: PlayerAttributes,
    codec: Box<dyn MpegCodec>,
    fifo: Arc<Mutex<AudioSampleFifo>>,
    next_frame: VideoFrame,
    state: PlaybackState,
    stop_on_complete: bool,
    has_demux: bool,
    has_video: bool,
    has_audio: bool,
    pacing: Pacing,
    frames_decoded: u64,
}

impl MediaPlayer {
    /// Open an asset: create its codec, detect stream layout, recover the magic
    /// f_code and decode the first frame.
    ///
    /// Any failure drops the codec, which releases `source`.
    pub fn open(
        source: Box<dyn ByteSource>,
        config: PlayerConfiguration,
        fifo_settings: &FifoSettings,
        factory: &dyn CodecFactory,
        roles: Arc<ActiveRoles>,
    ) -> ReelMagicResult<SharedPlayer> {
        let feed = SourceFeed::new(source);
        let name = feed.name().to_string();

        let Some(mut codec) = factory.create(feed) else {
            error!("Failed creating media player: MPEG type-detection failed {}", name);
            return Err(ReelMagicError::AssetOpen(name));
        };

        let system_stream = codec.has_headers();
        if !system_stream {
            codec.use_video_elementary_stream();
        }

        let mut fifo = AudioSampleFifo::new(fifo_settings);
        if codec.has_audio_decoder() {
            fifo.set_sample_rate(codec.samplerate());
        }

        let picture_size = collect_video_stats(codec.as_mut(), &config);

        let Some(first_frame) = decode_next_frame(codec.as_mut()) else {
            error!("Failed creating media player: no first frame in {}", name);
            return Err(ReelMagicError::AssetOpen(name));
        };
        if picture_size.width == 0 || picture_size.height == 0 {
            error!("Failed creating media player: zero picture size in {}", name);
            return Err(ReelMagicError::AssetOpen(name));
        }

        info!(
            "Created Media Player {} {}x{} @ {:.2}fps {}",
            if system_stream { "MPEG-PS" } else { "MPEG-ES" },
            picture_size.width,
            picture_size.height,
            codec.framerate(),
            name
        );
        if codec.audio_enabled() {
            info!("Media Player Audio Decoder Enabled @ {}Hz", codec.samplerate());
        }

        let has_demux = codec.has_distinct_demux();
        let has_video = codec.video_enabled();
        let has_audio = codec.audio_enabled();
        let fifo = Arc::new(Mutex::new(fifo));

        Ok(Arc::new_cyclic(|self_ref| {
            Mutex::new(Self {
                self_ref: self_ref.clone(),
                roles,
                name,
                config,
                attrs: PlayerAttributes {
                    picture_size,
                    handles: PlayerHandles::default(),
                },
                codec,
                fifo,
                next_frame: first_frame,
                state: PlaybackState::Stopped,
                stop_on_complete: false,
                has_demux,
                has_video,
                has_audio,
                pacing: Pacing::new(),
                frames_decoded: 1,
            })
        }))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn config(&self) -> &PlayerConfiguration {
        &self.config
    }

    /// Mutable access for the driver. Follow with [`notify_config_change`](Self::notify_config_change).
    pub fn config_mut(&mut self) -> &mut PlayerConfiguration {
        &mut self.config
    }

    pub fn attributes(&self) -> &PlayerAttributes {
        &self.attrs
    }

    pub fn has_demux(&self) -> bool {
        self.has_demux
    }

    pub fn has_video(&self) -> bool {
        self.has_video
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    /// Streams needing a handle, in registration order
    pub fn streams(&self) -> Vec<StreamKind> {
        [
            (self.has_demux, StreamKind::Demux),
            (self.has_video, StreamKind::Video),
            (self.has_audio, StreamKind::Audio),
        ]
        .into_iter()
        .filter_map(|(present, kind)| present.then_some(kind))
        .collect()
    }

    pub fn framerate(&self) -> f64 {
        self.codec.framerate()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Demux read position rounded up to the next 4k block
    pub fn bytes_decoded(&self) -> u64 {
        let pos = self.codec.demux_position();
        (pos + DECODE_BLOCK - 1) & !(DECODE_BLOCK - 1)
    }

    pub fn audio_fifo(&self) -> &Arc<Mutex<AudioSampleFifo>> {
        &self.fifo
    }

    pub fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.name.clone(),
            config: self.config.clone(),
            attributes: self.attrs,
        }
    }

    // ========================================================================
    // Handle Registration
    // ========================================================================

    pub fn register_base_handle(&mut self, handle: Handle) {
        self.attrs.handles.base = handle;
    }

    pub fn register_stream_handle(&mut self, kind: StreamKind, handle: Handle) {
        match kind {
            StreamKind::Demux => self.attrs.handles.demux = handle,
            StreamKind::Video => self.attrs.handles.video = handle,
            StreamKind::Audio => self.attrs.handles.audio = handle,
        }
    }

    pub fn base_handle(&self) -> Handle {
        self.attrs.handles.base
    }

    pub fn clear_handles(&mut self) {
        self.attrs.handles = PlayerHandles::default();
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub fn play(&mut self, mode: PlayMode) {
        if self.is_playing() {
            return;
        }
        self.state = PlaybackState::Playing;
        self.codec.set_loop(mode == PlayMode::Loop);
        self.stop_on_complete = mode == PlayMode::StopOnComplete;

        self.roles.set_display(self.self_ref.clone(), self.provider_info());
        let sample_rate = self.fifo.lock().sample_rate();
        if sample_rate != 0 {
            self.roles.activate_audio(&self.fifo, sample_rate);
        }
        self.pacing.reset();
        debug!("{} playing ({:?})", self.name, mode);
    }

    pub fn pause(&mut self) {
        if self.is_playing() {
            self.state = PlaybackState::Paused;
        }
    }

    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.roles.clear_display(&self.self_ref);
    }

    pub fn seek_to_byte_offset(&mut self, offset: u64) {
        self.codec.rewind();
        self.codec.seek_demux(offset);
        self.fifo.lock().clear();
        // audio parameters may change between seek points
        self.codec.reset_audio_header();
        self.advance_next_frame();
    }

    /// Re-publish the configuration if this player is on screen
    pub fn notify_config_change(&self) {
        if self.roles.is_display(&self.self_ref) {
            self.roles.set_display(self.self_ref.clone(), self.provider_info());
        }
    }

    // ========================================================================
    // Refresh Tick
    // ========================================================================

    /// Called once per emulated display refresh while this player is the display provider
    pub fn on_vertical_refresh(&mut self, out: &mut [u8], display_fps: f64) {
        let paced = self.pacing.retime(display_fps, self.codec.framerate());
        if !paced {
            warn!("{} ignoring refresh at {} fps", self.name, display_fps);
        }

        if self.pacing.draw_pending {
            let stride = self.attrs.picture_size.width as usize * 3;
            self.codec.frame_to_rgb(&self.next_frame, out, stride);
            self.decode_buffered_audio();
            self.pacing.draw_pending = false;
        }

        if paced && self.is_playing() {
            self.pacing.wait -= 1.0;
            while self.pacing.wait < 0.0 && self.is_playing() {
                self.advance_next_frame();
                self.pacing.draw_pending = true;
                self.pacing.wait += self.pacing.ratio;
            }
        }

        if !self.is_playing() && self.stop_on_complete {
            self.roles.clear_display(&self.self_ref);
        }
    }

    fn advance_next_frame(&mut self) {
        match decode_next_frame(self.codec.as_mut()) {
            Some(frame) => {
                self.next_frame = frame;
                self.frames_decoded += 1;
            }
            None => {
                debug!("{} reached end of stream", self.name);
                self.state = PlaybackState::Stopped;
            }
        }
    }

    fn decode_buffered_audio(&mut self) {
        if !self.codec.has_audio_decoder() {
            return;
        }
        while self.codec.audio_bytes_remaining() > 0 {
            let Some(samples) = self.codec.decode_audio() else {
                break;
            };
            self.fifo.lock().produce(&samples);
        }
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        info!("Destroying Media Player #{} with file {}", self.attrs.handles.base, self.name);
        self.roles.deactivate_audio(&Arc::downgrade(&self.fifo));
        self.roles.clear_display(&self.self_ref);
    }
}

// ============================================================================
// Codec Setup Helpers
// ============================================================================

/// Decode one picture, retrying once across a loop boundary
fn decode_next_frame(codec: &mut dyn MpegCodec) -> Option<VideoFrame> {
    codec.decode_video().or_else(|| {
        if codec.loop_enabled() {
            codec.decode_video()
        } else {
            None
        }
    })
}

/// Picture size, plus the magic f_code and framerate fixups for protected assets
fn collect_video_stats(codec: &mut dyn MpegCodec, config: &PlayerConfiguration) -> PictureSize {
    let size = PictureSize {
        width: codec.width().min(u16::MAX as usize) as u16,
        height: codec.height().min(u16::MAX as usize) as u16,
    };

    let rate_code = codec.picture_rate_code();
    if size.width != 0 && size.height != 0 && rate_code >= 0x9 {
        info!("Detected a magical picture_rate code of 0x{:X}", rate_code);
        let f_code = match config.fcode_override {
            0 => MagicKeyResolver::new(config.magic_decode_key).resolve(codec),
            forced => forced,
        };
        if f_code != 0 {
            info!("Applying magic f_code {} to P and B pictures", f_code);
            codec.set_picture_header_hook(r_size_override(f_code - 1));
        } else {
            warn!("No magical f_code found. Playback will likely be screwed up");
        }
        codec.set_framerate(PICTURE_RATES[(rate_code & 0x7) as usize]);
    }

    if codec.framerate() == 0.0 {
        error!(
            "Detected a bad framerate. Hardcoding to {}. This video will likely not play properly",
            FALLBACK_FRAMERATE
        );
        codec.set_framerate(FALLBACK_FRAMERATE);
    }

    size
}

// ============================================================================
// Tests
// ============================================================================
