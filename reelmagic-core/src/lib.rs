//! # ReelMagic Core
//!
//! Player pipeline of an emulated ReelMagic MPEG decoder card: players and their
//! handles, refresh-paced decoding, the audio FIFO drained by the mixer, and the
//! "magic key" f_code repair for protected assets.

// ============================================================================
// Codec Boundary
// ============================================================================
pub mod codec;
pub mod bitstream;
pub mod pixel;

// ============================================================================
// Player Pipeline
// ============================================================================
pub mod audio_fifo;
pub mod magic_key;
pub mod player;
pub mod registry;
pub mod subsystem;

// ============================================================================
// Configuration / Errors
// ============================================================================
pub mod config;
pub mod error;

#[cfg(test)]
mod testing;

pub use config::{PlayerConfiguration, ReelMagicSettings};
pub use error::{ReelMagicError, ReelMagicResult};
pub use player::{MediaPlayer, PlayMode, PlaybackState, SharedPlayer};
pub use registry::{Handle, INVALID_HANDLE};
pub use subsystem::{AudioPump, AudioSink, Subsystem, VideoMixer};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
