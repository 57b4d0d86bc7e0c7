//! Settings and per-player configuration
//!
//! `ReelMagicSettings` holds the process-wide tunables (normally read once from the
//! emulator's config section or a JSON file). `PlayerConfiguration` is the mutable
//! per-player state the driver pokes at; every new player starts from the
//! subsystem's default template.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audio_fifo::FifoSettings;
use crate::error::ReelMagicResult;
use crate::magic_key::{COMMON_MAGIC_KEY, THEHORDE_MAGIC_KEY};
use crate::registry::{Handle, HandleRange, FIRST_HANDLE, LAST_HANDLE};

// ============================================================================
// Global Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReelMagicSettings {
    /// Gain applied when converting decoded audio to 16-bit PCM
    pub audio_level: f32,
    /// Audio FIFO slots per player (at most 100)
    pub audio_fifo_size: usize,
    /// Slots thrown away when the FIFO overflows
    pub audio_fifo_dispose: usize,
    /// "auto", "common", "thehorde" or a hex key
    pub magic_key: String,
    /// Forced f_code for magical assets, 0 = scan the stream
    pub fcode: i32,
    pub first_handle: Handle,
    pub last_handle: Handle,
}

impl Default for ReelMagicSettings {
    fn default() -> Self {
        Self {
            audio_level: 1.5,
            audio_fifo_size: 20,
            audio_fifo_dispose: 5,
            magic_key: "auto".to_string(),
            fcode: 0,
            first_handle: FIRST_HANDLE,
            last_handle: LAST_HANDLE,
        }
    }
}

impl ReelMagicSettings {
    pub fn from_json(json: &str) -> ReelMagicResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> ReelMagicResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let settings = Self::from_json(&json)?;
        info!("Loaded ReelMagic settings from {:?}", path);
        Ok(settings)
    }

    pub fn fifo_settings(&self) -> FifoSettings {
        FifoSettings {
            capacity: self.audio_fifo_size,
            dispose_count: self.audio_fifo_dispose,
            level: self.audio_level,
        }
    }

    pub fn handle_range(&self) -> HandleRange {
        HandleRange::new(self.first_handle, self.last_handle)
    }

    /// Key every new player starts with
    pub fn initial_magic_key(&self) -> u32 {
        parse_magic_key(&self.magic_key)
    }

    /// Validated f_code override, 0 when the stream should be scanned
    pub fn fcode_override(&self) -> u8 {
        parse_fcode(self.fcode)
    }

    /// Template new players copy their configuration from
    pub fn default_player_config(&self) -> PlayerConfiguration {
        PlayerConfiguration {
            magic_decode_key: self.initial_magic_key(),
            fcode_override: self.fcode_override(),
            ..PlayerConfiguration::default()
        }
    }
}

/// Resolve a magic key choice. Unparseable choices fall back to the common key.
pub fn parse_magic_key(choice: &str) -> u32 {
    let choice = choice.trim();
    match choice {
        "auto" => COMMON_MAGIC_KEY,
        "common" => {
            info!("Using the common key: 0x{:x}", COMMON_MAGIC_KEY);
            COMMON_MAGIC_KEY
        }
        "thehorde" => {
            info!("Using The Horde's key: 0x{:x}", THEHORDE_MAGIC_KEY);
            THEHORDE_MAGIC_KEY
        }
        _ => {
            let digits = choice
                .strip_prefix("0x")
                .or_else(|| choice.strip_prefix("0X"))
                .unwrap_or(choice);
            match u32::from_str_radix(digits, 16) {
                Ok(key) => {
                    info!("Using custom key: 0x{:x}", key);
                    key
                }
                Err(_) => {
                    warn!(
                        "Failed parsing key choice '{}', using built-in routines",
                        choice
                    );
                    COMMON_MAGIC_KEY
                }
            }
        }
    }
}

/// Validate an f_code override choice (0 = none, 1..=7 = forced)
pub fn parse_fcode(choice: i32) -> u8 {
    match choice {
        0 => 0,
        1..=7 => {
            info!(
                "Overriding the frame rate to {} FPS (code {})",
                fcode_fps_label(choice as u8),
                choice
            );
            choice as u8
        }
        _ => {
            warn!(
                "Frame rate code '{}' is not between 0 and 7, using built-in routines",
                choice
            );
            0
        }
    }
}

fn fcode_fps_label(code: u8) -> &'static str {
    match code {
        1 => "23.976",
        2 => "24",
        3 => "25",
        4 => "29.97",
        5 => "30",
        6 => "50",
        7 => "59.94",
        _ => "unknown",
    }
}

// ============================================================================
// Player Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayPosition {
    pub x: u16,
    pub y: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfiguration {
    pub magic_decode_key: u32,
    pub video_output_visible: bool,
    /// Draw the MPEG layer underneath VGA output
    pub under_vga: bool,
    pub vga_alpha_index: u8,
    pub display_position: DisplayPosition,
    pub display_size: DisplaySize,
    /// 0 = recover the f_code from the stream
    pub fcode_override: u8,
}

impl Default for PlayerConfiguration {
    fn default() -> Self {
        Self {
            magic_decode_key: COMMON_MAGIC_KEY,
            video_output_visible: true,
            under_vga: false,
            vga_alpha_index: 0,
            display_position: DisplayPosition::default(),
            display_size: DisplaySize::default(),
            fcode_override: 0,
        }
    }
}
