//! # ReelMagic Subsystem
//!
//! The owned root of the player pipeline. One `Subsystem` is built at emulator
//! start and handed to both periodic callers:
//!
//! ```text
//!  driver API ──► Subsystem ──► HandleRegistry ──► SharedPlayer (strong)
//!                    │
//!                    ├── ActiveRoles.display ··► player  (weak)
//!                    └── ActiveRoles.audio   ··► FIFO    (weak)
//!
//!  video refresh ──► Subsystem::vertical_refresh ──► display provider
//!  audio pull    ──► AudioPump::pull ──► active FIFO (try_lock, never waits)
//! ```
//!
//! Each role is a lock-guarded `Weak`. Readers only hold the lock long enough to
//! upgrade it, so dropping a player (which clears the roles) never races a
//! reader into a dangling reference.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::audio_fifo::{AudioSampleFifo, StereoSample};
use crate::codec::{ByteSource, CodecFactory};
use crate::config::{PlayerConfiguration, ReelMagicSettings};
use crate::error::ReelMagicResult;
use crate::player::{MediaPlayer, ProviderInfo, SharedPlayer};
use crate::registry::{Handle, HandleRegistry};

// ============================================================================
// Outbound Interfaces
// ============================================================================

/// Display sink notified whenever the MPEG display provider changes
pub trait VideoMixer: Send + Sync {
    /// `None` when no player is on screen. Must not call back into the player.
    fn provider_changed(&self, provider: Option<ProviderInfo>);
}

/// Mixer that ignores provider changes
pub struct NullVideoMixer;

impl VideoMixer for NullVideoMixer {
    fn provider_changed(&self, _provider: Option<ProviderInfo>) {}
}

/// Host audio channel fed by [`AudioPump`]
pub trait AudioSink {
    fn set_sample_rate(&mut self, rate: u32);

    fn add_samples(&mut self, samples: &[StereoSample]);

    fn add_silence(&mut self, frames: usize);
}

// ============================================================================
// Active Roles
// ============================================================================

/// A single shared weak reference, swapped atomically
pub struct ActiveSlot<T> {
    cell: RwLock<Weak<T>>,
}

impl<T> ActiveSlot<T> {
    pub fn new() -> Self {
        Self {
            cell: RwLock::new(Weak::new()),
        }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.read().upgrade()
    }

    pub fn set(&self, target: Weak<T>) {
        *self.cell.write() = target;
    }

    pub fn holds(&self, target: &Weak<T>) -> bool {
        self.cell.read().ptr_eq(target)
    }

    /// Empty the slot if it points at `target`
    pub fn clear_if(&self, target: &Weak<T>) -> bool {
        let mut cell = self.cell.write();
        if cell.ptr_eq(target) {
            *cell = Weak::new();
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        *self.cell.write() = Weak::new();
    }
}

impl<T> Default for ActiveSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The display provider and the audio source, shared by every player
pub struct ActiveRoles {
    display: ActiveSlot<Mutex<MediaPlayer>>,
    audio: ActiveSlot<Mutex<AudioSampleFifo>>,
    requested_sample_rate: AtomicU32,
    mixer: Arc<dyn VideoMixer>,
}

impl ActiveRoles {
    pub fn new(mixer: Arc<dyn VideoMixer>) -> Self {
        Self {
            display: ActiveSlot::new(),
            audio: ActiveSlot::new(),
            requested_sample_rate: AtomicU32::new(0),
            mixer,
        }
    }

    pub fn display(&self) -> Option<SharedPlayer> {
        self.display.get()
    }

    pub fn is_display(&self, player: &Weak<Mutex<MediaPlayer>>) -> bool {
        self.display.holds(player)
    }

    pub fn set_display(&self, player: Weak<Mutex<MediaPlayer>>, info: ProviderInfo) {
        self.display.set(player);
        self.mixer.provider_changed(Some(info));
    }

    /// Relinquish the display if `player` holds it
    pub fn clear_display(&self, player: &Weak<Mutex<MediaPlayer>>) -> bool {
        let cleared = self.display.clear_if(player);
        if cleared {
            self.mixer.provider_changed(None);
        }
        cleared
    }

    pub fn audio(&self) -> Option<Arc<Mutex<AudioSampleFifo>>> {
        self.audio.get()
    }

    pub fn activate_audio(&self, fifo: &Arc<Mutex<AudioSampleFifo>>, sample_rate: u32) {
        self.requested_sample_rate.store(sample_rate, Ordering::Release);
        self.audio.set(Arc::downgrade(fifo));
    }

    pub fn deactivate_audio(&self, fifo: &Weak<Mutex<AudioSampleFifo>>) -> bool {
        self.audio.clear_if(fifo)
    }

    /// Sample rate of the most recently activated FIFO
    pub fn requested_sample_rate(&self) -> u32 {
        self.requested_sample_rate.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.audio.clear();
        self.display.clear();
        self.mixer.provider_changed(None);
    }
}

// ============================================================================
// Audio Pump
// ============================================================================

/// Consumer side of the active FIFO, owned by the audio callback
pub struct AudioPump {
    roles: Arc<ActiveRoles>,
    last_sample: StereoSample,
    applied_rate: u32,
}

impl AudioPump {
    pub fn new(roles: Arc<ActiveRoles>) -> Self {
        Self {
            roles,
            last_sample: StereoSample::default(),
            applied_rate: 0,
        }
    }

    /// Deliver exactly `frames` stereo frames to `sink`.
    ///
    /// Silence when no FIFO is active. When the FIFO runs dry, or the decode path
    /// is holding it, the last delivered sample is repeated instead of waiting.
    pub fn pull(&mut self, sink: &mut dyn AudioSink, frames: usize) {
        let Some(fifo) = self.roles.audio() else {
            sink.add_silence(frames);
            return;
        };

        let rate = self.roles.requested_sample_rate();
        if rate != self.applied_rate {
            sink.set_sample_rate(rate);
            self.applied_rate = rate;
        }

        let mut needed = frames;
        if let Some(mut fifo) = fifo.try_lock() {
            while needed > 0 {
                let available = fifo.consumable();
                if available.is_empty() {
                    break;
                }
                let take = needed.min(available.len());
                sink.add_samples(&available[..take]);
                self.last_sample = available[take - 1];
                fifo.consume(take);
                needed -= take;
            }
        }

        if needed > 0 {
            let filler = vec![self.last_sample; needed];
            sink.add_samples(&filler);
        }
    }
}

// ============================================================================
// Subsystem
// ============================================================================

pub struct Subsystem {
    settings: ReelMagicSettings,
    default_config: RwLock<PlayerConfiguration>,
    registry: Mutex<HandleRegistry>,
    roles: Arc<ActiveRoles>,
    factory: Arc<dyn CodecFactory>,
}

impl Subsystem {
    pub fn new(
        settings: ReelMagicSettings,
        factory: Arc<dyn CodecFactory>,
        mixer: Arc<dyn VideoMixer>,
    ) -> Self {
        let default_config = settings.default_player_config();
        let registry = HandleRegistry::new(settings.handle_range());
        info!(
            "ReelMagic subsystem ready (handles {}-{}, audio FIFO {} frames)",
            registry.range().first,
            registry.range().last,
            settings.audio_fifo_size
        );
        Self {
            settings,
            default_config: RwLock::new(default_config),
            registry: Mutex::new(registry),
            roles: Arc::new(ActiveRoles::new(mixer)),
            factory,
        }
    }

    pub fn settings(&self) -> &ReelMagicSettings {
        &self.settings
    }

    pub fn roles(&self) -> &Arc<ActiveRoles> {
        &self.roles
    }

    /// Delete every player and rebuild the default configuration
    pub fn reset(&self) {
        let players = {
            let mut registry = self.registry.lock();
            let players = registry.players();
            registry.clear_all();
            players
        };
        let count = players.len();
        drop(players);
        self.roles.clear();
        *self.default_config.write() = self.settings.default_player_config();
        info!("ReelMagic subsystem reset, {} players deleted", count);
    }

    pub fn default_config(&self) -> PlayerConfiguration {
        self.default_config.read().clone()
    }

    pub fn set_default_config(&self, config: PlayerConfiguration) {
        *self.default_config.write() = config;
    }

    // ========================================================================
    // Players
    // ========================================================================

    /// Open an asset and register it. Returns the player's base handle.
    pub fn open_player(&self, source: Box<dyn ByteSource>) -> ReelMagicResult<Handle> {
        let player = MediaPlayer::open(
            source,
            self.default_config(),
            &self.settings.fifo_settings(),
            self.factory.as_ref(),
            self.roles.clone(),
        )?;
        let handle = self.registry.lock().allocate(&player)?;
        debug!("Opened player #{} ({})", handle, player.lock().name());
        Ok(handle)
    }

    pub fn delete_player(&self, handle: Handle) -> ReelMagicResult<()> {
        // hold the player so it is destroyed after the registry lock is released
        let player = self.player(handle)?;
        self.registry.lock().free(handle)?;
        drop(player);
        Ok(())
    }

    pub fn player(&self, handle: Handle) -> ReelMagicResult<SharedPlayer> {
        self.registry.lock().resolve(handle)
    }

    pub fn live_handles(&self) -> Vec<Handle> {
        self.registry.lock().live_handles()
    }

    // ========================================================================
    // Tick Entry Points
    // ========================================================================

    /// Let the display provider draw into `out`. `false` when nothing is on screen.
    pub fn vertical_refresh(&self, out: &mut [u8], display_fps: f64) -> bool {
        let Some(player) = self.roles.display() else {
            return false;
        };
        player.lock().on_vertical_refresh(out, display_fps);
        true
    }

    /// Consumer handle for the audio callback
    pub fn audio_pump(&self) -> AudioPump {
        AudioPump::new(self.roles.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
