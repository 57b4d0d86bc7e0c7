//! # Audio Sample FIFO
//!
//! Bridges the decode path (refresh tick) and the mixer pull callback.
//!
//! - Fixed ring of slots, one decoded MPEG audio frame per slot
//! - Producer never blocks: on overflow the oldest slots are thrown away
//! - Consumer drains a slot a few samples at a time
//!
//! ```text
//!  produce ─►┌────┬────┬────┬────┬────┐
//!            │ P  │ P  │ P  │    │    │   P = produced
//!            └────┴────┴────┴────┴────┘
//!              ▲ consume (samples_consumed = 300 of 1152)
//! ```

use tracing::warn;

use crate::codec::{AudioSamples, AUDIO_SAMPLES_PER_FRAME};

/// Upper bound on the configured slot count
pub const FIFO_HARD_MAX: usize = 100;

/// One left/right sample pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StereoSample {
    pub left: i16,
    pub right: i16,
}

/// FIFO sizing, taken from the subsystem settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FifoSettings {
    pub capacity: usize,
    pub dispose_count: usize,
    /// Output gain applied while converting to 16-bit PCM
    pub level: f32,
}

impl Default for FifoSettings {
    fn default() -> Self {
        Self {
            capacity: 20,
            dispose_count: 5,
            level: 1.5,
        }
    }
}

struct FifoSlot {
    produced: bool,
    samples_consumed: usize,
    block: Vec<StereoSample>,
}

impl FifoSlot {
    fn new() -> Self {
        Self {
            produced: false,
            samples_consumed: 0,
            block: vec![StereoSample::default(); AUDIO_SAMPLES_PER_FRAME],
        }
    }
}

pub struct AudioSampleFifo {
    slots: Vec<FifoSlot>,
    dispose_count: usize,
    level: f32,
    produce_ptr: usize,
    consume_ptr: usize,
    sample_rate: u32,
    overflow_events: u64,
}

impl AudioSampleFifo {
    pub fn new(settings: &FifoSettings) -> Self {
        let capacity = Self::compute_capacity(settings.capacity);
        let dispose_count = Self::compute_dispose_count(settings.dispose_count, capacity);
        Self {
            slots: (0..capacity).map(|_| FifoSlot::new()).collect(),
            dispose_count,
            level: settings.level,
            produce_ptr: 0,
            consume_ptr: 0,
            sample_rate: 0,
            overflow_events: 0,
        }
    }

    fn compute_capacity(requested: usize) -> usize {
        if requested > FIFO_HARD_MAX {
            warn!(
                "Requested audio FIFO size {} is too big. Limiting to {}",
                requested, FIFO_HARD_MAX
            );
            return FIFO_HARD_MAX;
        }
        if requested == 0 {
            warn!("Requested audio FIFO size 0 is too small. Using 1");
            return 1;
        }
        requested
    }

    fn compute_dispose_count(requested: usize, capacity: usize) -> usize {
        if requested > capacity {
            warn!(
                "Requested audio FIFO dispose frame count {} is too big. Limiting to {}",
                requested, capacity
            );
            return capacity;
        }
        requested
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn dispose_count(&self) -> usize {
        self.dispose_count
    }

    /// 0 means the asset has no audio stream
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate;
    }

    // ========================================================================
    // Consumer API (mixer callback)
    // ========================================================================

    /// Unconsumed sample pairs in the current consume slot
    pub fn samples_available(&self) -> usize {
        let slot = &self.slots[self.consume_ptr];
        if !slot.produced {
            return 0;
        }
        slot.block.len() - slot.samples_consumed
    }

    /// The unconsumed pairs of the current consume slot (empty when nothing is produced)
    pub fn consumable(&self) -> &[StereoSample] {
        let slot = &self.slots[self.consume_ptr];
        if !slot.produced {
            return &[];
        }
        &slot.block[slot.samples_consumed..]
    }

    pub fn consume(&mut self, count: usize) {
        let capacity = self.capacity();
        let slot = &mut self.slots[self.consume_ptr];
        slot.samples_consumed += count;
        if slot.samples_consumed >= slot.block.len() {
            slot.produced = false;
            self.consume_ptr = (self.consume_ptr + 1) % capacity;
        }
    }

    // ========================================================================
    // Producer API (decode path)
    // ========================================================================

    pub fn produce(&mut self, samples: &AudioSamples) {
        if self.slots[self.produce_ptr].produced {
            self.dispose_for_production();
        }

        let level = self.level;
        let slot = &mut self.slots[self.produce_ptr];
        for (i, pair) in slot.block.iter_mut().enumerate() {
            let left = samples.interleaved.get(i * 2).copied().unwrap_or(0.0);
            let right = samples.interleaved.get(i * 2 + 1).copied().unwrap_or(0.0);
            pair.left = convert_sample(left, level);
            pair.right = convert_sample(right, level);
        }
        slot.samples_consumed = 0;
        slot.produced = true;

        self.produce_ptr = (self.produce_ptr + 1) % self.capacity();
    }

    fn dispose_for_production(&mut self) {
        warn!(
            "Audio FIFO consumer not keeping up. Disposing {} Interleaved Samples",
            self.dispose_count * AUDIO_SAMPLES_PER_FRAME
        );
        self.overflow_events += 1;
        let capacity = self.capacity();
        for _ in 0..self.dispose_count {
            self.slots[self.consume_ptr].produced = false;
            self.consume_ptr = (self.consume_ptr + 1) % capacity;
        }
    }

    /// Drop everything and rewind both cursors
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.produced = false;
        }
        self.produce_ptr = 0;
        self.consume_ptr = 0;
    }

    // ========================================================================
    // Status API
    // ========================================================================

    /// Slots holding produced, not fully consumed frames
    pub fn pending_frames(&self) -> usize {
        self.slots.iter().filter(|s| s.produced).count()
    }

    pub fn overflow_events(&self) -> u64 {
        self.overflow_events
    }
}

fn convert_sample(sample: f32, level: f32) -> i16 {
    (sample * 32767.0 * level)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
