//! # Magic Key f_code Recovery
//!
//! ReelMagic assets with a `picture_rate` code >= 9 carry scrambled
//! `forward_f_code`/`backward_f_code` values in their P and B picture headers.
//! Only pictures with particular temporal sequence numbers carry the real value,
//! and which ones depends on the "magic key" the driver hands the card:
//!
//! | key          | truthful temporal sequence numbers |
//! |--------------|------------------------------------|
//! | `0x40044041` | 3, 8 (most titles)                 |
//! | `0xC39D7088` | 4 (The Horde)                      |
//!
//! The resolver scrubs the rewound stream for the first truthful P/B picture and
//! the player then applies that f_code to every P/B picture of the asset. Real
//! hardware presumably corrects per picture; the single bias matches it well
//! enough for the shipped titles.

use tracing::{debug, warn};

use crate::codec::{BitReader, MpegCodec, PictureHeader, PictureHeaderHook, PictureType, PICTURE_START_CODE};

/// Key used by most ReelMagic titles
pub const COMMON_MAGIC_KEY: u32 = 0x4004_4041;

/// Key used by The Horde
pub const THEHORDE_MAGIC_KEY: u32 = 0xC39D_7088;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagicKeyResolver {
    key: u32,
}

impl MagicKeyResolver {
    pub fn new(key: u32) -> Self {
        Self { key }
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    fn is_truthful(&self, temporal_sequence_number: u32) -> bool {
        match self.key {
            THEHORDE_MAGIC_KEY => temporal_sequence_number == 4,
            _ => temporal_sequence_number == 3 || temporal_sequence_number == 8,
        }
    }

    /// Scan forward from the current position for the first truthful f_code.
    ///
    /// Returns 0 when the stream runs out first.
    pub fn scan(&self, bits: &mut dyn BitReader) -> u8 {
        if self.key != COMMON_MAGIC_KEY && self.key != THEHORDE_MAGIC_KEY {
            warn!(
                "Unknown magic key: 0x{:08X}. Defaulting to the common key: 0x{:08X}",
                self.key, COMMON_MAGIC_KEY
            );
        }

        loop {
            if !bits.find_start_code(PICTURE_START_CODE) {
                return 0;
            }
            let temporal_sequence_number = bits.read(10);
            let picture_type = PictureType::from_code(bits.read(3));
            if !picture_type.is_some_and(|t| t.has_motion()) {
                continue;
            }

            bits.skip(16); // vbv_delay
            bits.skip(1); // full_pel_forward_vector
            let f_code = bits.read(3) as u8;
            if f_code != 0 && self.is_truthful(temporal_sequence_number) {
                debug!(
                    "Truthful f_code {} at temporal sequence number {}",
                    f_code, temporal_sequence_number
                );
                return f_code;
            }
        }
    }

    /// Run [`scan`](Self::scan) over a codec's video stream.
    ///
    /// Audio and looping are disabled for the duration and the codec is left rewound
    /// with its original flags.
    pub fn resolve(&self, codec: &mut dyn MpegCodec) -> u8 {
        let audio_enabled = codec.audio_enabled();
        let loop_enabled = codec.loop_enabled();
        codec.rewind();
        codec.set_audio_enabled(false);
        codec.set_loop(false);

        let f_code = self.scan(codec.video_bits());

        codec.set_loop(loop_enabled);
        codec.set_audio_enabled(audio_enabled);
        codec.rewind();

        f_code
    }
}

/// Picture header hook forcing `r_size` onto every P picture (forward) and B picture
/// (forward and backward)
pub fn r_size_override(r_size: u8) -> PictureHeaderHook {
    Box::new(move |header: &mut PictureHeader| match header.picture_type {
        PictureType::B => {
            header.backward_r_size = r_size;
            header.forward_r_size = r_size;
        }
        PictureType::Predictive => {
            header.forward_r_size = r_size;
        }
        _ => {}
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::BitBuffer;
    use crate::codec::SourceFeed;
    use crate::testing::{BitWriter, CodecProbe, CodecScript, MemorySource, ScriptedCodec};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    const P: u32 = 2;
    const B: u32 = 3;
    const I: u32 = 1;

    fn stream(pictures: &[(u32, u32, u32)]) -> Vec<u8> {
        let mut w = BitWriter::new();
        for &(tsn, kind, f_code) in pictures {
            w.picture(tsn, kind, f_code);
        }
        w.finish()
    }

    fn sample_stream() -> Vec<u8> {
        stream(&[(2, P, 1), (3, P, 5), (5, B, 1), (8, P, 3)])
    }

    #[test]
    fn test_common_key_takes_first_truthful_picture() {
        let mut bits = BitBuffer::new(sample_stream());
        assert_eq!(MagicKeyResolver::new(COMMON_MAGIC_KEY).scan(&mut bits), 5);
    }

    #[test]
    fn test_thehorde_key_without_sequence_four() {
        let mut bits = BitBuffer::new(sample_stream());
        assert_eq!(MagicKeyResolver::new(THEHORDE_MAGIC_KEY).scan(&mut bits), 0);
    }

    #[test]
    fn test_thehorde_key_finds_sequence_four() {
        let mut bits = BitBuffer::new(stream(&[(3, P, 2), (4, I, 0), (4, B, 6), (8, P, 3)]));
        assert_eq!(MagicKeyResolver::new(THEHORDE_MAGIC_KEY).scan(&mut bits), 6);
    }

    #[test]
    fn test_unknown_key_falls_back_to_common() {
        let mut bits = BitBuffer::new(stream(&[(4, P, 2), (8, B, 7)]));
        assert_eq!(MagicKeyResolver::new(0x1234_5678).scan(&mut bits), 7);
    }

    #[test]
    fn test_zero_candidate_keeps_scanning() {
        let mut bits = BitBuffer::new(stream(&[(3, P, 0), (3, I, 0), (8, P, 4)]));
        assert_eq!(MagicKeyResolver::new(COMMON_MAGIC_KEY).scan(&mut bits), 4);
    }

    #[test]
    fn test_resolve_restores_codec_flags() {
        let probe = Arc::new(CodecProbe::default());
        let script = CodecScript {
            bitstream: sample_stream(),
            ..CodecScript::default()
        };
        let feed = SourceFeed::new(Box::new(MemorySource::new("X.MPG", Vec::new())));
        let mut codec = ScriptedCodec::new(script, probe.clone(), feed);
        codec.set_loop(true);

        let f_code = MagicKeyResolver::new(COMMON_MAGIC_KEY).resolve(&mut codec);

        assert_eq!(f_code, 5);
        assert!(codec.loop_enabled());
        assert!(codec.audio_enabled());
        assert_eq!(probe.rewinds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_r_size_override_hook() {
        let mut hook = r_size_override(2);
        let mut b = PictureHeader {
            picture_type: PictureType::B,
            temporal_sequence_number: 1,
            forward_r_size: 6,
            backward_r_size: 6,
        };
        let mut p = PictureHeader {
            picture_type: PictureType::Predictive,
            ..b
        };
        let mut i = PictureHeader {
            picture_type: PictureType::Intra,
            ..b
        };
        hook(&mut b);
        hook(&mut p);
        hook(&mut i);

        assert_eq!((b.forward_r_size, b.backward_r_size), (2, 2));
        assert_eq!((p.forward_r_size, p.backward_r_size), (2, 6));
        assert_eq!((i.forward_r_size, i.backward_r_size), (6, 6));
    }
}
