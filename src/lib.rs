//! fermata - a MIDI-to-audio synthesis engine.
//!
//! Decodes Standard MIDI Files into absolute-time note timelines,
//! decodes SoundFont 2 banks into playable sample regions, resolves
//! per-note synthesis parameters across several engine modes, and
//! drives a lookahead voice scheduler with full transport controls
//! (play/pause/seek/stop/speed/transpose).

pub mod audio;
pub mod error;
pub mod midi;
pub mod player;
pub mod reader;
pub mod soundfont;
pub mod synth;

// Re-export commonly used types
pub use audio::{export_session_to_wav, AudioEngine, Mixer, SAMPLE_RATE};
pub use error::{DecodeError, EngineError};
pub use midi::{Note, Timeline};
pub use player::{Session, SessionEvent, TransportState};
pub use soundfont::{Region, SoundFontBank};
pub use synth::EngineMode;

/// Decodes a Standard MIDI File buffer into a playable timeline.
///
/// # Errors
///
/// Any [`DecodeError`] from the MIDI decoder, or
/// [`DecodeError::EmptyTimeline`] if decoding succeeds but yields no
/// sounding notes.
pub fn decode_midi(bytes: &[u8]) -> Result<Timeline, DecodeError> {
    let (events, ticks_per_beat) = midi::decode(bytes)?;
    let timeline = Timeline::build(&events, ticks_per_beat);
    if timeline.notes.is_empty() {
        return Err(DecodeError::EmptyTimeline);
    }
    Ok(timeline)
}

/// Decodes a SoundFont 2 buffer into a bank of playable regions.
///
/// # Errors
///
/// Any [`DecodeError`] from the SoundFont decoder.
pub fn decode_sound_font(bytes: &[u8]) -> Result<SoundFontBank, DecodeError> {
    SoundFontBank::decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::testutil::SmfBuilder;

    #[test]
    fn test_decode_midi_round_trip() {
        let mut b = SmfBuilder::new(480);
        let t = b.track();
        b.note_on(t, 0, 0, 60, 100);
        b.note_off(t, 480, 0, 60);
        let timeline = decode_midi(&b.build()).unwrap();
        assert_eq!(timeline.notes.len(), 1);
        assert!((timeline.notes[0].duration - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_decode_midi_rejects_noteless_file() {
        let mut b = SmfBuilder::new(480);
        let t = b.track();
        b.tempo(t, 0, 250_000); // events, but no notes
        assert_eq!(
            decode_midi(&b.build()).unwrap_err(),
            DecodeError::EmptyTimeline
        );
    }
}
