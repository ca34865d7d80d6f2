//! Standard MIDI File decoding and timeline construction.
//!
//! [`decode`] parses an SMF byte buffer into a flat, tick-sorted raw
//! event stream; [`Timeline::build`] converts that stream plus the tempo
//! map into an absolute-time note list with per-note performance
//! attributes resolved (program, pan, reverb, volume/expression scaling,
//! sustain-pedal semantics).

mod decode;
mod timeline;

pub use decode::{decode, RawEvent, RawEventKind};
pub use timeline::{Note, Timeline};

/// Default tempo before any tempo event: 120 BPM.
pub const DEFAULT_US_PER_BEAT: u32 = 500_000;
