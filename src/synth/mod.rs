//! Synthesis: instrument resolution, envelopes, signal sources, voices.

mod envelope;
mod instrument;
mod osc;
mod voice;

pub use envelope::{Envelope, GainEnvelope};
pub use instrument::{
    key_to_freq, EngineMode, FilterSpec, InstrumentResolver, InstrumentSource, LfoSpec, OscLayer,
    SampledDefinition, SynthDefinition, PERCUSSION_CHANNEL,
};
pub use osc::{Lfo, LowPassFilter, Oscillator, SamplePlayer, Waveform};
pub use voice::Voice;
