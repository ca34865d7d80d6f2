//! Audio output: voice mixing, real-time playback, offline export.

mod engine;
mod export;
mod mixer;

pub use engine::{AudioEngine, SAMPLE_RATE};
pub use export::export_session_to_wav;
pub use mixer::{Mixer, TEARDOWN_FADE_SECS};
