//! Voice mixing, the sample clock, and the shared reverb bus.
//!
//! The mixer owns every live [`Voice`] and renders them into stereo
//! buffers one block at a time. Its sample counter is the engine's
//! monotonic clock: voices are anchored to absolute sample positions,
//! so scheduling precision is exact regardless of block size.

use crate::synth::Voice;

/// Fade length applied when voices are torn down early (stop, pause,
/// seek). Short enough to feel immediate, long enough not to click.
pub const TEARDOWN_FADE_SECS: f32 = 0.05;

/// Feedback amount of the shared reverb delay line.
const REVERB_FEEDBACK: f32 = 0.45;

/// Output level of the reverb bus relative to the dry signal.
const REVERB_LEVEL: f32 = 0.4;

/// Delay line lengths in seconds; left and right differ to decorrelate.
const REVERB_DELAY_LEFT_SECS: f32 = 0.061;
const REVERB_DELAY_RIGHT_SECS: f32 = 0.083;

/// A single feedback delay line.
struct DelayLine {
    buffer: Vec<f32>,
    position: usize,
}

impl DelayLine {
    fn new(delay_secs: f32, sample_rate: u32) -> Self {
        let len = ((delay_secs * sample_rate as f32) as usize).max(1);
        Self {
            buffer: vec![0.0; len],
            position: 0,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let out = self.buffer[self.position];
        self.buffer[self.position] = input + out * REVERB_FEEDBACK;
        self.position = (self.position + 1) % self.buffer.len();
        out
    }
}

/// Renders live voices into stereo audio and advances the sample clock.
pub struct Mixer {
    sample_rate: u32,
    clock_samples: u64,
    voices: Vec<Voice>,
    /// Master pitch factor from transpose + fine detune; reaches every
    /// voice, already-sounding ones included.
    master_pitch: f32,
    reverb_left: DelayLine,
    reverb_right: DelayLine,
    voices_started: u64,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clock_samples: 0,
            voices: Vec::new(),
            master_pitch: 1.0,
            reverb_left: DelayLine::new(REVERB_DELAY_LEFT_SECS, sample_rate),
            reverb_right: DelayLine::new(REVERB_DELAY_RIGHT_SECS, sample_rate),
            voices_started: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn clock_samples(&self) -> u64 {
        self.clock_samples
    }

    /// Monotonic clock in seconds, derived from samples rendered.
    pub fn clock_seconds(&self) -> f64 {
        self.clock_samples as f64 / self.sample_rate as f64
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Total voices that have begun sounding since the mixer was built.
    pub fn voices_started(&self) -> u64 {
        self.voices_started
    }

    pub fn add_voice(&mut self, voice: Voice) {
        self.voices.push(voice);
    }

    /// Sets the master retune from transpose semitones plus detune cents.
    pub fn set_pitch_offset(&mut self, semitones: i32, cents: f32) {
        self.master_pitch = ((semitones as f32 * 100.0 + cents) / 1200.0).exp2();
    }

    /// Fades every sounding voice over [`TEARDOWN_FADE_SECS`] and
    /// retires voices that have not started yet.
    pub fn fade_all(&mut self) {
        let fade_samples = (TEARDOWN_FADE_SECS * self.sample_rate as f32) as u64;
        for voice in &mut self.voices {
            if voice.has_started() {
                voice.fade(fade_samples);
            } else {
                voice.cancel();
            }
        }
        self.voices.retain(|v| !v.is_finished());
    }

    /// Retires scheduled voices that have not begun sounding.
    pub fn cancel_pending(&mut self) {
        for voice in &mut self.voices {
            voice.cancel();
        }
        self.voices.retain(|v| !v.is_finished());
    }

    /// Renders one block into the left/right buffers (equal lengths),
    /// advancing the sample clock by the block size.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        debug_assert_eq!(left.len(), right.len());
        for frame in 0..left.len() {
            let clock = self.clock_samples + frame as u64;
            let mut dry_left = 0.0f32;
            let mut dry_right = 0.0f32;
            let mut wet = 0.0f32;
            for voice in &mut self.voices {
                let newly_started = !voice.has_started();
                let (l, r, w) = voice.next_frame(clock, self.master_pitch);
                if newly_started && voice.has_started() {
                    self.voices_started += 1;
                }
                dry_left += l;
                dry_right += r;
                wet += w;
            }
            let rev_l = self.reverb_left.process(wet) * REVERB_LEVEL;
            let rev_r = self.reverb_right.process(wet) * REVERB_LEVEL;
            left[frame] = soft_clip(dry_left + rev_l);
            right[frame] = soft_clip(dry_right + rev_r);
        }
        self.clock_samples += left.len() as u64;

        let before = self.voices.len();
        self.voices.retain(|v| !v.is_finished());
        let retired = before - self.voices.len();
        if retired > 0 {
            tracing::trace!(retired, remaining = self.voices.len(), "voices retired");
        }
    }
}

/// Keeps summed output inside [-1, 1] without a hard edge.
fn soft_clip(x: f32) -> f32 {
    x.tanh()
}
