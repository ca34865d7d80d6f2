//! Signal sources and per-voice DSP stages.
//!
//! Phase-accumulator oscillators for the synthetic engines, a linearly
//! interpolating sample player for SoundFont regions, a low-frequency
//! oscillator for pitch/amplitude modulation, and a one-pole low-pass
//! filter. Everything here is evaluated one sample at a time by the voice.

use std::f32::consts::TAU;
use std::sync::Arc;

/// Waveform classes available to the synthetic engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
    Noise,
}

/// A phase-accumulator oscillator.
///
/// Frequency is stored as a base value; the effective frequency each
/// sample is `base * pitch_factor`, which is how live transpose/detune
/// and LFO vibrato reach an already-sounding voice.
pub struct Oscillator {
    waveform: Waveform,
    base_freq: f32,
    sample_rate: f32,
    phase: f32,
    noise: fastrand::Rng,
}

impl Oscillator {
    pub fn new(waveform: Waveform, freq_hz: f32, sample_rate: u32) -> Self {
        Self {
            waveform,
            base_freq: freq_hz,
            sample_rate: sample_rate as f32,
            phase: 0.0,
            // Seeded per-oscillator so two noise layers do not correlate.
            noise: fastrand::Rng::with_seed(freq_hz.to_bits() as u64 ^ 0x9E37_79B9),
        }
    }

    pub fn base_frequency(&self) -> f32 {
        self.base_freq
    }

    /// Produces the next sample, advancing phase by the pitch-scaled step.
    pub fn next_sample(&mut self, pitch_factor: f32) -> f32 {
        let out = match self.waveform {
            Waveform::Sine => (self.phase * TAU).sin(),
            Waveform::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * self.phase - 1.0,
            Waveform::Triangle => {
                if self.phase < 0.5 {
                    4.0 * self.phase - 1.0
                } else {
                    3.0 - 4.0 * self.phase
                }
            }
            Waveform::Noise => self.noise.f32() * 2.0 - 1.0,
        };
        let step = self.base_freq * pitch_factor / self.sample_rate;
        self.phase += step;
        self.phase -= self.phase.floor();
        out
    }
}

/// Plays a mono sample buffer with linear interpolation.
///
/// Looped players wrap inside [loop_start, loop_end); one-shot players
/// finish when the read position passes the end of the buffer.
pub struct SamplePlayer {
    buffer: Arc<Vec<f32>>,
    position: f64,
    /// Buffer frames advanced per output sample at pitch factor 1.0.
    base_step: f64,
    loop_start: f64,
    loop_end: f64,
    looped: bool,
    finished: bool,
}

impl SamplePlayer {
    pub fn new(
        buffer: Arc<Vec<f32>>,
        base_step: f64,
        loop_start: f64,
        loop_end: f64,
        looped: bool,
    ) -> Self {
        let len = buffer.len() as f64;
        let loop_end = loop_end.min(len);
        let loop_start = loop_start.min(loop_end);
        // A degenerate loop cannot sustain; treat it as one-shot.
        let looped = looped && loop_end - loop_start >= 2.0;
        Self {
            buffer,
            position: 0.0,
            base_step,
            loop_start,
            loop_end,
            looped,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn next_sample(&mut self, pitch_factor: f64) -> f32 {
        if self.finished {
            return 0.0;
        }
        let len = self.buffer.len();
        let idx = self.position as usize;
        if idx + 1 >= len {
            self.finished = true;
            return 0.0;
        }
        let frac = (self.position - idx as f64) as f32;
        let out = self.buffer[idx] * (1.0 - frac) + self.buffer[idx + 1] * frac;

        self.position += self.base_step * pitch_factor;
        if self.looped && self.position >= self.loop_end {
            self.position -= self.loop_end - self.loop_start;
        } else if !self.looped && self.position >= (len - 1) as f64 {
            self.finished = true;
        }
        out
    }
}

/// Low-frequency oscillator modulating pitch and/or amplitude.
pub struct Lfo {
    phase: f32,
    step: f32,
    pitch_depth_cents: f32,
    amp_depth: f32,
}

impl Lfo {
    pub fn new(frequency_hz: f32, pitch_depth_cents: f32, amp_depth: f32, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: frequency_hz / sample_rate as f32,
            pitch_depth_cents,
            amp_depth: amp_depth.clamp(0.0, 1.0),
        }
    }

    /// Advances one sample; returns (pitch factor, amplitude factor).
    pub fn next_sample(&mut self) -> (f32, f32) {
        let s = (self.phase * TAU).sin();
        self.phase += self.step;
        self.phase -= self.phase.floor();
        let pitch = if self.pitch_depth_cents != 0.0 {
            ((s * self.pitch_depth_cents) / 1200.0).exp2()
        } else {
            1.0
        };
        let amp = 1.0 - self.amp_depth * (0.5 + 0.5 * s);
        (pitch, amp)
    }
}

/// One-pole low-pass filter.
pub struct LowPassFilter {
    alpha: f32,
    state: f32,
}

impl LowPassFilter {
    pub fn new(cutoff_hz: f32, sample_rate: u32) -> Self {
        let rc = 1.0 / (TAU * cutoff_hz.max(1.0));
        let dt = 1.0 / sample_rate as f32;
        Self {
            alpha: dt / (rc + dt),
            state: 0.0,
        }
    }

    pub fn process(&mut self, input: f32) -> f32 {
        self.state += self.alpha * (input - self.state);
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oscillator_period() {
        // 100 Hz at 1000 Hz sample rate: one cycle every 10 samples.
        let mut osc = Oscillator::new(Waveform::Sine, 100.0, 1000);
        let first = osc.next_sample(1.0);
        for _ in 0..9 {
            osc.next_sample(1.0);
        }
        let after_cycle = osc.next_sample(1.0);
        assert!((first - after_cycle).abs() < 1e-4);
    }

    #[test]
    fn test_pitch_factor_doubles_rate() {
        let mut osc = Oscillator::new(Waveform::Sawtooth, 100.0, 1000);
        // At factor 2.0, 5 samples complete the cycle instead of 10.
        let first = osc.next_sample(2.0);
        for _ in 0..4 {
            osc.next_sample(2.0);
        }
        let after = osc.next_sample(2.0);
        assert!((first - after).abs() < 1e-4);
    }

    #[test]
    fn test_square_bounds() {
        let mut osc = Oscillator::new(Waveform::Square, 440.0, 44100);
        for _ in 0..1000 {
            let s = osc.next_sample(1.0);
            assert!(s == 1.0 || s == -1.0);
        }
    }

    #[test]
    fn test_one_shot_player_finishes() {
        let buffer = Arc::new(vec![0.5f32; 16]);
        let mut player = SamplePlayer::new(buffer, 1.0, 0.0, 0.0, false);
        let mut count = 0;
        while !player.is_finished() {
            player.next_sample(1.0);
            count += 1;
            assert!(count < 100, "one-shot player never finished");
        }
        assert!(count <= 16);
        assert_eq!(player.next_sample(1.0), 0.0);
    }

    #[test]
    fn test_looped_player_sustains() {
        let buffer = Arc::new((0..16).map(|i| i as f32).collect::<Vec<_>>());
        let mut player = SamplePlayer::new(buffer, 1.0, 4.0, 12.0, true);
        for _ in 0..1000 {
            player.next_sample(1.0);
        }
        assert!(!player.is_finished());
    }

    #[test]
    fn test_lfo_amp_range() {
        let mut lfo = Lfo::new(5.0, 0.0, 0.5, 1000);
        for _ in 0..2000 {
            let (pitch, amp) = lfo.next_sample();
            assert_eq!(pitch, 1.0);
            assert!((0.5..=1.0).contains(&amp));
        }
    }

    #[test]
    fn test_lowpass_converges() {
        let mut lp = LowPassFilter::new(100.0, 44100);
        let mut out = 0.0;
        for _ in 0..44100 {
            out = lp.process(1.0);
        }
        assert!((out - 1.0).abs() < 0.01);
    }
}
