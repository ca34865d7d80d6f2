//! Gain envelope: parameter set plus a per-sample runtime stage.
//!
//! [`Envelope`] is the immutable parameter form carried by instrument
//! definitions and SoundFont regions. [`GainEnvelope`] is the stateful
//! per-voice stage that walks delay → attack → hold → decay → sustain →
//! release, one sample at a time, with smooth transitions.

/// Envelope parameters in seconds (sustain as a 0..1 level).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub delay: f32,
    pub attack: f32,
    pub hold: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            delay: 0.0,
            attack: 0.005,
            hold: 0.0,
            decay: 0.1,
            sustain: 0.8,
            release: 0.2,
        }
    }
}

/// Processing phase of a running envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    Done,
}

/// Per-voice gain envelope evaluated one sample at a time.
///
/// Release always ramps from the current level, so an early release
/// (during attack or decay) or a forced fade never clicks.
pub struct GainEnvelope {
    delay_samples: u64,
    attack_samples: u64,
    hold_samples: u64,
    decay_samples: u64,
    sustain_level: f32,
    release_samples: u64,

    phase: Phase,
    position: u64,
    level: f32,
    release_start_level: f32,
}

impl GainEnvelope {
    pub fn new(params: Envelope, sample_rate: u32) -> Self {
        let to_samples = |secs: f32| (secs.max(0.0) as f64 * sample_rate as f64) as u64;
        Self {
            delay_samples: to_samples(params.delay),
            attack_samples: to_samples(params.attack).max(1),
            hold_samples: to_samples(params.hold),
            decay_samples: to_samples(params.decay).max(1),
            sustain_level: params.sustain.clamp(0.0, 1.0),
            release_samples: to_samples(params.release).max(1),
            phase: Phase::Delay,
            position: 0,
            level: 0.0,
            release_start_level: 0.0,
        }
    }

    /// Begins the release phase from the current level.
    /// No-op if already releasing or done.
    pub fn release(&mut self) {
        if matches!(self.phase, Phase::Release | Phase::Done) {
            return;
        }
        self.release_start_level = self.level;
        self.phase = Phase::Release;
        self.position = 0;
    }

    /// Begins a short forced fade, overriding the configured release time.
    /// Used when the scheduler tears a voice down (stop/pause/seek).
    pub fn fade_out(&mut self, fade_samples: u64) {
        if self.phase == Phase::Done {
            return;
        }
        self.release_start_level = self.level;
        self.release_samples = fade_samples.max(1);
        self.phase = Phase::Release;
        self.position = 0;
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn is_releasing(&self) -> bool {
        matches!(self.phase, Phase::Release | Phase::Done)
    }

    /// Advances one sample and returns the gain for it.
    pub fn next_sample(&mut self) -> f32 {
        match self.phase {
            Phase::Delay => {
                if self.position >= self.delay_samples {
                    self.advance(Phase::Attack);
                    return self.next_sample();
                }
                self.position += 1;
                self.level = 0.0;
                0.0
            }
            Phase::Attack => {
                if self.position >= self.attack_samples {
                    self.advance(Phase::Hold);
                    return self.next_sample();
                }
                self.level = self.position as f32 / self.attack_samples as f32;
                self.position += 1;
                self.level
            }
            Phase::Hold => {
                if self.position >= self.hold_samples {
                    self.advance(Phase::Decay);
                    return self.next_sample();
                }
                self.position += 1;
                self.level = 1.0;
                1.0
            }
            Phase::Decay => {
                if self.position >= self.decay_samples {
                    self.advance(Phase::Sustain);
                    return self.next_sample();
                }
                let t = self.position as f32 / self.decay_samples as f32;
                self.level = 1.0 + (self.sustain_level - 1.0) * t;
                self.position += 1;
                self.level
            }
            Phase::Sustain => {
                self.level = self.sustain_level;
                self.sustain_level
            }
            Phase::Release => {
                if self.position >= self.release_samples {
                    self.phase = Phase::Done;
                    self.level = 0.0;
                    return 0.0;
                }
                let t = self.position as f32 / self.release_samples as f32;
                self.level = self.release_start_level * (1.0 - t);
                self.position += 1;
                self.level
            }
            Phase::Done => 0.0,
        }
    }

    fn advance(&mut self, next: Phase) {
        self.phase = next;
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(env: &mut GainEnvelope, n: usize) -> Vec<f32> {
        (0..n).map(|_| env.next_sample()).collect()
    }

    #[test]
    fn test_full_envelope_shape() {
        // 1000 Hz rate for round sample counts: 10 attack, 10 decay.
        let params = Envelope {
            delay: 0.0,
            attack: 0.01,
            hold: 0.0,
            decay: 0.01,
            sustain: 0.5,
            release: 0.01,
        };
        let mut env = GainEnvelope::new(params, 1000);

        let attack = run(&mut env, 10);
        assert!(attack[0] < attack[9]);
        assert!(attack[9] <= 1.0);

        let decay = run(&mut env, 10);
        assert!(decay[0] > decay[9]);

        // Sustain holds.
        let sustain = run(&mut env, 20);
        assert!(sustain.iter().all(|&s| (s - 0.5).abs() < 1e-6));

        env.release();
        let release = run(&mut env, 12);
        assert!(release[0] <= 0.5);
        assert!(env.is_done());
        assert_eq!(release[11], 0.0);
    }

    #[test]
    fn test_release_from_mid_attack() {
        let params = Envelope {
            attack: 0.1,
            ..Envelope::default()
        };
        let mut env = GainEnvelope::new(params, 1000);
        run(&mut env, 50); // halfway through attack
        let level = env.next_sample();
        assert!(level > 0.3 && level < 0.7);

        env.release();
        let first = env.next_sample();
        // Release starts at the level it was interrupted at, no jump to 1.0.
        assert!((first - level).abs() < 0.05);
    }

    #[test]
    fn test_fade_out_overrides_release() {
        let params = Envelope {
            release: 10.0,
            ..Envelope::default()
        };
        let mut env = GainEnvelope::new(params, 1000);
        run(&mut env, 500);
        env.fade_out(10);
        run(&mut env, 11);
        assert!(env.is_done());
    }

    #[test]
    fn test_delay_holds_silence() {
        let params = Envelope {
            delay: 0.01,
            ..Envelope::default()
        };
        let mut env = GainEnvelope::new(params, 1000);
        let out = run(&mut env, 10);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(env.next_sample() > 0.0 || env.next_sample() > 0.0);
    }
}
