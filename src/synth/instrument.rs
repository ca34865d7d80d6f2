//! Instrument resolution: (program, engine mode, articulation) → sources.
//!
//! The synthetic engines map a note's General MIDI program family to an
//! oscillator-layer definition; the sample engine resolves through the
//! loaded SoundFont bank. Percussion (channel 9) resolves through a
//! fixed note-number table in every mode.

use crate::error::EngineError;
use crate::midi::Note;
use crate::soundfont::{Region, SoundFontBank};
use crate::synth::{Envelope, Waveform};
use std::sync::Arc;

/// The MIDI channel reserved for percussion.
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Closed set of synthesis back-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Detuned saw/triangle layers through a low-pass filter.
    Analog,
    /// Square/triangle/noise, unfiltered.
    Chip,
    /// Stacked sine harmonics.
    Organ,
    /// Sample playback from a loaded SoundFont bank.
    SoundFont,
}

/// One oscillator layer of a synthetic definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscLayer {
    pub waveform: Waveform,
    /// Detune relative to the note pitch, in cents.
    pub detune_cents: f32,
    /// Gain relative to the voice level.
    pub gain: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub cutoff_hz: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LfoSpec {
    pub frequency_hz: f32,
    pub pitch_depth_cents: f32,
    pub amp_depth: f32,
}

/// A fully resolved synthetic instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthDefinition {
    pub layers: Vec<OscLayer>,
    pub filter: Option<FilterSpec>,
    pub lfo: Option<LfoSpec>,
    pub envelope: Envelope,
    pub reverb_send: f32,
}

/// Matching SoundFont regions plus a summary signal chain for the voice.
#[derive(Debug, Clone)]
pub struct SampledDefinition {
    pub bank: Arc<SoundFontBank>,
    pub regions: Vec<Region>,
    pub envelope: Envelope,
    pub pan: f32,
    pub reverb_send: f32,
}

/// What the resolver hands the voice builder.
#[derive(Debug, Clone)]
pub enum InstrumentSource {
    Synth(SynthDefinition),
    Sampled(SampledDefinition),
}

/// Equal-tempered frequency of a MIDI note number.
pub fn key_to_freq(key: u8) -> f32 {
    440.0 * ((key as f32 - 69.0) / 12.0).exp2()
}

/// Resolves notes to instrument sources for the active engine mode.
pub struct InstrumentResolver {
    mode: EngineMode,
    bank: Option<Arc<SoundFontBank>>,
    articulation: f32,
}

impl InstrumentResolver {
    pub fn new(mode: EngineMode) -> Self {
        Self {
            mode,
            bank: None,
            articulation: 0.5,
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: EngineMode) {
        self.mode = mode;
    }

    pub fn set_bank(&mut self, bank: Option<Arc<SoundFontBank>>) {
        self.bank = bank;
    }

    pub fn bank(&self) -> Option<&Arc<SoundFontBank>> {
        self.bank.as_ref()
    }

    /// Sets the articulation knob (0 = percussive, 1 = sustained).
    pub fn set_articulation(&mut self, value: f32) {
        self.articulation = value.clamp(0.0, 1.0);
    }

    pub fn articulation(&self) -> f32 {
        self.articulation
    }

    /// Resolves one timeline note to an instrument source.
    ///
    /// # Errors
    ///
    /// [`EngineError::EngineNotReady`] when the sample engine is selected
    /// with no bank loaded. There is no silent fallback.
    pub fn resolve(&self, note: &Note) -> Result<InstrumentSource, EngineError> {
        if note.channel == PERCUSSION_CHANNEL {
            let def = self.articulate(percussion_definition(note.key));
            return Ok(InstrumentSource::Synth(def));
        }
        match self.mode {
            EngineMode::SoundFont => {
                let Some(bank) = &self.bank else {
                    return Err(EngineError::EngineNotReady("no sound font loaded"));
                };
                Ok(InstrumentSource::Sampled(self.resolve_sampled(bank, note)))
            }
            mode => {
                let def = self.articulate(family_definition(mode, note.program));
                Ok(InstrumentSource::Synth(def))
            }
        }
    }

    fn resolve_sampled(&self, bank: &Arc<SoundFontBank>, note: &Note) -> SampledDefinition {
        let velocity = (note.raw_velocity * 127.0).round().clamp(0.0, 127.0) as u8;
        let regions: Vec<Region> = bank
            .regions(0, note.program as u16, note.key, velocity)
            .into_iter()
            .cloned()
            .collect();
        // Summary chain from the first (primary) layer; an empty match
        // yields a silent voice rather than a guessed substitute.
        let (envelope, pan, reverb_send) = match regions.first() {
            Some(r) => (r.envelope, r.pan, r.reverb_send),
            None => (Envelope::default(), 0.0, 0.0),
        };
        SampledDefinition {
            bank: Arc::clone(bank),
            regions,
            envelope: self.scale_envelope(envelope),
            pan,
            reverb_send: self.scale_send(reverb_send),
        }
    }

    /// Applies the articulation knob to a synthetic definition.
    fn articulate(&self, mut def: SynthDefinition) -> SynthDefinition {
        def.envelope = self.scale_envelope(def.envelope);
        if let Some(filter) = &mut def.filter {
            // Brightness: dark and plucky at 0, open at 1.
            filter.cutoff_hz *= brightness_factor(self.articulation);
        }
        def.reverb_send = self.scale_send(def.reverb_send);
        def
    }

    fn scale_envelope(&self, mut env: Envelope) -> Envelope {
        let stretch = time_stretch(self.articulation);
        env.attack = (env.attack * stretch).max(0.001);
        env.decay = (env.decay * stretch).max(0.01);
        env.release = (env.release * stretch).max(0.01);
        env.sustain = (env.sustain * sustain_factor(self.articulation)).clamp(0.0, 1.0);
        env
    }

    fn scale_send(&self, send: f32) -> f32 {
        (send * (0.5 + self.articulation)).clamp(0.0, 1.0)
    }
}

/// Attack/decay/release multiplier: 0.25x at articulation 0, 1.0x at
/// 0.5, 1.75x at 1.
fn time_stretch(articulation: f32) -> f32 {
    0.25 + 1.5 * articulation
}

/// Sustain level multiplier: 0.6x at 0, 1.2x at 1 (clamped downstream).
fn sustain_factor(articulation: f32) -> f32 {
    0.6 + 0.6 * articulation
}

/// Filter cutoff multiplier: 0.5x at 0, 2.0x at 1.
fn brightness_factor(articulation: f32) -> f32 {
    (2.0f32).powf(2.0 * articulation - 1.0)
}

fn layer(waveform: Waveform, detune_cents: f32, gain: f32) -> OscLayer {
    OscLayer {
        waveform,
        detune_cents,
        gain,
    }
}

/// General MIDI program family (16 families of 8 programs).
fn family_of(program: u8) -> u8 {
    (program.min(127)) / 8
}

/// Neutral-articulation definition per (mode, program family).
fn family_definition(mode: EngineMode, program: u8) -> SynthDefinition {
    match mode {
        EngineMode::Analog => analog_family(family_of(program)),
        EngineMode::Chip => chip_family(family_of(program)),
        EngineMode::Organ => organ_family(family_of(program)),
        // Sampled notes never reach the family tables.
        EngineMode::SoundFont => analog_family(family_of(program)),
    }
}

fn analog_family(family: u8) -> SynthDefinition {
    match family {
        // Pianos and chromatic percussion: bright pluck, fast decay.
        0 | 1 => SynthDefinition {
            layers: vec![
                layer(Waveform::Triangle, 0.0, 0.6),
                layer(Waveform::Sawtooth, 4.0, 0.25),
            ],
            filter: Some(FilterSpec { cutoff_hz: 3500.0 }),
            lfo: None,
            envelope: Envelope {
                delay: 0.0,
                attack: 0.003,
                hold: 0.0,
                decay: 0.8,
                sustain: 0.15,
                release: 0.25,
            },
            reverb_send: 0.15,
        },
        // Organs: steady, no decay.
        2 => SynthDefinition {
            layers: vec![
                layer(Waveform::Sine, 0.0, 0.5),
                layer(Waveform::Sine, 1200.0, 0.3),
                layer(Waveform::Sine, 1902.0, 0.15),
            ],
            filter: None,
            lfo: Some(LfoSpec {
                frequency_hz: 6.0,
                pitch_depth_cents: 0.0,
                amp_depth: 0.1,
            }),
            envelope: Envelope {
                delay: 0.0,
                attack: 0.01,
                hold: 0.0,
                decay: 0.05,
                sustain: 0.9,
                release: 0.1,
            },
            reverb_send: 0.2,
        },
        // Guitars: plucked saw.
        3 => SynthDefinition {
            layers: vec![
                layer(Waveform::Sawtooth, 0.0, 0.5),
                layer(Waveform::Triangle, -3.0, 0.3),
            ],
            filter: Some(FilterSpec { cutoff_hz: 2500.0 }),
            lfo: None,
            envelope: Envelope {
                delay: 0.0,
                attack: 0.004,
                hold: 0.0,
                decay: 0.6,
                sustain: 0.2,
                release: 0.2,
            },
            reverb_send: 0.15,
        },
        // Basses: dark square/triangle mix.
        4 => SynthDefinition {
            layers: vec![
                layer(Waveform::Triangle, 0.0, 0.6),
                layer(Waveform::Square, -1200.0, 0.2),
            ],
            filter: Some(FilterSpec { cutoff_hz: 900.0 }),
            lfo: None,
            envelope: Envelope {
                delay: 0.0,
                attack: 0.005,
                hold: 0.0,
                decay: 0.3,
                sustain: 0.5,
                release: 0.12,
            },
            reverb_send: 0.05,
        },
        // Strings and ensembles: slow detuned saws with vibrato.
        5 | 6 => SynthDefinition {
            layers: vec![
                layer(Waveform::Sawtooth, -6.0, 0.35),
                layer(Waveform::Sawtooth, 6.0, 0.35),
            ],
            filter: Some(FilterSpec { cutoff_hz: 2000.0 }),
            lfo: Some(LfoSpec {
                frequency_hz: 5.0,
                pitch_depth_cents: 8.0,
                amp_depth: 0.0,
            }),
            envelope: Envelope {
                delay: 0.0,
                attack: 0.12,
                hold: 0.0,
                decay: 0.2,
                sustain: 0.8,
                release: 0.4,
            },
            reverb_send: 0.3,
        },
        // Brass and reeds: bright saw, medium attack.
        7 | 8 => SynthDefinition {
            layers: vec![
                layer(Waveform::Sawtooth, 0.0, 0.55),
                layer(Waveform::Square, 2.0, 0.15),
            ],
            filter: Some(FilterSpec { cutoff_hz: 3000.0 }),
            lfo: None,
            envelope: Envelope {
                delay: 0.0,
                attack: 0.04,
                hold: 0.0,
                decay: 0.15,
                sustain: 0.75,
                release: 0.15,
            },
            reverb_send: 0.2,
        },
        // Pipes: pure, breathy.
        9 => SynthDefinition {
            layers: vec![
                layer(Waveform::Sine, 0.0, 0.6),
                layer(Waveform::Noise, 0.0, 0.03),
            ],
            filter: Some(FilterSpec { cutoff_hz: 4000.0 }),
            lfo: Some(LfoSpec {
                frequency_hz: 5.5,
                pitch_depth_cents: 5.0,
                amp_depth: 0.05,
            }),
            envelope: Envelope {
                delay: 0.0,
                attack: 0.06,
                hold: 0.0,
                decay: 0.1,
                sustain: 0.85,
                release: 0.2,
            },
            reverb_send: 0.25,
        },
        // Synth leads.
        10 => SynthDefinition {
            layers: vec![
                layer(Waveform::Square, 0.0, 0.45),
                layer(Waveform::Sawtooth, 7.0, 0.3),
            ],
            filter: Some(FilterSpec { cutoff_hz: 3500.0 }),
            lfo: None,
            envelope: Envelope {
                delay: 0.0,
                attack: 0.01,
                hold: 0.0,
                decay: 0.1,
                sustain: 0.8,
                release: 0.15,
            },
            reverb_send: 0.15,
        },
        // Pads and effects: wide, slow.
        11 | 12 => SynthDefinition {
            layers: vec![
                layer(Waveform::Sawtooth, -10.0, 0.3),
                layer(Waveform::Sawtooth, 10.0, 0.3),
                layer(Waveform::Triangle, 0.0, 0.2),
            ],
            filter: Some(FilterSpec { cutoff_hz: 1800.0 }),
            lfo: Some(LfoSpec {
                frequency_hz: 0.8,
                pitch_depth_cents: 0.0,
                amp_depth: 0.15,
            }),
            envelope: Envelope {
                delay: 0.0,
                attack: 0.3,
                hold: 0.0,
                decay: 0.3,
                sustain: 0.85,
                release: 0.8,
            },
            reverb_send: 0.35,
        },
        // Ethnic, percussive, sound effects: tonal transient.
        _ => SynthDefinition {
            layers: vec![
                layer(Waveform::Triangle, 0.0, 0.5),
                layer(Waveform::Noise, 0.0, 0.08),
            ],
            filter: Some(FilterSpec { cutoff_hz: 2800.0 }),
            lfo: None,
            envelope: Envelope {
                delay: 0.0,
                attack: 0.003,
                hold: 0.0,
                decay: 0.5,
                sustain: 0.1,
                release: 0.2,
            },
            reverb_send: 0.2,
        },
    }
}

fn chip_family(family: u8) -> SynthDefinition {
    let (waveform, sustain) = match family {
        4 => (Waveform::Triangle, 0.7), // bass
        5 | 6 | 11 | 12 => (Waveform::Triangle, 0.85),
        _ => (Waveform::Square, 0.6),
    };
    SynthDefinition {
        layers: vec![layer(waveform, 0.0, 0.5)],
        filter: None,
        lfo: None,
        envelope: Envelope {
            delay: 0.0,
            attack: 0.002,
            hold: 0.0,
            decay: 0.15,
            sustain,
            release: 0.08,
        },
        reverb_send: 0.05,
    }
}

fn organ_family(family: u8) -> SynthDefinition {
    // Drawbar mix varies a little by family; always sine stacks.
    let upper_gain = match family {
        4 => 0.1,      // bass: mostly fundamental
        10 | 7 => 0.4, // leads, brass: bright
        _ => 0.25,
    };
    SynthDefinition {
        layers: vec![
            layer(Waveform::Sine, 0.0, 0.5),
            layer(Waveform::Sine, 1200.0, upper_gain),
            layer(Waveform::Sine, 2400.0, upper_gain * 0.5),
        ],
        filter: None,
        lfo: Some(LfoSpec {
            frequency_hz: 6.5,
            pitch_depth_cents: 0.0,
            amp_depth: 0.08,
        }),
        envelope: Envelope {
            delay: 0.0,
            attack: 0.008,
            hold: 0.0,
            decay: 0.02,
            sustain: 0.95,
            release: 0.08,
        },
        reverb_send: 0.2,
    }
}

/// Fixed percussion table, keyed by GM drum note number.
fn percussion_definition(key: u8) -> SynthDefinition {
    let (layers, decay, release, reverb) = match key {
        // Kicks: low tonal thump.
        35 | 36 => (
            vec![
                layer(Waveform::Sine, -2400.0, 0.8),
                layer(Waveform::Noise, 0.0, 0.05),
            ],
            0.18,
            0.05,
            0.05,
        ),
        // Snares and claps: noise burst with a tonal body.
        38 | 39 | 40 => (
            vec![
                layer(Waveform::Noise, 0.0, 0.5),
                layer(Waveform::Triangle, -1200.0, 0.15),
            ],
            0.2,
            0.08,
            0.15,
        ),
        // Closed hats: very short noise.
        42 | 44 => (vec![layer(Waveform::Noise, 0.0, 0.3)], 0.06, 0.03, 0.05),
        // Open hat and rides: longer noise.
        46 | 51 | 59 => (vec![layer(Waveform::Noise, 0.0, 0.3)], 0.4, 0.15, 0.15),
        // Crashes: long bright noise.
        49 | 52 | 55 | 57 => (vec![layer(Waveform::Noise, 0.0, 0.4)], 1.0, 0.4, 0.3),
        // Toms: tonal transient.
        41 | 43 | 45 | 47 | 48 | 50 => (
            vec![
                layer(Waveform::Sine, -1200.0, 0.6),
                layer(Waveform::Noise, 0.0, 0.08),
            ],
            0.3,
            0.1,
            0.1,
        ),
        // Everything else: generic short percussive mix.
        _ => (
            vec![
                layer(Waveform::Noise, 0.0, 0.25),
                layer(Waveform::Triangle, 0.0, 0.2),
            ],
            0.15,
            0.06,
            0.1,
        ),
    };
    SynthDefinition {
        layers,
        filter: None,
        lfo: None,
        envelope: Envelope {
            delay: 0.0,
            attack: 0.001,
            hold: 0.0,
            decay,
            sustain: 0.0,
            release,
        },
        reverb_send: reverb,
    }
}
