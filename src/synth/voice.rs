//! One live, sounding note with its own signal chain.
//!
//! A voice owns its sources (oscillators or sample players), one gain
//! envelope, and optional filter/LFO stages. The mixer drives it one
//! frame at a time against the sample clock: silent before its start
//! sample, released at its stop sample, finished when the envelope or
//! every one-shot source has run out. Teardown is a counted, one-shot
//! cleanup that runs exactly once per voice, for natural completion and
//! forced fades alike.

use crate::midi::Note;
use crate::synth::instrument::{key_to_freq, InstrumentSource, SampledDefinition, SynthDefinition};
use crate::synth::{GainEnvelope, Lfo, LowPassFilter, Oscillator, SamplePlayer};

enum SourceKind {
    Osc(Oscillator),
    Sample(SamplePlayer),
}

struct VoiceSource {
    kind: SourceKind,
    gain: f32,
    finished: bool,
}

impl VoiceSource {
    fn next_sample(&mut self, pitch_factor: f32) -> f32 {
        match &mut self.kind {
            SourceKind::Osc(osc) => osc.next_sample(pitch_factor) * self.gain,
            SourceKind::Sample(player) => player.next_sample(pitch_factor as f64) * self.gain,
        }
    }

    fn is_exhausted(&self) -> bool {
        match &self.kind {
            // Oscillators sound until the envelope ends them.
            SourceKind::Osc(_) => false,
            SourceKind::Sample(player) => player.is_finished(),
        }
    }
}

pub struct Voice {
    sources: Vec<VoiceSource>,
    envelope: GainEnvelope,
    filter: Option<LowPassFilter>,
    lfo: Option<Lfo>,
    gain: f32,
    pan: f32,
    reverb_send: f32,
    /// Mixer clock sample at which the voice starts sounding.
    start_sample: u64,
    /// Mixer clock sample at which the envelope release is triggered.
    release_sample: u64,
    started: bool,
    active_sources: usize,
    cleanup_done: bool,
}

impl Voice {
    /// Builds a voice from a resolved instrument source, anchored at
    /// absolute mixer-clock sample positions.
    pub fn from_instrument(
        source: &InstrumentSource,
        note: &Note,
        sample_rate: u32,
        start_sample: u64,
        release_sample: u64,
    ) -> Voice {
        match source {
            InstrumentSource::Synth(def) => {
                Self::from_synth(def, note, sample_rate, start_sample, release_sample)
            }
            InstrumentSource::Sampled(def) => {
                Self::from_sampled(def, note, sample_rate, start_sample, release_sample)
            }
        }
    }

    fn from_synth(
        def: &SynthDefinition,
        note: &Note,
        sample_rate: u32,
        start_sample: u64,
        release_sample: u64,
    ) -> Voice {
        let base_freq = key_to_freq(note.key);
        let sources: Vec<VoiceSource> = def
            .layers
            .iter()
            .map(|l| VoiceSource {
                kind: SourceKind::Osc(Oscillator::new(
                    l.waveform,
                    base_freq * (l.detune_cents / 1200.0).exp2(),
                    sample_rate,
                )),
                gain: l.gain,
                finished: false,
            })
            .collect();
        let active_sources = sources.len();
        Voice {
            sources,
            envelope: GainEnvelope::new(def.envelope, sample_rate),
            filter: def
                .filter
                .map(|f| LowPassFilter::new(f.cutoff_hz, sample_rate)),
            lfo: def.lfo.map(|l| {
                Lfo::new(l.frequency_hz, l.pitch_depth_cents, l.amp_depth, sample_rate)
            }),
            gain: note.velocity,
            pan: note.pan,
            reverb_send: (note.reverb_send + def.reverb_send).clamp(0.0, 1.0),
            start_sample,
            release_sample,
            started: false,
            active_sources,
            cleanup_done: false,
        }
    }

    fn from_sampled(
        def: &SampledDefinition,
        note: &Note,
        sample_rate: u32,
        start_sample: u64,
        release_sample: u64,
    ) -> Voice {
        let mut sources = Vec::with_capacity(def.regions.len());
        for region in &def.regions {
            let buffer = def.bank.region_buffer(region, sample_rate);
            // The buffer is resampled to the output rate, so the base
            // step is purely the key-to-root pitch ratio.
            let cents = (note.key as f32 - region.root_key as f32)
                * region.scale_tuning as f32
                + region.coarse_tune as f32 * 100.0
                + region.fine_tune_cents as f32;
            let step = ((cents / 1200.0) as f64).exp2();
            // Loop bounds are pool offsets; rescale into buffer frames.
            let scale = buffer.len() as f64 / (region.end - region.start).max(1) as f64;
            let loop_start = (region.loop_start - region.start) as f64 * scale;
            let loop_end = (region.loop_end - region.start) as f64 * scale;
            sources.push(VoiceSource {
                kind: SourceKind::Sample(SamplePlayer::new(
                    buffer,
                    step,
                    loop_start,
                    loop_end,
                    region.looped,
                )),
                gain: region.gain(),
                finished: false,
            });
        }
        let active_sources = sources.len();
        Voice {
            sources,
            envelope: GainEnvelope::new(def.envelope, sample_rate),
            filter: None,
            lfo: None,
            gain: note.velocity,
            pan: (note.pan + def.pan).clamp(-1.0, 1.0),
            reverb_send: (note.reverb_send + def.reverb_send).clamp(0.0, 1.0),
            start_sample,
            release_sample,
            started: false,
            active_sources,
            cleanup_done: false,
        }
    }

    pub fn start_sample(&self) -> u64 {
        self.start_sample
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.cleanup_done
    }

    /// Requests a short fade instead of the configured release.
    pub fn fade(&mut self, fade_samples: u64) {
        self.envelope.fade_out(fade_samples);
    }

    /// Immediately retires a voice that has not started sounding.
    /// Started voices must fade; this is a no-op for them.
    pub fn cancel(&mut self) {
        if !self.started {
            tracing::trace!(start_sample = self.start_sample, "voice cancelled before start");
            self.run_cleanup();
        }
    }

    /// Renders one frame at the given clock sample. Returns
    /// `(left, right, wet)` contributions; all zero while the voice is
    /// pending or after it has finished.
    pub fn next_frame(&mut self, clock_sample: u64, master_pitch: f32) -> (f32, f32, f32) {
        if self.cleanup_done || clock_sample < self.start_sample {
            return (0.0, 0.0, 0.0);
        }
        self.started = true;
        if clock_sample >= self.release_sample {
            self.envelope.release();
        }

        let (lfo_pitch, lfo_amp) = match &mut self.lfo {
            Some(lfo) => lfo.next_sample(),
            None => (1.0, 1.0),
        };
        let pitch = master_pitch * lfo_pitch;

        let mut mixed = 0.0f32;
        for source in &mut self.sources {
            if source.finished {
                continue;
            }
            mixed += source.next_sample(pitch);
            if source.is_exhausted() {
                source.finished = true;
                self.active_sources -= 1;
            }
        }
        if let Some(filter) = &mut self.filter {
            mixed = filter.process(mixed);
        }
        let level = self.envelope.next_sample() * lfo_amp * self.gain;
        let mono = mixed * level;

        if self.envelope.is_done() || self.active_sources == 0 {
            self.run_cleanup();
        }

        // Equal-power pan.
        let angle = (self.pan + 1.0) * std::f32::consts::FRAC_PI_4;
        let left = mono * angle.cos();
        let right = mono * angle.sin();
        (left, right, mono * self.reverb_send)
    }

    fn run_cleanup(&mut self) {
        if self.cleanup_done {
            return;
        }
        self.cleanup_done = true;
        self.sources.clear();
        self.active_sources = 0;
    }
}
