//! Zone merging and playable region construction.
//!
//! An SF2 instrument is a set of zones; each zone is a scoped bag of
//! generators. The merge rules implemented here:
//!
//! - An instrument's first zone is global if it carries no sampleID
//!   generator; a preset's first zone is global if it carries no
//!   instrument generator. Every local zone starts from its global
//!   zone's accumulated values.
//! - Additive generators (sample start/end/loop offsets, coarse/fine
//!   tune, attenuation) sum across global→local and preset→instrument
//!   scopes.
//! - Key and velocity ranges intersect; an empty intersection drops the
//!   candidate region.
//! - Every other generator takes the most specific assignment, preset
//!   scope over instrument scope.

use super::decode::{GenRecord, RawSoundFont};
use crate::synth::Envelope;

// Generator operators (SF2 §8.1.2), the subset this engine interprets.
const GEN_START_OFFSET: u16 = 0;
const GEN_END_OFFSET: u16 = 1;
const GEN_LOOP_START_OFFSET: u16 = 2;
const GEN_LOOP_END_OFFSET: u16 = 3;
const GEN_START_COARSE_OFFSET: u16 = 4;
const GEN_END_COARSE_OFFSET: u16 = 12;
const GEN_CHORUS_SEND: u16 = 15;
const GEN_REVERB_SEND: u16 = 16;
const GEN_PAN: u16 = 17;
const GEN_DELAY_VOL_ENV: u16 = 33;
const GEN_ATTACK_VOL_ENV: u16 = 34;
const GEN_HOLD_VOL_ENV: u16 = 35;
const GEN_DECAY_VOL_ENV: u16 = 36;
const GEN_SUSTAIN_VOL_ENV: u16 = 37;
const GEN_RELEASE_VOL_ENV: u16 = 38;
const GEN_INSTRUMENT: u16 = 41;
const GEN_KEY_RANGE: u16 = 43;
const GEN_VEL_RANGE: u16 = 44;
const GEN_LOOP_START_COARSE_OFFSET: u16 = 45;
const GEN_ATTENUATION: u16 = 48;
const GEN_LOOP_END_COARSE_OFFSET: u16 = 50;
const GEN_COARSE_TUNE: u16 = 51;
const GEN_FINE_TUNE: u16 = 52;
const GEN_SAMPLE_ID: u16 = 53;
const GEN_SAMPLE_MODES: u16 = 54;
const GEN_SCALE_TUNING: u16 = 56;
const GEN_ROOT_KEY: u16 = 58;

/// Coarse offset generators count in 32768-sample units.
const COARSE_UNIT: i32 = 32768;

/// Fallback release when a region specifies none; an instant cut clicks.
const DEFAULT_RELEASE_SECS: f32 = 0.05;

/// A fully merged, playable zone combination referencing one sample slice.
///
/// Immutable once built; the bank builds all regions at decode time.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Identity within the bank, used as a sample-buffer cache key.
    pub(crate) id: u32,
    pub key_range: (u8, u8),
    pub vel_range: (u8, u8),
    /// Slice bounds into the bank's sample pool, clamped to available data.
    pub start: usize,
    pub end: usize,
    /// Loop bounds, clamped into the slice.
    pub loop_start: usize,
    pub loop_end: usize,
    pub looped: bool,
    pub sample_rate: u32,
    pub root_key: u8,
    /// Tuning: semitones, cents (sample correction folded in), and
    /// cents-per-key scale (100 = equal temperament).
    pub coarse_tune: i32,
    pub fine_tune_cents: i32,
    pub scale_tuning: u16,
    /// Attenuation in centibels (cB); 0 = full level.
    pub attenuation_cb: i32,
    /// Stereo position, -1..1.
    pub pan: f32,
    pub envelope: Envelope,
    pub reverb_send: f32,
    pub chorus_send: f32,
}

impl Region {
    /// True if the region sounds for this key/velocity pair.
    pub fn matches(&self, key: u8, velocity: u8) -> bool {
        (self.key_range.0..=self.key_range.1).contains(&key)
            && (self.vel_range.0..=self.vel_range.1).contains(&velocity)
    }

    /// Linear gain derived from the accumulated attenuation.
    pub fn gain(&self) -> f32 {
        10f32.powf(-(self.attenuation_cb.max(0) as f32) / 200.0)
    }
}

/// One preset (bank/program address) and its finalized regions.
#[derive(Debug)]
pub struct Preset {
    pub name: String,
    pub bank: u16,
    pub program: u16,
    pub regions: Vec<Region>,
}

/// Accumulated generator values for one zone scope.
#[derive(Debug, Clone)]
struct ZoneGens {
    key_range: (u8, u8),
    vel_range: (u8, u8),
    start_offset: i32,
    end_offset: i32,
    loop_start_offset: i32,
    loop_end_offset: i32,
    coarse_tune: i32,
    fine_tune: i32,
    attenuation_cb: i32,
    pan: Option<f32>,
    sample_modes: Option<u16>,
    root_key: Option<u8>,
    scale_tuning: Option<u16>,
    reverb_send: Option<f32>,
    chorus_send: Option<f32>,
    env_delay: Option<i16>,
    env_attack: Option<i16>,
    env_hold: Option<i16>,
    env_decay: Option<i16>,
    env_sustain_cb: Option<i16>,
    env_release: Option<i16>,
    sample_id: Option<u16>,
    instrument_id: Option<u16>,
}

impl Default for ZoneGens {
    fn default() -> Self {
        Self {
            key_range: (0, 127),
            vel_range: (0, 127),
            start_offset: 0,
            end_offset: 0,
            loop_start_offset: 0,
            loop_end_offset: 0,
            coarse_tune: 0,
            fine_tune: 0,
            attenuation_cb: 0,
            pan: None,
            sample_modes: None,
            root_key: None,
            scale_tuning: None,
            reverb_send: None,
            chorus_send: None,
            env_delay: None,
            env_attack: None,
            env_hold: None,
            env_decay: None,
            env_sustain_cb: None,
            env_release: None,
            sample_id: None,
            instrument_id: None,
        }
    }
}

impl ZoneGens {
    fn apply(&mut self, gen: GenRecord) {
        let signed = gen.amount as i16;
        match gen.oper {
            GEN_START_OFFSET => self.start_offset += signed as i32,
            GEN_END_OFFSET => self.end_offset += signed as i32,
            GEN_LOOP_START_OFFSET => self.loop_start_offset += signed as i32,
            GEN_LOOP_END_OFFSET => self.loop_end_offset += signed as i32,
            GEN_START_COARSE_OFFSET => self.start_offset += signed as i32 * COARSE_UNIT,
            GEN_END_COARSE_OFFSET => self.end_offset += signed as i32 * COARSE_UNIT,
            GEN_LOOP_START_COARSE_OFFSET => self.loop_start_offset += signed as i32 * COARSE_UNIT,
            GEN_LOOP_END_COARSE_OFFSET => self.loop_end_offset += signed as i32 * COARSE_UNIT,
            GEN_CHORUS_SEND => self.chorus_send = Some((signed as f32 / 1000.0).clamp(0.0, 1.0)),
            GEN_REVERB_SEND => self.reverb_send = Some((signed as f32 / 1000.0).clamp(0.0, 1.0)),
            GEN_PAN => self.pan = Some((signed as f32 / 500.0).clamp(-1.0, 1.0)),
            GEN_DELAY_VOL_ENV => self.env_delay = Some(signed),
            GEN_ATTACK_VOL_ENV => self.env_attack = Some(signed),
            GEN_HOLD_VOL_ENV => self.env_hold = Some(signed),
            GEN_DECAY_VOL_ENV => self.env_decay = Some(signed),
            GEN_SUSTAIN_VOL_ENV => self.env_sustain_cb = Some(signed),
            GEN_RELEASE_VOL_ENV => self.env_release = Some(signed),
            GEN_INSTRUMENT => self.instrument_id = Some(gen.amount),
            GEN_KEY_RANGE => self.key_range = intersect(self.key_range, range_of(gen.amount)),
            GEN_VEL_RANGE => self.vel_range = intersect(self.vel_range, range_of(gen.amount)),
            GEN_ATTENUATION => self.attenuation_cb += signed as i32,
            GEN_COARSE_TUNE => self.coarse_tune += signed as i32,
            GEN_FINE_TUNE => self.fine_tune += signed as i32,
            GEN_SAMPLE_ID => self.sample_id = Some(gen.amount),
            GEN_SAMPLE_MODES => self.sample_modes = Some(gen.amount),
            GEN_SCALE_TUNING => self.scale_tuning = Some(gen.amount),
            GEN_ROOT_KEY => {
                if gen.amount <= 127 {
                    self.root_key = Some(gen.amount as u8);
                }
            }
            _ => {} // uninterpreted generators are ignored, never guessed at
        }
    }

    /// Layers a preset-scope zone over an instrument-scope zone.
    /// Returns `None` when the range intersection is empty.
    fn layered_over(&self, inst: &ZoneGens) -> Option<ZoneGens> {
        let key_range = intersect(self.key_range, inst.key_range);
        let vel_range = intersect(self.vel_range, inst.vel_range);
        if key_range.0 > key_range.1 || vel_range.0 > vel_range.1 {
            return None;
        }
        Some(ZoneGens {
            key_range,
            vel_range,
            start_offset: self.start_offset + inst.start_offset,
            end_offset: self.end_offset + inst.end_offset,
            loop_start_offset: self.loop_start_offset + inst.loop_start_offset,
            loop_end_offset: self.loop_end_offset + inst.loop_end_offset,
            coarse_tune: self.coarse_tune + inst.coarse_tune,
            fine_tune: self.fine_tune + inst.fine_tune,
            attenuation_cb: self.attenuation_cb + inst.attenuation_cb,
            pan: self.pan.or(inst.pan),
            sample_modes: self.sample_modes.or(inst.sample_modes),
            root_key: self.root_key.or(inst.root_key),
            scale_tuning: self.scale_tuning.or(inst.scale_tuning),
            reverb_send: self.reverb_send.or(inst.reverb_send),
            chorus_send: self.chorus_send.or(inst.chorus_send),
            env_delay: self.env_delay.or(inst.env_delay),
            env_attack: self.env_attack.or(inst.env_attack),
            env_hold: self.env_hold.or(inst.env_hold),
            env_decay: self.env_decay.or(inst.env_decay),
            env_sustain_cb: self.env_sustain_cb.or(inst.env_sustain_cb),
            env_release: self.env_release.or(inst.env_release),
            sample_id: inst.sample_id,
            instrument_id: None,
        })
    }
}

fn range_of(amount: u16) -> (u8, u8) {
    let lo = (amount & 0xFF) as u8;
    let hi = (amount >> 8) as u8;
    if lo <= hi {
        (lo, hi)
    } else {
        (hi, lo)
    }
}

fn intersect(a: (u8, u8), b: (u8, u8)) -> (u8, u8) {
    (a.0.max(b.0), a.1.min(b.1))
}

/// Timecents to seconds: base-2 logarithmic, 1200 tc per octave of time.
/// -12000 tc (and below) is the SF2 convention for "instantaneous".
fn timecents_to_secs(tc: i16) -> f32 {
    if tc <= -12000 {
        0.0
    } else {
        (tc as f32 / 1200.0).exp2()
    }
}

fn envelope_of(gens: &ZoneGens) -> Envelope {
    let sustain = match gens.env_sustain_cb {
        // Sustain generator is attenuation from peak, in centibels.
        Some(cb) => 10f32.powf(-(cb.clamp(0, 1440) as f32) / 200.0),
        None => 1.0,
    };
    Envelope {
        delay: gens.env_delay.map(timecents_to_secs).unwrap_or(0.0),
        attack: gens.env_attack.map(timecents_to_secs).unwrap_or(0.0),
        hold: gens.env_hold.map(timecents_to_secs).unwrap_or(0.0),
        decay: gens.env_decay.map(timecents_to_secs).unwrap_or(0.0),
        sustain,
        release: gens
            .env_release
            .map(timecents_to_secs)
            .unwrap_or(DEFAULT_RELEASE_SECS)
            .max(0.01),
    }
}

/// Splits a zone list into (global, locals) by presence of the marker
/// generator that makes a zone local (sampleID or instrument).
fn split_zones(zones: Vec<ZoneGens>, is_local: impl Fn(&ZoneGens) -> bool) -> (ZoneGens, Vec<ZoneGens>) {
    let mut global = ZoneGens::default();
    let mut locals = Vec::new();
    for (i, zone) in zones.into_iter().enumerate() {
        if is_local(&zone) {
            locals.push(zone);
        } else if i == 0 {
            global = zone;
        }
        // A generator-only zone after the first is ill-formed; excluded.
    }
    (global, locals)
}

/// Reads the zones of record `index` from a bag table, each zone's
/// generators accumulated on top of `base`.
fn zones_of(
    bags: &[super::decode::ZoneIndex],
    gens: &[GenRecord],
    from_bag: usize,
    to_bag: usize,
) -> Vec<ZoneGens> {
    let mut out = Vec::new();
    for bag in from_bag..to_bag.min(bags.len().saturating_sub(1)) {
        let gen_start = bags[bag].gen_index as usize;
        let gen_end = bags[bag + 1].gen_index as usize;
        let mut zone = ZoneGens::default();
        for gen in gens.iter().skip(gen_start).take(gen_end.saturating_sub(gen_start)) {
            zone.apply(*gen);
        }
        out.push(zone);
    }
    out
}

/// Builds every preset's finalized regions from the raw tables.
pub(crate) fn build_presets(raw: &RawSoundFont) -> Vec<Preset> {
    // Instrument zones first: global + local, local (sample-bearing)
    // zones become candidate regions.
    let instrument_count = raw.inst.len() - 1;
    let mut instrument_zones: Vec<Vec<ZoneGens>> = Vec::with_capacity(instrument_count);
    for i in 0..instrument_count {
        let zones = zones_of(
            &raw.ibag,
            &raw.igen,
            raw.inst[i].bag_index as usize,
            raw.inst[i + 1].bag_index as usize,
        );
        let (global, locals) = split_zones(zones, |z| z.sample_id.is_some());
        let merged = locals
            .into_iter()
            .map(|local| merge_into_global(&global, local))
            .collect();
        instrument_zones.push(merged);
    }

    let mut next_region_id: u32 = 0;
    let mut presets = Vec::new();
    for p in 0..raw.phdr.len() - 1 {
        let header = &raw.phdr[p];
        let zones = zones_of(
            &raw.pbag,
            &raw.pgen,
            header.bag_index as usize,
            raw.phdr[p + 1].bag_index as usize,
        );
        let (global, locals) = split_zones(zones, |z| z.instrument_id.is_some());

        let mut regions = Vec::new();
        for local in locals {
            let preset_zone = merge_into_global(&global, local);
            let Some(inst_id) = preset_zone.instrument_id else {
                continue;
            };
            let Some(inst_zones) = instrument_zones.get(inst_id as usize) else {
                continue; // dangling instrument reference: unusable, excluded
            };
            for inst_zone in inst_zones {
                let Some(combined) = preset_zone.layered_over(inst_zone) else {
                    continue;
                };
                if let Some(region) = finalize_region(raw, &combined, next_region_id) {
                    next_region_id += 1;
                    regions.push(region);
                }
            }
        }
        presets.push(Preset {
            name: header.name.clone(),
            bank: header.bank,
            program: header.program,
            regions,
        });
    }
    presets
}

/// Every local zone begins from the governing global zone's accumulated
/// values: additives sum, ranges intersect, assignments in the local
/// zone win.
fn merge_into_global(global: &ZoneGens, local: ZoneGens) -> ZoneGens {
    ZoneGens {
        key_range: intersect(global.key_range, local.key_range),
        vel_range: intersect(global.vel_range, local.vel_range),
        start_offset: global.start_offset + local.start_offset,
        end_offset: global.end_offset + local.end_offset,
        loop_start_offset: global.loop_start_offset + local.loop_start_offset,
        loop_end_offset: global.loop_end_offset + local.loop_end_offset,
        coarse_tune: global.coarse_tune + local.coarse_tune,
        fine_tune: global.fine_tune + local.fine_tune,
        attenuation_cb: global.attenuation_cb + local.attenuation_cb,
        pan: local.pan.or(global.pan),
        sample_modes: local.sample_modes.or(global.sample_modes),
        root_key: local.root_key.or(global.root_key),
        scale_tuning: local.scale_tuning.or(global.scale_tuning),
        reverb_send: local.reverb_send.or(global.reverb_send),
        chorus_send: local.chorus_send.or(global.chorus_send),
        env_delay: local.env_delay.or(global.env_delay),
        env_attack: local.env_attack.or(global.env_attack),
        env_hold: local.env_hold.or(global.env_hold),
        env_decay: local.env_decay.or(global.env_decay),
        env_sustain_cb: local.env_sustain_cb.or(global.env_sustain_cb),
        env_release: local.env_release.or(global.env_release),
        sample_id: local.sample_id.or(global.sample_id),
        instrument_id: local.instrument_id.or(global.instrument_id),
    }
}

/// Resolves a merged zone against its sample header. Returns `None` for
/// anything unusable (dangling sample, empty slice after clamping).
fn finalize_region(raw: &RawSoundFont, gens: &ZoneGens, id: u32) -> Option<Region> {
    let shdr = raw.shdr.get(gens.sample_id? as usize)?;
    let pool_len = raw.samples.len() as i64;

    let clamp = |v: i64| v.clamp(0, pool_len) as usize;
    let start = clamp(shdr.start as i64 + gens.start_offset as i64);
    let end = clamp(shdr.end as i64 + gens.end_offset as i64);
    if end <= start + 1 {
        return None;
    }
    let loop_start = (shdr.loop_start as i64 + gens.loop_start_offset as i64)
        .clamp(start as i64, end as i64) as usize;
    let loop_end =
        (shdr.loop_end as i64 + gens.loop_end_offset as i64).clamp(start as i64, end as i64) as usize;
    // Sample mode 1 and 3 loop; 0 and 2 play through.
    let looped = matches!(gens.sample_modes.unwrap_or(0) & 0x3, 1 | 3);

    let root_key = gens.root_key.unwrap_or(if shdr.original_pitch <= 127 {
        shdr.original_pitch
    } else {
        60
    });

    Some(Region {
        id,
        key_range: gens.key_range,
        vel_range: gens.vel_range,
        start,
        end,
        loop_start,
        loop_end,
        looped,
        sample_rate: shdr.sample_rate.max(1),
        root_key,
        coarse_tune: gens.coarse_tune,
        fine_tune_cents: gens.fine_tune + shdr.correction as i32,
        scale_tuning: gens.scale_tuning.unwrap_or(100),
        attenuation_cb: gens.attenuation_cb,
        pan: gens.pan.unwrap_or(0.0),
        envelope: envelope_of(gens),
        reverb_send: gens.reverb_send.unwrap_or(0.0),
        chorus_send: gens.chorus_send.unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soundfont::fixture::Sf2Builder;
    use crate::soundfont::SoundFontBank;

    fn bank_with_zones(
        inst_global: Vec<(u16, u16)>,
        inst_locals: Vec<Vec<(u16, u16)>>,
    ) -> SoundFontBank {
        let mut b = Sf2Builder::new("Zones");
        b.add_samples(&vec![1000i16; 4000]);
        let sample = b.add_sample_header(0, 4000, 500, 3500, 44100, 60);
        let mut zones = vec![inst_global];
        for mut local in inst_locals {
            local.push((53, sample));
            zones.push(local);
        }
        let inst = b.add_instrument(zones);
        b.add_preset(0, 0, vec![vec![(41, inst)]]);
        SoundFontBank::decode(&b.build()).unwrap()
    }

    #[test]
    fn test_local_overrides_global_pan() {
        // Global pans hard right (+500); one local zone pans hard left.
        let bank = bank_with_zones(
            vec![(17, 500u16)],
            vec![vec![(17, (-500i16) as u16)], vec![]],
        );
        let regions = bank.regions(0, 0, 60, 100);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].pan, -1.0); // local assignment wins
        assert_eq!(regions[1].pan, 1.0); // inherits global
    }

    #[test]
    fn test_fine_tune_sums_across_scopes() {
        // Global +10 cents, local +15 cents: additive.
        let bank = bank_with_zones(vec![(52, 10)], vec![vec![(52, 15)]]);
        let regions = bank.regions(0, 0, 60, 100);
        assert_eq!(regions[0].fine_tune_cents, 25);
    }

    #[test]
    fn test_ranges_intersect_and_filter() {
        let key_range = |lo: u16, hi: u16| (43u16, lo | (hi << 8));
        // Global restricts to keys 40-80; locals carve that up further.
        let bank = bank_with_zones(
            vec![key_range(40, 80)],
            vec![vec![key_range(0, 60)], vec![key_range(55, 127)]],
        );
        // Key 50: only the first local's 40-60 intersection matches.
        assert_eq!(bank.regions(0, 0, 50, 100).len(), 1);
        // Key 58: inside both intersections, both layers returned.
        assert_eq!(bank.regions(0, 0, 58, 100).len(), 2);
        // Key 30: outside the global restriction entirely.
        assert!(bank.regions(0, 0, 30, 100).is_empty());
    }

    #[test]
    fn test_velocity_range_filter() {
        let vel_range = |lo: u16, hi: u16| (44u16, lo | (hi << 8));
        let bank = bank_with_zones(
            vec![],
            vec![vec![vel_range(0, 63)], vec![vel_range(64, 127)]],
        );
        let soft = bank.regions(0, 0, 60, 40);
        let loud = bank.regions(0, 0, 60, 100);
        assert_eq!(soft.len(), 1);
        assert_eq!(loud.len(), 1);
        assert_ne!(soft[0].vel_range, loud[0].vel_range);
    }

    #[test]
    fn test_empty_range_intersection_drops_region() {
        let key_range = |lo: u16, hi: u16| (43u16, lo | (hi << 8));
        let bank = bank_with_zones(vec![key_range(0, 40)], vec![vec![key_range(80, 127)]]);
        // Disjoint global/local ranges: no playable region at any key.
        for key in [0, 40, 80, 127] {
            assert!(bank.regions(0, 0, key, 100).is_empty());
        }
    }

    #[test]
    fn test_attenuation_sums_and_converts() {
        let bank = bank_with_zones(vec![(48, 50)], vec![vec![(48, 150)]]);
        let regions = bank.regions(0, 0, 60, 100);
        assert_eq!(regions[0].attenuation_cb, 200);
        assert!((regions[0].gain() - 0.1).abs() < 1e-4); // -20 dB
    }

    #[test]
    fn test_sample_offsets_clamp_to_pool() {
        // End offset pushes past the pool: clamped, region still usable.
        let mut b = Sf2Builder::new("Clamp");
        b.add_samples(&vec![0i16; 1000]);
        let sample = b.add_sample_header(0, 1000, 0, 1000, 44100, 60);
        let inst = b.add_instrument(vec![vec![(1, 5000), (53, sample)]]);
        b.add_preset(0, 0, vec![vec![(41, inst)]]);
        let bank = SoundFontBank::decode(&b.build()).unwrap();
        let regions = bank.regions(0, 0, 60, 100);
        assert_eq!(regions[0].end, 1000);
    }

    #[test]
    fn test_envelope_timecents() {
        // Attack -1200 tc = 0.5 s; sustain 200 cB below peak.
        let bank = bank_with_zones(
            vec![],
            vec![vec![(34, (-1200i16) as u16), (37, 200)]],
        );
        let env = bank.regions(0, 0, 60, 100)[0].envelope;
        assert!((env.attack - 0.5).abs() < 1e-3);
        assert!((env.sustain - 0.1).abs() < 1e-3);
    }
}
