//! SoundFont 2 bank decoding and region lookup.
//!
//! A [`SoundFontBank`] is decoded once from an in-memory byte buffer and
//! is immutable afterwards, except for its internal sample-buffer cache.
//! Region lookup is an exact bank/program match followed by inclusive
//! key/velocity range containment; overlapping matches are all returned,
//! which is how multi-layer timbres work.

mod decode;
mod region;

pub use region::{Preset, Region};

use crate::error::DecodeError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A decoded SoundFont: display name, presets with finalized regions,
/// and the shared 16-bit sample pool.
#[derive(Debug)]
pub struct SoundFontBank {
    name: String,
    presets: Vec<Preset>,
    samples: Vec<i16>,
    /// Mono f32 buffers keyed by (region id, target sample rate); built
    /// lazily, cached for the bank's lifetime.
    buffer_cache: Mutex<HashMap<(u32, u32), Arc<Vec<f32>>>>,
}

impl SoundFontBank {
    /// Decodes a SoundFont 2 byte buffer.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::InvalidHeader`] if the buffer is not a RIFF container
    /// - [`DecodeError::UnsupportedFormat`] if the RIFF form is not `sfbk`
    /// - [`DecodeError::TruncatedStream`] if a chunk runs past the buffer
    /// - [`DecodeError::EmptyOrCorruptSoundFont`] if no playable region
    ///   can be built from the tables
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw = decode::parse(bytes)?;
        let presets = region::build_presets(&raw);
        if presets.iter().all(|p| p.regions.is_empty()) {
            return Err(DecodeError::EmptyOrCorruptSoundFont("no playable regions"));
        }
        tracing::info!(
            name = %raw.name,
            presets = presets.len(),
            samples = raw.samples.len(),
            "decoded sound font"
        );
        Ok(Self {
            name: raw.name,
            presets,
            samples: raw.samples,
            buffer_cache: Mutex::new(HashMap::new()),
        })
    }

    /// The bank's display name from the INFO chunk.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All decoded presets, terminal records excluded.
    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    /// Returns every region of the (bank, program) preset whose key and
    /// velocity ranges both contain the query. Multiple matches mean
    /// layered playback, not ambiguity.
    pub fn regions(&self, bank: u16, program: u16, key: u8, velocity: u8) -> Vec<&Region> {
        self.presets
            .iter()
            .find(|p| p.bank == bank && p.program == program)
            .map(|p| {
                p.regions
                    .iter()
                    .filter(|r| r.matches(key, velocity))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Builds (or returns the cached) mono sample buffer for a region at
    /// the given output rate. The slice is clamped to available pool
    /// data at region build time; resampling is linear.
    pub fn region_buffer(&self, region: &Region, target_rate: u32) -> Arc<Vec<f32>> {
        let key = (region.id, target_rate);
        let mut cache = self.buffer_cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(buffer) = cache.get(&key) {
            return Arc::clone(buffer);
        }
        let buffer = Arc::new(self.build_buffer(region, target_rate));
        cache.insert(key, Arc::clone(&buffer));
        buffer
    }

    fn build_buffer(&self, region: &Region, target_rate: u32) -> Vec<f32> {
        let src = &self.samples[region.start..region.end];
        let ratio = target_rate as f64 / region.sample_rate as f64;
        let out_len = ((src.len() as f64 * ratio) as usize).max(2);
        let mut out = Vec::with_capacity(out_len);
        for i in 0..out_len {
            let pos = i as f64 / ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = src.get(idx).copied().unwrap_or(0) as f32;
            let b = src.get(idx + 1).copied().unwrap_or(0) as f32;
            out.push((a * (1.0 - frac) + b * frac) / 32768.0);
        }
        out
    }
}

/// Hand-assembled SF2 byte fixtures for tests.
#[cfg(test)]
pub(crate) mod fixture {
    /// Builds a minimal but structurally complete `sfbk` container:
    /// INFO with a name, an sdta sample pool, and a pdta with all seven
    /// record tables including terminal sentinels.
    pub struct Sf2Builder {
        name: String,
        samples: Vec<i16>,
        // (start, end, loop_start, loop_end, rate, root_key)
        sample_headers: Vec<(u32, u32, u32, u32, u32, u8)>,
        // per instrument: zone list, each zone a (oper, amount) list
        instruments: Vec<Vec<Vec<(u16, u16)>>>,
        // (bank, program, zones)
        presets: Vec<(u16, u16, Vec<Vec<(u16, u16)>>)>,
    }

    impl Sf2Builder {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                samples: Vec::new(),
                sample_headers: Vec::new(),
                instruments: Vec::new(),
                presets: Vec::new(),
            }
        }

        pub fn add_samples(&mut self, data: &[i16]) {
            self.samples.extend_from_slice(data);
        }

        /// Returns the sample index for use in a sampleID (53) generator.
        pub fn add_sample_header(
            &mut self,
            start: u32,
            end: u32,
            loop_start: u32,
            loop_end: u32,
            rate: u32,
            root_key: u8,
        ) -> u16 {
            self.sample_headers
                .push((start, end, loop_start, loop_end, rate, root_key));
            (self.sample_headers.len() - 1) as u16
        }

        /// Returns the instrument index for use in an instrument (41)
        /// generator. Zones are given in order; a first zone without a
        /// sampleID generator acts as the global zone.
        pub fn add_instrument(&mut self, zones: Vec<Vec<(u16, u16)>>) -> u16 {
            self.instruments.push(zones);
            (self.instruments.len() - 1) as u16
        }

        pub fn add_preset(&mut self, bank: u16, program: u16, zones: Vec<Vec<(u16, u16)>>) {
            self.presets.push((bank, program, zones));
        }

        pub fn build(&self) -> Vec<u8> {
            let mut pbag = Vec::new();
            let mut pgen = Vec::new();
            let mut phdr = Vec::new();
            for (i, (bank, program, zones)) in self.presets.iter().enumerate() {
                phdr.extend(phdr_record(
                    &format!("Preset{}", i),
                    *program,
                    *bank,
                    pbag.len() as u16 / 4,
                ));
                push_zones(&mut pbag, &mut pgen, zones);
            }
            phdr.extend(phdr_record("EOP", 0, 0, pbag.len() as u16 / 4));
            pbag.extend(bag_record(pgen.len() as u16 / 4));

            let mut ibag = Vec::new();
            let mut igen = Vec::new();
            let mut inst = Vec::new();
            for (i, zones) in self.instruments.iter().enumerate() {
                inst.extend(inst_record(&format!("Inst{}", i), ibag.len() as u16 / 4));
                push_zones(&mut ibag, &mut igen, zones);
            }
            inst.extend(inst_record("EOI", ibag.len() as u16 / 4));
            ibag.extend(bag_record(igen.len() as u16 / 4));

            let mut shdr = Vec::new();
            for (start, end, ls, le, rate, root) in &self.sample_headers {
                shdr.extend(shdr_record("S", *start, *end, *ls, *le, *rate, *root));
            }
            shdr.extend(shdr_record("EOS", 0, 0, 0, 0, 0, 0));

            let mut inam = self.name.as_bytes().to_vec();
            inam.push(0);
            let info = list(b"INFO", &chunk(b"INAM", &inam));

            let mut smpl = Vec::new();
            for s in &self.samples {
                smpl.extend_from_slice(&s.to_le_bytes());
            }
            let sdta = list(b"sdta", &chunk(b"smpl", &smpl));

            let mut pdta_body = Vec::new();
            pdta_body.extend(chunk(b"phdr", &phdr));
            pdta_body.extend(chunk(b"pbag", &pbag));
            pdta_body.extend(chunk(b"pmod", &[0u8; 10])); // skipped by the decoder
            pdta_body.extend(chunk(b"pgen", &pgen));
            pdta_body.extend(chunk(b"inst", &inst));
            pdta_body.extend(chunk(b"ibag", &ibag));
            pdta_body.extend(chunk(b"imod", &[0u8; 10]));
            pdta_body.extend(chunk(b"igen", &igen));
            pdta_body.extend(chunk(b"shdr", &shdr));
            let pdta = list(b"pdta", &pdta_body);

            let mut body = Vec::new();
            body.extend_from_slice(b"sfbk");
            body.extend(info);
            body.extend(sdta);
            body.extend(pdta);

            let mut out = Vec::new();
            out.extend_from_slice(b"RIFF");
            out.extend_from_slice(&(body.len() as u32).to_le_bytes());
            out.extend(body);
            out
        }
    }

    fn push_zones(bags: &mut Vec<u8>, gens: &mut Vec<u8>, zones: &[Vec<(u16, u16)>]) {
        for zone in zones {
            bags.extend(bag_record(gens.len() as u16 / 4));
            for (oper, amount) in zone {
                gens.extend_from_slice(&oper.to_le_bytes());
                gens.extend_from_slice(&amount.to_le_bytes());
            }
        }
    }

    fn chunk(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + body.len() + 1);
        out.extend_from_slice(tag);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn list(subtype: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut inner = Vec::with_capacity(4 + body.len());
        inner.extend_from_slice(subtype);
        inner.extend_from_slice(body);
        chunk(b"LIST", &inner)
    }

    fn fixed_name(name: &str) -> [u8; 20] {
        let mut out = [0u8; 20];
        let bytes = name.as_bytes();
        out[..bytes.len().min(19)].copy_from_slice(&bytes[..bytes.len().min(19)]);
        out
    }

    fn phdr_record(name: &str, program: u16, bank: u16, bag_index: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(38);
        out.extend_from_slice(&fixed_name(name));
        out.extend_from_slice(&program.to_le_bytes());
        out.extend_from_slice(&bank.to_le_bytes());
        out.extend_from_slice(&bag_index.to_le_bytes());
        out.extend_from_slice(&[0u8; 12]);
        out
    }

    fn bag_record(gen_index: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(4);
        out.extend_from_slice(&gen_index.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    fn inst_record(name: &str, bag_index: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(22);
        out.extend_from_slice(&fixed_name(name));
        out.extend_from_slice(&bag_index.to_le_bytes());
        out
    }

    fn shdr_record(
        name: &str,
        start: u32,
        end: u32,
        loop_start: u32,
        loop_end: u32,
        rate: u32,
        root: u8,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(46);
        out.extend_from_slice(&fixed_name(name));
        out.extend_from_slice(&start.to_le_bytes());
        out.extend_from_slice(&end.to_le_bytes());
        out.extend_from_slice(&loop_start.to_le_bytes());
        out.extend_from_slice(&loop_end.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.push(root);
        out.push(0); // pitch correction
        out.extend_from_slice(&0u16.to_le_bytes()); // sample link
        out.extend_from_slice(&1u16.to_le_bytes()); // mono sample type
        out
    }
}
