//! SoundFont 2 container parsing.
//!
//! Walks the RIFF `sfbk` container and extracts the raw material the
//! region builder works from: the bank's display name (INFO/INAM), the
//! interleaved 16-bit sample pool (sdta/smpl), and the six parallel
//! fixed-stride record tables under pdta. No zone merging happens here;
//! see [`super::region`] for that.

use crate::error::DecodeError;
use crate::reader::ByteReader;

/// Record strides mandated by the SF2 spec.
const PHDR_STRIDE: usize = 38;
const BAG_STRIDE: usize = 4;
const GEN_STRIDE: usize = 4;
const INST_STRIDE: usize = 22;
const SHDR_STRIDE: usize = 46;

/// A `phdr` record: one preset header.
#[derive(Debug)]
pub(crate) struct PresetHeader {
    pub name: String,
    pub program: u16,
    pub bank: u16,
    pub bag_index: u16,
}

/// A `pbag`/`ibag` record: the index of a zone's first generator.
#[derive(Debug)]
pub(crate) struct ZoneIndex {
    pub gen_index: u16,
}

/// A `pgen`/`igen` record: one generator assignment, amount uninterpreted.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GenRecord {
    pub oper: u16,
    pub amount: u16,
}

/// An `inst` record: one instrument header.
#[derive(Debug)]
pub(crate) struct InstrumentHeader {
    pub bag_index: u16,
}

/// An `shdr` record: one sample header.
#[derive(Debug)]
pub(crate) struct SampleHeader {
    pub start: u32,
    pub end: u32,
    pub loop_start: u32,
    pub loop_end: u32,
    pub sample_rate: u32,
    pub original_pitch: u8,
    pub correction: i8,
}

/// Everything pulled out of the container, terminal records included.
#[derive(Debug)]
pub(crate) struct RawSoundFont {
    pub name: String,
    pub samples: Vec<i16>,
    pub phdr: Vec<PresetHeader>,
    pub pbag: Vec<ZoneIndex>,
    pub pgen: Vec<GenRecord>,
    pub inst: Vec<InstrumentHeader>,
    pub ibag: Vec<ZoneIndex>,
    pub igen: Vec<GenRecord>,
    pub shdr: Vec<SampleHeader>,
}

pub(crate) fn parse(bytes: &[u8]) -> Result<RawSoundFont, DecodeError> {
    let mut r = ByteReader::new(bytes);
    if r.take(4)? != b"RIFF" {
        return Err(DecodeError::InvalidHeader("missing RIFF tag"));
    }
    let _riff_size = r.read_u32_le()?;
    if r.take(4)? != b"sfbk" {
        return Err(DecodeError::UnsupportedFormat("RIFF form is not sfbk"));
    }

    let mut raw = RawSoundFont {
        name: String::new(),
        samples: Vec::new(),
        phdr: Vec::new(),
        pbag: Vec::new(),
        pgen: Vec::new(),
        inst: Vec::new(),
        ibag: Vec::new(),
        igen: Vec::new(),
        shdr: Vec::new(),
    };

    // Top-level chunks. Everything interesting is inside LIST chunks,
    // dispatched by their sub-type tag.
    while r.remaining() >= 8 {
        let tag = r.take(4)?;
        let size = r.read_u32_le()? as usize;
        let body = r.take(size.min(r.remaining()))?;
        if size % 2 == 1 && r.remaining() > 0 {
            r.skip(1)?; // RIFF pads chunks to even length
        }
        if tag != b"LIST" || body.len() < 4 {
            continue;
        }
        let subtype = &body[..4];
        let content = &body[4..];
        match subtype {
            b"INFO" => parse_info(content, &mut raw)?,
            b"sdta" => parse_sdta(content, &mut raw)?,
            b"pdta" => parse_pdta(content, &mut raw)?,
            _ => {}
        }
    }

    if raw.samples.is_empty() {
        return Err(DecodeError::EmptyOrCorruptSoundFont("no sample data"));
    }
    // Each table carries a terminal sentinel record, so fewer than two
    // entries means zero real records.
    if raw.phdr.len() < 2 || raw.inst.len() < 2 || raw.shdr.len() < 2 {
        return Err(DecodeError::EmptyOrCorruptSoundFont(
            "preset/instrument/sample tables missing or empty",
        ));
    }
    if raw.pbag.is_empty() || raw.ibag.is_empty() {
        return Err(DecodeError::EmptyOrCorruptSoundFont("zone tables missing"));
    }
    Ok(raw)
}

/// Iterates the sub-chunks of a LIST body, calling `f(tag, data)` for each.
fn walk_subchunks<'a>(
    content: &'a [u8],
    mut f: impl FnMut(&'a [u8], &'a [u8]) -> Result<(), DecodeError>,
) -> Result<(), DecodeError> {
    let mut r = ByteReader::new(content);
    while r.remaining() >= 8 {
        let tag = r.take(4)?;
        let size = r.read_u32_le()? as usize;
        if size > r.remaining() {
            return Err(DecodeError::TruncatedStream {
                offset: r.position(),
            });
        }
        let data = r.take(size)?;
        if size % 2 == 1 && r.remaining() > 0 {
            r.skip(1)?;
        }
        f(tag, data)?;
    }
    Ok(())
}

fn parse_info(content: &[u8], raw: &mut RawSoundFont) -> Result<(), DecodeError> {
    walk_subchunks(content, |tag, data| {
        if tag == b"INAM" {
            let mut r = ByteReader::new(data);
            raw.name = r.read_fixed_string(data.len())?;
        }
        Ok(())
    })
}

fn parse_sdta(content: &[u8], raw: &mut RawSoundFont) -> Result<(), DecodeError> {
    walk_subchunks(content, |tag, data| {
        if tag == b"smpl" {
            raw.samples = data
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();
        }
        Ok(())
    })
}

fn parse_pdta(content: &[u8], raw: &mut RawSoundFont) -> Result<(), DecodeError> {
    walk_subchunks(content, |tag, data| {
        match tag {
            b"phdr" => raw.phdr = parse_records(data, PHDR_STRIDE, parse_phdr)?,
            b"pbag" => raw.pbag = parse_records(data, BAG_STRIDE, parse_bag)?,
            b"pgen" => raw.pgen = parse_records(data, GEN_STRIDE, parse_gen)?,
            b"inst" => raw.inst = parse_records(data, INST_STRIDE, parse_inst)?,
            b"ibag" => raw.ibag = parse_records(data, BAG_STRIDE, parse_bag)?,
            b"igen" => raw.igen = parse_records(data, GEN_STRIDE, parse_gen)?,
            b"shdr" => raw.shdr = parse_records(data, SHDR_STRIDE, parse_shdr)?,
            // pmod/imod (modulator tables) are intentionally skipped.
            _ => {}
        }
        Ok(())
    })
}

fn parse_records<T>(
    data: &[u8],
    stride: usize,
    parse_one: impl Fn(&mut ByteReader) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    let count = data.len() / stride;
    let mut out = Vec::with_capacity(count);
    let mut r = ByteReader::new(&data[..count * stride]);
    for _ in 0..count {
        out.push(parse_one(&mut r)?);
    }
    Ok(out)
}

fn parse_phdr(r: &mut ByteReader) -> Result<PresetHeader, DecodeError> {
    let name = r.read_fixed_string(20)?;
    let program = r.read_u16_le()?;
    let bank = r.read_u16_le()?;
    let bag_index = r.read_u16_le()?;
    r.skip(12)?; // library, genre, morphology
    Ok(PresetHeader {
        name,
        program,
        bank,
        bag_index,
    })
}

fn parse_bag(r: &mut ByteReader) -> Result<ZoneIndex, DecodeError> {
    let gen_index = r.read_u16_le()?;
    r.skip(2)?; // modulator index
    Ok(ZoneIndex { gen_index })
}

fn parse_gen(r: &mut ByteReader) -> Result<GenRecord, DecodeError> {
    Ok(GenRecord {
        oper: r.read_u16_le()?,
        amount: r.read_u16_le()?,
    })
}

fn parse_inst(r: &mut ByteReader) -> Result<InstrumentHeader, DecodeError> {
    r.read_fixed_string(20)?;
    let bag_index = r.read_u16_le()?;
    Ok(InstrumentHeader { bag_index })
}

fn parse_shdr(r: &mut ByteReader) -> Result<SampleHeader, DecodeError> {
    r.read_fixed_string(20)?;
    let start = r.read_u32_le()?;
    let end = r.read_u32_le()?;
    let loop_start = r.read_u32_le()?;
    let loop_end = r.read_u32_le()?;
    let sample_rate = r.read_u32_le()?;
    let original_pitch = r.read_u8()?;
    let correction = r.read_u8()? as i8;
    r.skip(4)?; // sample link, sample type
    Ok(SampleHeader {
        start,
        end,
        loop_start,
        loop_end,
        sample_rate,
        original_pitch,
        correction,
    })
}
