//! Standard MIDI File parsing.
//!
//! Produces a flat, time-sorted raw event stream. Only the events the
//! timeline builder consumes survive decoding: note on/off, program
//! change, control change, and tempo metas. Everything else (other
//! channel voice messages, other metas, sysex) is skipped using its
//! declared length so the stream stays in sync.

use crate::error::DecodeError;
use crate::reader::ByteReader;

/// One decoded event at an absolute tick position.
///
/// Same-tick ties are broken by emission order: track order first, then
/// in-track order, preserved by the stable sort in [`decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub tick: u64,
    pub kind: RawEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    Tempo { us_per_beat: u32 },
    ProgramChange { channel: u8, program: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8 },
}

/// Decodes an SMF buffer into (events sorted by tick, ticks per beat).
///
/// # Errors
///
/// - [`DecodeError::InvalidHeader`] if the `MThd` chunk is malformed
/// - [`DecodeError::UnsupportedFormat`] for SMPTE division or format 2
/// - [`DecodeError::NoTracks`] if the header declares zero tracks
/// - [`DecodeError::NoUsableTrack`] if no track yields any event
/// - [`DecodeError::MissingStatusByte`] on a data byte with no running status
/// - [`DecodeError::TruncatedStream`] if any read runs off the buffer
pub fn decode(bytes: &[u8]) -> Result<(Vec<RawEvent>, u16), DecodeError> {
    let mut r = ByteReader::new(bytes);
    if r.take(4)? != b"MThd" {
        return Err(DecodeError::InvalidHeader("missing MThd tag"));
    }
    let header_len = r.read_u32()? as usize;
    if header_len < 6 {
        return Err(DecodeError::InvalidHeader("MThd shorter than 6 bytes"));
    }
    let format = r.read_u16()?;
    let track_count = r.read_u16()?;
    let division = r.read_u16()?;
    r.skip(header_len - 6)?;

    if format > 1 {
        return Err(DecodeError::UnsupportedFormat(
            "format 2 (sequential) files",
        ));
    }
    if track_count == 0 {
        return Err(DecodeError::NoTracks);
    }
    if division & 0x8000 != 0 {
        return Err(DecodeError::UnsupportedFormat("SMPTE timecode division"));
    }
    if division == 0 {
        return Err(DecodeError::InvalidHeader("zero ticks per beat"));
    }

    let mut events = Vec::new();
    let mut tracks_parsed = 0u16;
    while tracks_parsed < track_count && r.remaining() >= 8 {
        let tag = r.take(4)?;
        let length = r.read_u32()? as usize;
        let body = r.take(length)?;
        if tag != b"MTrk" {
            continue; // alien chunk, skipped by its declared length
        }
        tracks_parsed += 1;
        decode_track(body, &mut events)?;
    }
    if events.is_empty() {
        return Err(DecodeError::NoUsableTrack);
    }

    // Stable: same-tick events keep concatenation (emission) order.
    events.sort_by_key(|e| e.tick);
    Ok((events, division))
}

fn decode_track(body: &[u8], events: &mut Vec<RawEvent>) -> Result<(), DecodeError> {
    let mut r = ByteReader::new(body);
    let mut tick: u64 = 0;
    let mut running_status: Option<u8> = None;

    while r.remaining() > 0 {
        tick += r.read_var_length()? as u64;
        let first = r.read_u8()?;

        let (status, data0) = if first & 0x80 != 0 {
            (first, None)
        } else {
            // Running status: reuse the previous channel status byte.
            let status = running_status.ok_or(DecodeError::MissingStatusByte {
                offset: r.position() - 1,
            })?;
            (status, Some(first))
        };

        match status {
            0xFF => {
                let meta_type = r.read_u8()?;
                let length = r.read_var_length()? as usize;
                match meta_type {
                    0x2F => return Ok(()), // end of track
                    0x51 if length == 3 => {
                        let b = r.take(3)?;
                        let us_per_beat =
                            u32::from(b[0]) << 16 | u32::from(b[1]) << 8 | u32::from(b[2]);
                        events.push(RawEvent {
                            tick,
                            kind: RawEventKind::Tempo { us_per_beat },
                        });
                    }
                    _ => r.skip(length)?,
                }
            }
            0xF0 | 0xF7 => {
                let length = r.read_var_length()? as usize;
                r.skip(length)?;
            }
            _ => {
                running_status = Some(status);
                let channel = status & 0x0F;
                let d0 = match data0 {
                    Some(b) => b,
                    None => r.read_u8()?,
                };
                match status & 0xF0 {
                    0x80 => {
                        r.read_u8()?; // release velocity, unused
                        events.push(RawEvent {
                            tick,
                            kind: RawEventKind::NoteOff { channel, key: d0 },
                        });
                    }
                    0x90 => {
                        let velocity = r.read_u8()?;
                        let kind = if velocity == 0 {
                            // NoteOn with velocity 0 is a NoteOff by convention.
                            RawEventKind::NoteOff { channel, key: d0 }
                        } else {
                            RawEventKind::NoteOn {
                                channel,
                                key: d0,
                                velocity,
                            }
                        };
                        events.push(RawEvent { tick, kind });
                    }
                    0xB0 => {
                        let value = r.read_u8()?;
                        events.push(RawEvent {
                            tick,
                            kind: RawEventKind::ControlChange {
                                channel,
                                controller: d0,
                                value,
                            },
                        });
                    }
                    0xC0 => events.push(RawEvent {
                        tick,
                        kind: RawEventKind::ProgramChange {
                            channel,
                            program: d0,
                        },
                    }),
                    0xA0 | 0xE0 => {
                        r.read_u8()?; // two-byte message, not decoded
                    }
                    0xD0 => {} // channel pressure: one data byte, already consumed
                    _ => {
                        return Err(DecodeError::UnsupportedFormat(
                            "system common status inside track",
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}
