//! Timeline construction: raw events + tempo map → absolute-time notes.
//!
//! Walks the tick-sorted event stream with one running clock in seconds.
//! Ticks elapsed between events are converted using the tempo in force
//! *before* any tempo change at the later event takes effect. Channel
//! controller state (program, volume, expression, pan, reverb, sustain)
//! is tracked per channel and snapshotted into each note at note-on.

use super::decode::{RawEvent, RawEventKind};
use super::DEFAULT_US_PER_BEAT;
use std::collections::HashMap;

/// Shortest duration a finalized note may have. Zero-length note pairs
/// exist in real files; they still need an audible transient.
pub const MIN_NOTE_SECS: f64 = 0.05;

/// Tail appended when finalizing notes still open at end of stream.
pub const END_OF_TRACK_TAIL_SECS: f64 = 0.5;

/// Sustain pedal threshold: CC64 values at or above this hold notes.
const SUSTAIN_ON: u8 = 64;

/// One performed note with all attributes resolved. Immutable after
/// timeline construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    /// MIDI note number (0-127).
    pub key: u8,
    /// Absolute start time in seconds.
    pub start: f64,
    /// Sounding duration in seconds (floor applied).
    pub duration: f64,
    /// Velocity 0..1, pre-scaled by channel volume × expression.
    pub velocity: f32,
    /// Velocity 0..1 as written, unscaled.
    pub raw_velocity: f32,
    pub channel: u8,
    /// Program active on the channel at note-on time.
    pub program: u8,
    /// Stereo position -1..1 at note-on time.
    pub pan: f32,
    /// Reverb send 0..1 at note-on time.
    pub reverb_send: f32,
    /// Channel volume snapshot (0..2, CC value 64 = 1.0).
    pub volume: f32,
    /// Channel expression snapshot (0..2).
    pub expression: f32,
}

impl Note {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// The finished performance: notes ascending by start time.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub notes: Vec<Note>,
    /// Time at which the last note (with its floor/tail) ends.
    pub duration: f64,
}

/// A note-on awaiting its note-off (or sustain release).
struct PendingNote {
    note: Note,
}

/// Per-channel performance state, mutated during construction only.
struct ChannelState {
    program: u8,
    volume: f32,
    expression: f32,
    pan: f32,
    reverb_send: f32,
    sustain: bool,
    /// Open note-ons per note number, oldest first.
    pending: HashMap<u8, Vec<PendingNote>>,
    /// Note tails deferred by the sustain pedal, awaiting release.
    sustained: Vec<PendingNote>,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            program: 0,
            volume: 1.0,
            expression: 1.0,
            pan: 0.0,
            reverb_send: 0.0,
            sustain: false,
            pending: HashMap::new(),
            sustained: Vec::new(),
        }
    }
}

impl Timeline {
    /// Builds a timeline from a tick-sorted event stream.
    pub fn build(events: &[RawEvent], ticks_per_beat: u16) -> Timeline {
        let mut channels: Vec<ChannelState> =
            (0..16).map(|_| ChannelState::default()).collect();
        let mut notes: Vec<Note> = Vec::new();

        let tpb = ticks_per_beat.max(1) as f64;
        let mut secs_per_tick = DEFAULT_US_PER_BEAT as f64 / tpb / 1e6;
        let mut last_tick: u64 = 0;
        let mut time: f64 = 0.0;

        for event in events {
            // Elapsed ticks convert under the tempo in force before this
            // event; a tempo change applies from here on.
            time += (event.tick - last_tick) as f64 * secs_per_tick;
            last_tick = event.tick;

            match event.kind {
                RawEventKind::Tempo { us_per_beat } => {
                    secs_per_tick = us_per_beat.max(1) as f64 / tpb / 1e6;
                }
                RawEventKind::ProgramChange { channel, program } => {
                    channels[channel as usize].program = program;
                }
                RawEventKind::ControlChange {
                    channel,
                    controller,
                    value,
                } => {
                    let state = &mut channels[channel as usize];
                    match controller {
                        7 => state.volume = value as f32 / 64.0,
                        11 => state.expression = value as f32 / 64.0,
                        10 => state.pan = ((value as f32 - 64.0) / 63.0).clamp(-1.0, 1.0),
                        91 => state.reverb_send = value as f32 / 127.0,
                        64 => {
                            if value >= SUSTAIN_ON {
                                state.sustain = true;
                            } else {
                                state.sustain = false;
                                // Pedal up: close every deferred tail now.
                                for pending in state.sustained.drain(..) {
                                    notes.push(finalize(pending, time));
                                }
                            }
                        }
                        _ => {}
                    }
                }
                RawEventKind::NoteOn {
                    channel,
                    key,
                    velocity,
                } => {
                    let state = &mut channels[channel as usize];
                    let raw = velocity as f32 / 127.0;
                    let scaled = (raw * state.volume * state.expression).clamp(0.0, 1.0);
                    let note = Note {
                        key,
                        start: time,
                        duration: 0.0,
                        velocity: scaled,
                        raw_velocity: raw,
                        channel,
                        program: state.program,
                        pan: state.pan,
                        reverb_send: state.reverb_send,
                        volume: state.volume,
                        expression: state.expression,
                    };
                    state
                        .pending
                        .entry(key)
                        .or_default()
                        .push(PendingNote { note });
                }
                RawEventKind::NoteOff { channel, key } => {
                    let state = &mut channels[channel as usize];
                    let Some(stack) = state.pending.get_mut(&key) else {
                        continue;
                    };
                    if stack.is_empty() {
                        continue; // unmatched note-off, ignored
                    }
                    let pending = stack.remove(0); // oldest first
                    if state.sustain {
                        // Pedal down: the tail waits for the release.
                        state.sustained.push(pending);
                    } else {
                        notes.push(finalize(pending, time));
                    }
                }
            }
        }

        // Anything still open gets a tail past the last event.
        let cutoff = time + END_OF_TRACK_TAIL_SECS;
        for state in &mut channels {
            for (_, stack) in state.pending.drain() {
                for pending in stack {
                    notes.push(finalize(pending, cutoff));
                }
            }
            for pending in state.sustained.drain(..) {
                notes.push(finalize(pending, cutoff));
            }
        }

        // Tie-break on (channel, key) so same-start notes order the same
        // on every rebuild of the same bytes.
        notes.sort_by(|a, b| {
            a.start
                .total_cmp(&b.start)
                .then(a.channel.cmp(&b.channel))
                .then(a.key.cmp(&b.key))
        });
        let duration = notes.iter().map(Note::end).fold(0.0, f64::max);
        Timeline { notes, duration }
    }
}

fn finalize(pending: PendingNote, off_time: f64) -> Note {
    let mut note = pending.note;
    note.duration = (off_time - note.start).max(MIN_NOTE_SECS);
    note
}
