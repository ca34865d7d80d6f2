//! Typed errors for asset decoding and engine operation.
//!
//! Decode failures are non-recoverable for that load attempt: the caller
//! discards the failed load and may retry with a different asset. A prior
//! playback session is never affected by a failed load.

use thiserror::Error;

/// Errors produced while decoding a MIDI file or SoundFont bank.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer does not start with the expected container header.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The container is recognized but uses a variant this engine
    /// does not decode (e.g. SMPTE timing, a non-sfbk RIFF form).
    #[error("unsupported format: {0}")]
    UnsupportedFormat(&'static str),

    /// A read ran past the end of the buffer, or a variable-length
    /// quantity never terminated before end-of-buffer.
    #[error("truncated stream at byte {offset}")]
    TruncatedStream { offset: usize },

    /// The MIDI header declares zero tracks.
    #[error("MIDI file declares no tracks")]
    NoTracks,

    /// Every declared track decoded to an empty event list.
    #[error("no track produced any usable events")]
    NoUsableTrack,

    /// A data byte arrived with no running status to interpret it.
    #[error("data byte with no status byte (track offset {offset})")]
    MissingStatusByte { offset: usize },

    /// Decoding succeeded but the timeline contains no sounding notes.
    #[error("decoded timeline contains no notes")]
    EmptyTimeline,

    /// The SoundFont parsed but is missing the tables or sample data
    /// needed to produce any playable region.
    #[error("sound font is empty or corrupt: {0}")]
    EmptyOrCorruptSoundFont(&'static str),
}

/// Errors produced by the playback engine itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A capability the current engine mode requires is missing,
    /// e.g. the sample-based engine was selected with no bank loaded.
    /// There is no silent fallback; the caller must opt in to another mode.
    #[error("engine not ready: {0}")]
    EngineNotReady(&'static str),

    /// `play` was called while the session was already playing.
    #[error("session is already playing")]
    AlreadyPlaying,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = DecodeError::TruncatedStream { offset: 42 };
        assert_eq!(e.to_string(), "truncated stream at byte 42");

        let e = DecodeError::InvalidHeader("no MThd tag");
        assert!(e.to_string().contains("no MThd tag"));

        let e = EngineError::EngineNotReady("no sound font loaded");
        assert!(e.to_string().contains("no sound font loaded"));
    }
}
