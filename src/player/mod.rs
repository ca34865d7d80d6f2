//! Playback sessions: lookahead scheduling and transport.

mod session;

pub use session::{Session, SessionEvent, TransportState, LOOKAHEAD_SECS, POLL_INTERVAL_MS};
