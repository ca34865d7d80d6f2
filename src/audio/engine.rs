//! Real-time audio output.
//!
//! Wraps the shared [`Mixer`] in a rodio `Source` that renders fixed
//! blocks and interleaves them for the output stream. The mixer lives
//! behind an `Arc<Mutex<..>>` shared between the audio thread and the
//! session driving the scheduler.

use crate::audio::Mixer;
use anyhow::{Context, Result};
use rodio::{OutputStream, OutputStreamHandle, Source};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sample rate for audio synthesis (44.1 kHz standard).
pub const SAMPLE_RATE: u32 = 44100;

/// Audio buffer size for low-latency playback.
/// Smaller = lower latency but higher CPU usage.
const BUFFER_SIZE: usize = 256;

/// Audio source pulling rendered blocks from the mixer.
/// Implements rodio's Source trait for playback.
struct MixerSource {
    mixer: Arc<Mutex<Mixer>>,
    left_buf: Vec<f32>,
    right_buf: Vec<f32>,
    buf_pos: usize,
    /// Current channel (0 = left, 1 = right).
    channel: usize,
}

impl MixerSource {
    fn new(mixer: Arc<Mutex<Mixer>>) -> Self {
        Self {
            mixer,
            left_buf: vec![0.0; BUFFER_SIZE],
            right_buf: vec![0.0; BUFFER_SIZE],
            buf_pos: BUFFER_SIZE, // start at end to trigger first render
            channel: 0,
        }
    }
}

impl Iterator for MixerSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.buf_pos >= BUFFER_SIZE {
            if let Ok(mut mixer) = self.mixer.lock() {
                mixer.render(&mut self.left_buf, &mut self.right_buf);
            } else {
                self.left_buf.fill(0.0);
                self.right_buf.fill(0.0);
            }
            self.buf_pos = 0;
        }

        // Interleave stereo samples: L, R, L, R, ...
        let sample = if self.channel == 0 {
            self.left_buf[self.buf_pos]
        } else {
            self.right_buf[self.buf_pos]
        };
        self.channel = 1 - self.channel;
        if self.channel == 0 {
            self.buf_pos += 1;
        }
        Some(sample)
    }
}

impl Source for MixerSource {
    fn current_frame_len(&self) -> Option<usize> {
        None // continuous stream
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Owns the output stream and the mixer shared with it.
pub struct AudioEngine {
    mixer: Arc<Mutex<Mixer>>,
    /// Audio output stream (must be kept alive).
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
}

impl AudioEngine {
    /// Opens the default audio output and starts pulling from a fresh
    /// mixer.
    ///
    /// # Errors
    ///
    /// Returns an error if no audio output device can be opened or the
    /// stream fails to start.
    pub fn new() -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::new(SAMPLE_RATE)));
        let (stream, stream_handle) =
            OutputStream::try_default().context("Failed to open audio output")?;
        stream_handle
            .play_raw(MixerSource::new(Arc::clone(&mixer)))
            .context("Failed to start audio playback")?;
        tracing::info!(sample_rate = SAMPLE_RATE, "audio engine started");
        Ok(Self {
            mixer,
            _stream: stream,
            _stream_handle: stream_handle,
        })
    }

    /// The mixer shared with the audio thread.
    pub fn mixer(&self) -> Arc<Mutex<Mixer>> {
        Arc::clone(&self.mixer)
    }
}
