//! Offline WAV export.
//!
//! Renders a session to a 16-bit stereo WAV file by alternating
//! scheduler polls with mixer render blocks, no audio device involved.

use crate::audio::Mixer;
use crate::player::{Session, SessionEvent};
use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Buffer size for rendering chunks. Must stay well under the
/// scheduler's lookahead horizon so polls keep up.
const RENDER_BUFFER_SIZE: usize = 1024;

/// Renders the session from its current position to completion into a
/// WAV file.
///
/// The session must share `mixer`; playback is started at the
/// session's resume position if it is not already playing.
///
/// # Errors
///
/// Returns an error if the output file cannot be created, a scheduled
/// note cannot be resolved, or writing fails.
pub fn export_session_to_wav<P: AsRef<Path>>(
    session: &mut Session,
    mixer: &Arc<Mutex<Mixer>>,
    output_path: P,
) -> Result<()> {
    let sample_rate = mixer.lock().unwrap_or_else(|e| e.into_inner()).sample_rate();
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(output_path.as_ref(), spec).with_context(|| {
        format!(
            "Failed to create output WAV file: {}",
            output_path.as_ref().display()
        )
    })?;

    if session.state() != crate::player::TransportState::Playing {
        session.play(None).context("Failed to start playback")?;
    }

    let mut left = vec![0.0f32; RENDER_BUFFER_SIZE];
    let mut right = vec![0.0f32; RENDER_BUFFER_SIZE];
    loop {
        let event = session.poll().context("Scheduling failed during export")?;
        if event == Some(SessionEvent::Completed) {
            break;
        }
        mixer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .render(&mut left, &mut right);
        for i in 0..RENDER_BUFFER_SIZE {
            writer.write_sample((left[i].clamp(-1.0, 1.0) * 32767.0) as i16)?;
            writer.write_sample((right[i].clamp(-1.0, 1.0) * 32767.0) as i16)?;
        }
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    tracing::info!(path = %output_path.as_ref().display(), "export complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::testutil::SmfBuilder;
    use crate::midi::{decode, Timeline};
    use crate::synth::EngineMode;

    #[test]
    fn test_export_writes_playable_wav() {
        let mut b = SmfBuilder::new(480);
        let t = b.track();
        b.note_on(t, 0, 0, 60, 100);
        b.note_off(t, 240, 0, 60);
        let (events, division) = decode(&b.build()).unwrap();
        let timeline = Timeline::build(&events, division);

        let mixer = Arc::new(Mutex::new(Mixer::new(8000)));
        let mut session = Session::new(timeline, Arc::clone(&mixer));
        session.set_engine_mode(EngineMode::Chip);

        let path = std::env::temp_dir().join("fermata_export_test.wav");
        export_session_to_wav(&mut session, &mixer, &path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8000);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert!(!samples.is_empty());
        assert!(samples.iter().any(|&s| s != 0));
        std::fs::remove_file(&path).ok();
    }
}
