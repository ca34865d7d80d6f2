//! fermata - MIDI file player and renderer.
//!
//! Plays a Standard MIDI File through one of the synthetic engines or a
//! SoundFont bank, or renders it offline to a WAV file.
//!
//! # Usage
//!
//! ```bash
//! fermata song.mid                        # play with the analog engine
//! fermata song.mid --soundfont bank.sf2   # play through a SoundFont
//! fermata song.mid --export out.wav       # render offline to WAV
//! ```

use fermata::audio::{export_session_to_wav, AudioEngine, Mixer, SAMPLE_RATE};
use fermata::player::{Session, SessionEvent, POLL_INTERVAL_MS};
use fermata::synth::EngineMode;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Command-line options for the player.
struct CliOptions {
    /// MIDI file to play.
    midi: PathBuf,
    /// Optional SoundFont; selecting one switches to the sample engine.
    soundfont: Option<PathBuf>,
    /// Synthetic engine when no SoundFont is given.
    engine: EngineMode,
    /// Render offline to this WAV path instead of playing live.
    export: Option<PathBuf>,
    speed: f64,
    transpose: i32,
    detune_cents: f32,
    articulation: Option<f32>,
    /// Start position in seconds.
    offset: Option<f64>,
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `<file.mid>`: the MIDI file to play (required)
    /// - `--soundfont <path>` or `-sf <path>`: play through a SoundFont
    /// - `--engine analog|chip|organ`: pick a synthetic engine
    /// - `--export <path>` or `-e <path>`: render to WAV instead of playing
    /// - `--speed <ratio>`, `--transpose <semitones>`, `--detune <cents>`,
    ///   `--articulation <0..1>`, `--offset <seconds>`
    /// - `--help` or `-h`: print help and exit
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut midi: Option<PathBuf> = None;
        let mut soundfont: Option<PathBuf> = None;
        let mut engine = EngineMode::Analog;
        let mut export: Option<PathBuf> = None;
        let mut speed = 1.0f64;
        let mut transpose = 0i32;
        let mut detune_cents = 0.0f32;
        let mut articulation: Option<f32> = None;
        let mut offset: Option<f64> = None;
        let mut i = 1;

        fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str> {
            *i += 1;
            args.get(*i)
                .map(|s| s.as_str())
                .with_context(|| format!("{} requires a value", flag))
        }

        while i < args.len() {
            match args[i].as_str() {
                "--soundfont" | "-sf" => {
                    soundfont = Some(PathBuf::from(value(&args, &mut i, "--soundfont")?));
                }
                "--engine" => {
                    engine = match value(&args, &mut i, "--engine")? {
                        "analog" => EngineMode::Analog,
                        "chip" => EngineMode::Chip,
                        "organ" => EngineMode::Organ,
                        other => anyhow::bail!("unknown engine: {}", other),
                    };
                }
                "--export" | "-e" => {
                    export = Some(PathBuf::from(value(&args, &mut i, "--export")?));
                }
                "--speed" => {
                    speed = value(&args, &mut i, "--speed")?
                        .parse()
                        .context("--speed expects a number")?;
                }
                "--transpose" => {
                    transpose = value(&args, &mut i, "--transpose")?
                        .parse()
                        .context("--transpose expects an integer")?;
                }
                "--detune" => {
                    detune_cents = value(&args, &mut i, "--detune")?
                        .parse()
                        .context("--detune expects a number")?;
                }
                "--articulation" => {
                    articulation = Some(
                        value(&args, &mut i, "--articulation")?
                            .parse()
                            .context("--articulation expects a number in 0..1")?,
                    );
                }
                "--offset" => {
                    offset = Some(
                        value(&args, &mut i, "--offset")?
                            .parse()
                            .context("--offset expects seconds")?,
                    );
                }
                "--help" | "-h" => {
                    eprintln!("fermata - MIDI file player and renderer");
                    eprintln!();
                    eprintln!(
                        "Usage: {} <file.mid> [OPTIONS]",
                        args.first().map(String::as_str).unwrap_or("fermata")
                    );
                    eprintln!();
                    eprintln!("Options:");
                    eprintln!("  -sf, --soundfont PATH   Play through a SoundFont (.sf2)");
                    eprintln!("  --engine MODE           analog | chip | organ (default analog)");
                    eprintln!("  -e, --export PATH       Render offline to a WAV file");
                    eprintln!("  --speed RATIO           Playback speed (default 1.0)");
                    eprintln!("  --transpose SEMITONES   Transpose up or down");
                    eprintln!("  --detune CENTS          Fine detune");
                    eprintln!("  --articulation 0..1     Percussive (0) to sustained (1)");
                    eprintln!("  --offset SECONDS        Start position");
                    eprintln!("  -h, --help              Print this help message");
                    std::process::exit(0);
                }
                other => {
                    if other.ends_with(".mid") || other.ends_with(".midi") {
                        midi = Some(PathBuf::from(other));
                    } else {
                        eprintln!("Unknown option: {}", other);
                        eprintln!("Use --help for usage information");
                        std::process::exit(1);
                    }
                }
            }
            i += 1;
        }

        let midi = midi.context("no MIDI file given; use --help for usage")?;
        Ok(Self {
            midi,
            soundfont,
            engine,
            export,
            speed,
            transpose,
            detune_cents,
            articulation,
            offset,
        })
    }
}

fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let midi_bytes = std::fs::read(&cli.midi)
        .with_context(|| format!("Failed to read MIDI file: {}", cli.midi.display()))?;
    let timeline = fermata::decode_midi(&midi_bytes)
        .with_context(|| format!("Failed to decode MIDI file: {}", cli.midi.display()))?;
    tracing::info!(
        notes = timeline.notes.len(),
        duration = timeline.duration,
        "timeline loaded"
    );

    let bank = match &cli.soundfont {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read SoundFont: {}", path.display()))?;
            let bank = fermata::decode_sound_font(&bytes)
                .with_context(|| format!("Failed to decode SoundFont: {}", path.display()))?;
            Some(Arc::new(bank))
        }
        None => None,
    };

    if let Some(output) = &cli.export {
        let mixer = Arc::new(Mutex::new(Mixer::new(SAMPLE_RATE)));
        let mut session = configure_session(&cli, timeline, Arc::clone(&mixer), bank);
        export_session_to_wav(&mut session, &mixer, output)?;
        println!("Rendered to {}", output.display());
        return Ok(());
    }

    let engine = AudioEngine::new()?;
    let mut session = configure_session(&cli, timeline, engine.mixer(), bank);
    session
        .play(cli.offset)
        .context("Failed to start playback")?;

    loop {
        if let Some(SessionEvent::Completed) = session.poll()? {
            break;
        }
        std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
    }
    Ok(())
}

fn configure_session(
    cli: &CliOptions,
    timeline: fermata::Timeline,
    mixer: Arc<Mutex<Mixer>>,
    bank: Option<Arc<fermata::SoundFontBank>>,
) -> Session {
    let mut session = Session::new(timeline, mixer);
    if bank.is_some() {
        session.set_engine_mode(EngineMode::SoundFont);
        session.set_sound_font(bank);
    } else {
        session.set_engine_mode(cli.engine);
    }
    session.set_speed(cli.speed);
    session.set_transpose(cli.transpose);
    session.set_fine_detune(cli.detune_cents);
    if let Some(a) = cli.articulation {
        session.set_articulation(a);
    }
    if cli.export.is_some() {
        if let Some(offset) = cli.offset {
            session.seek(offset);
        }
    }
    session
}
