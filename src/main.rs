//! Offline renderer for the MP2K sound engine.
//!
//! Plays a short built-in phrase through the mixer (a sampled lead, two
//! square channels, the wave channel and noise percussion) and writes the
//! result to a WAV file.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use mp2k_synth::{
    Adsr, CgbDef, EngineConfig, NoisePattern, Note, ResamplerKind, ReverbKind, SampleDescriptor,
    SoundMixer, TrackParams, WaveDuty, NOTE_TIE,
};

/// Driver frames per phrase step
const FRAMES_PER_STEP: u32 = 12;

const LEAD_TRACK: u8 = 0;
const BASS_TRACK: u8 = 1;
const WAVE_TRACK: u8 = 2;
const DRUM_TRACK: u8 = 3;

const LEAD: [u8; 16] = [72, 0, 76, 79, 76, 0, 74, 72, 71, 0, 74, 77, 74, 0, 71, 67];
const BASS: [u8; 4] = [48, 45, 41, 43];
const WAVE_TABLE: [u8; 16] = [
    0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0xFE, 0xDC, 0xBA, 0x98, 0x76, 0x54, 0x32, 0x10,
];

#[derive(Parser)]
#[command(name = "mp2k-render")]
#[command(about = "Render a demo phrase with the MP2K sound engine")]
struct Args {
    /// Output WAV file
    #[arg(short, long, default_value = "mp2k-demo.wav")]
    output: PathBuf,

    /// Engine configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of times the phrase is played
    #[arg(long, default_value_t = 2)]
    loops: u32,

    /// Override the output sample rate
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Override the resampler (nearest, linear, sinc, blep, blamp)
    #[arg(long)]
    resampler: Option<ResamplerKind>,

    /// Override the reverb (normal, gs1, gs2, mgat, test, none)
    #[arg(long)]
    reverb: Option<ReverbKind>,

    /// Override the reverb intensity (0-127)
    #[arg(long)]
    reverb_intensity: Option<u8>,

    /// Fade out over the last phrase
    #[arg(long)]
    fade: bool,

    /// Write 32-bit float samples instead of 16-bit integers
    #[arg(long)]
    float: bool,
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(rate) = args.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(kind) = args.resampler {
        config.resampler = kind;
    }
    if let Some(kind) = args.reverb {
        config.reverb_kind = kind;
    }
    if let Some(intensity) = args.reverb_intensity {
        config.reverb_intensity = intensity;
    }
    // One buffer per phrase part, summed when writing
    config.track_count = config.track_count.max(DRUM_TRACK + 1);
    Ok(config)
}

/// One period of a soft-clipped sine as signed 8-bit PCM
fn lead_sample() -> Vec<u8> {
    (0..64)
        .map(|i| {
            let phase = i as f32 / 64.0 * std::f32::consts::TAU;
            let value = (phase.sin() * 1.5).tanh() * 100.0;
            value as i8 as u8
        })
        .collect()
}

/// Issue the notes of one phrase step
fn trigger_step<'a>(mixer: &mut SoundMixer<'a>, step: usize, lead: SampleDescriptor<'a>) {
    let length = FRAMES_PER_STEP as i8;
    let track = TrackParams::default();

    let key = LEAD[step % LEAD.len()];
    if key != 0 {
        let lead_track = TrackParams { pan: -16, ..track };
        mixer.new_pcm_voice(
            LEAD_TRACK,
            lead,
            Adsr::new(0xFF, 0xE0, 0xA0, 0xC0),
            Note::new(key, 110, length - 2),
            lead_track,
            0,
            false,
        );
    }

    if step % 4 == 0 {
        let key = BASS[(step / 4) % BASS.len()];
        let duty = if step % 8 == 0 { WaveDuty::D25 } else { WaveDuty::D50 };
        mixer.new_cgb_voice(
            BASS_TRACK,
            CgbDef::Square1(duty),
            Adsr::new(0xFF, 0xF0, 0x80, 0xE0),
            Note::new(key, 100, length * 4 - 4),
            TrackParams { volume: 90, ..track },
        );
    }

    if step % 8 == 0 {
        mixer.new_cgb_voice(
            WAVE_TRACK,
            CgbDef::Wave(&WAVE_TABLE),
            Adsr::new(0x20, 0xFC, 0xC0, 0xF0),
            Note::new(BASS[(step / 4) % BASS.len()] + 12, 80, NOTE_TIE),
            TrackParams { volume: 70, pan: 32, ..track },
        );
    }

    let (pattern, velocity) = if step % 4 == 2 {
        (NoisePattern::Fine, 100)
    } else {
        (NoisePattern::Rough, 60)
    };
    mixer.new_cgb_voice(
        DRUM_TRACK,
        CgbDef::Noise(pattern),
        Adsr::new(0xFF, 0xC0, 0x00, 0x00),
        Note::new(60, velocity, 2),
        track,
    );
}

fn render(args: &Args) -> Result<()> {
    let config = load_config(args)?;
    let lead_data = lead_sample();
    let lead = SampleDescriptor::new(&lead_data, 261.63 * 64.0, true, 0, lead_data.len() as u32);

    let mut mixer = SoundMixer::new(config.clone()).context("Invalid engine configuration")?;
    let steps = LEAD.len() * args.loops.max(1) as usize;
    let total_frames = steps as u32 * FRAMES_PER_STEP;
    info!(
        sample_rate = config.sample_rate,
        resampler = %config.resampler,
        reverb = %config.reverb_kind,
        total_frames,
        "rendering"
    );

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: config.sample_rate,
        bits_per_sample: if args.float { 32 } else { 16 },
        sample_format: if args.float {
            hound::SampleFormat::Float
        } else {
            hound::SampleFormat::Int
        },
    };
    let mut writer = hound::WavWriter::create(&args.output, spec)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let mut mixdown = vec![0.0f32; mixer.samples_per_block() * 2];
    let fade_start = total_frames.saturating_sub(LEAD.len() as u32 * FRAMES_PER_STEP);
    for frame in 0..total_frames {
        if frame % FRAMES_PER_STEP == 0 {
            trigger_step(&mut mixer, (frame / FRAMES_PER_STEP) as usize, lead);
        }
        if args.fade && frame == fade_start && fade_start > 0 {
            let millis = (total_frames - fade_start) as f64 * 1000.0 / mp2k_synth::AGB_FPS;
            mixer.fade_out(millis as f32);
        }
        for track in [LEAD_TRACK, BASS_TRACK, WAVE_TRACK, DRUM_TRACK] {
            mixer.tick_track_notes(track)?;
        }

        mixdown.fill(0.0);
        for buffer in mixer.render_next_block() {
            for (out, sample) in mixdown.iter_mut().zip(buffer) {
                *out += sample;
            }
        }
        for &sample in &mixdown {
            let sample = sample * 0.5;
            if args.float {
                writer.write_sample(sample)?;
            } else {
                writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
            }
        }
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    info!(path = %args.output.display(), "done");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    render(&args)
}
