//! Engine configuration
//!
//! A plain value passed to [`SoundMixer::new`](crate::SoundMixer::new). Loading
//! and persisting it is up to the host; the struct only derives `serde` so the
//! host can keep it in whatever format it likes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Result, SynthError};

/// Frame rate of the emulated hardware (vertical blank frequency)
pub const AGB_FPS: f64 = 59.727_500_569_605_8;

/// Default number of envelope sub-steps per frame
pub const DEFAULT_SUB_STEPS: u8 = 4;

/// Default reverb buffer size in bytes (one hardware PCM DMA buffer)
pub const DMA_BUFFER_BYTES: u16 = 0x630;

/// Most output tracks a mixer keeps apart
pub const MAX_TRACKS: u8 = 16;

/// Interpolation algorithm used to play back sampled voices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplerKind {
    /// Zero-order hold, closest to raw hardware output
    Nearest,
    /// Two-point linear interpolation
    Linear,
    /// Windowed sinc
    Sinc,
    /// Band-limited zero-order hold
    Blep,
    /// Band-limited linear interpolation
    Blamp,
}

impl ResamplerKind {
    /// Lowercase configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            ResamplerKind::Nearest => "nearest",
            ResamplerKind::Linear => "linear",
            ResamplerKind::Sinc => "sinc",
            ResamplerKind::Blep => "blep",
            ResamplerKind::Blamp => "blamp",
        }
    }
}

impl fmt::Display for ResamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResamplerKind {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(ResamplerKind::Nearest),
            "linear" => Ok(ResamplerKind::Linear),
            "sinc" => Ok(ResamplerKind::Sinc),
            "blep" => Ok(ResamplerKind::Blep),
            "blamp" => Ok(ResamplerKind::Blamp),
            other => Err(SynthError::ConfigError(format!(
                "unknown resampler '{other}'"
            ))),
        }
    }
}

/// Post-mix reverb algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReverbKind {
    /// Stock driver reverb: two averaged taps one hardware buffer apart
    Normal,
    /// Single-stage cross-channel feedback (Golden Sun, first variant)
    #[serde(rename = "gs1")]
    GoldenSun1,
    /// Two-stage feedback (Golden Sun, second variant)
    #[serde(rename = "gs2")]
    GoldenSun2,
    /// Two-stage feedback with the Mario Golf: Advance Tour coefficients
    Mgat,
    /// Keeps its history moving without touching the signal
    Test,
    /// Disabled
    None,
}

impl ReverbKind {
    /// Lowercase configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            ReverbKind::Normal => "normal",
            ReverbKind::GoldenSun1 => "gs1",
            ReverbKind::GoldenSun2 => "gs2",
            ReverbKind::Mgat => "mgat",
            ReverbKind::Test => "test",
            ReverbKind::None => "none",
        }
    }
}

impl fmt::Display for ReverbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReverbKind {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(ReverbKind::Normal),
            "gs1" => Ok(ReverbKind::GoldenSun1),
            "gs2" => Ok(ReverbKind::GoldenSun2),
            "mgat" => Ok(ReverbKind::Mgat),
            "test" => Ok(ReverbKind::Test),
            "none" => Ok(ReverbKind::None),
            other => Err(SynthError::ConfigError(format!("unknown reverb '{other}'"))),
        }
    }
}

/// Per-run engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Hardware mixing rate; fixed-frequency samples play at this rate
    pub fixed_mode_rate: u32,
    /// Resampler for pitched samples
    pub resampler: ResamplerKind,
    /// Resampler for fixed-frequency samples
    pub fixed_resampler: ResamplerKind,
    /// Reverb algorithm
    pub reverb_kind: ReverbKind,
    /// Reverb intensity 0-127
    pub reverb_intensity: u8,
    /// Overall output gain
    pub master_volume: f32,
    /// Driver PCM volume 0-15 (does not affect CGB voices)
    pub pcm_volume: u8,
    /// Collapse all panning to the centre
    pub mono: bool,
    /// Number of separate output buffers (one per track, or 1 for a single mix),
    /// at most [`MAX_TRACKS`]
    pub track_count: u8,
    /// Reverb buffer size in bytes; some games use a non-standard size
    pub reverb_buffer_size: u16,
    /// Envelope sub-steps per frame
    pub sub_steps: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            fixed_mode_rate: 13_379,
            resampler: ResamplerKind::Linear,
            fixed_resampler: ResamplerKind::Nearest,
            reverb_kind: ReverbKind::Normal,
            reverb_intensity: 0,
            master_volume: 1.0,
            pcm_volume: 15,
            mono: false,
            track_count: MAX_TRACKS,
            reverb_buffer_size: DMA_BUFFER_BYTES,
            sub_steps: DEFAULT_SUB_STEPS,
        }
    }
}

impl EngineConfig {
    /// Check that the configuration can drive a mixer
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SynthError::ConfigError("sample rate must be non-zero".into()));
        }
        if self.fixed_mode_rate == 0 {
            return Err(SynthError::ConfigError(
                "fixed mode rate must be non-zero".into(),
            ));
        }
        if self.track_count == 0 {
            return Err(SynthError::ConfigError("track count must be non-zero".into()));
        }
        if self.sub_steps == 0 {
            return Err(SynthError::ConfigError("sub steps must be non-zero".into()));
        }
        if self.samples_per_sub_block() == 0 {
            return Err(SynthError::ConfigError(format!(
                "sample rate {} too low for {} sub steps",
                self.sample_rate, self.sub_steps
            )));
        }
        if !self.master_volume.is_finite() {
            return Err(SynthError::ConfigError("master volume must be finite".into()));
        }
        Ok(())
    }

    /// Output frames rendered per envelope sub-step
    pub fn samples_per_sub_block(&self) -> usize {
        (self.sample_rate as f64 / (AGB_FPS * self.sub_steps as f64)) as usize
    }

    /// Output frames rendered per driver frame
    pub fn samples_per_block(&self) -> usize {
        self.samples_per_sub_block() * self.sub_steps as usize
    }

    /// Output buffer count, limited to [`MAX_TRACKS`]
    pub fn track_limit(&self) -> u8 {
        self.track_count.min(MAX_TRACKS)
    }

    /// PCM volume as a linear scale
    pub fn pcm_scale(&self) -> f32 {
        self.pcm_volume.min(15) as f32 / 15.0
    }

    /// Number of hardware DMA buffers the reverb history spans
    pub fn reverb_buffer_count(&self) -> u8 {
        let samples_per_frame = (self.fixed_mode_rate as f64 / AGB_FPS) as u32;
        (self.reverb_buffer_size as u32 / samples_per_frame.max(1)).clamp(1, u8::MAX as u32) as u8
    }
}
