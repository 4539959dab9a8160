//! Shared value types for the sound engine
//!
//! Envelope parameters, notes, envelope states and the per-frame volume ramp
//! used by both PCM and CGB voices.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::SynthError;

/// Key value passed to [`SoundMixer::stop_voice`](crate::SoundMixer::stop_voice)
/// to release every voice of a track
pub const NOTE_ALL: u8 = 0xFE;

/// Note length meaning "sustain until explicitly released"
pub const NOTE_TIE: i8 = -1;

/// Attack / decay / sustain / release rates as used by the sound driver
///
/// All four values are raw 8-bit rates:
/// - `att`: level increment per envelope step (`0xFF` = instant)
/// - `dec`: decay multiplier (`level * dec >> 8`)
/// - `sus`: sustain level
/// - `rel`: release multiplier (`level * rel >> 8`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Adsr {
    /// Attack increment
    pub att: u8,
    /// Decay multiplier
    pub dec: u8,
    /// Sustain level
    pub sus: u8,
    /// Release multiplier
    pub rel: u8,
}

impl Adsr {
    /// Create envelope parameters from raw rates
    pub const fn new(att: u8, dec: u8, sus: u8, rel: u8) -> Self {
        Self { att, dec, sus, rel }
    }
}

/// A single note as issued by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    /// MIDI key used for pitch (may be remapped by the instrument)
    pub midi_key: u8,
    /// Key originally requested by the track, used for note-off matching
    pub original_key: u8,
    /// Velocity 0-127
    pub velocity: u8,
    /// Remaining length in frames, or [`NOTE_TIE`]
    pub length: i8,
}

impl Note {
    /// Create a note whose pitch key equals its requested key
    pub const fn new(midi_key: u8, velocity: u8, length: i8) -> Self {
        Self {
            midi_key,
            original_key: midi_key,
            velocity,
            length,
        }
    }

    /// Replace the pitch key, keeping the originally requested key
    pub const fn with_key(mut self, midi_key: u8) -> Self {
        self.midi_key = midi_key;
        self
    }

    /// Advance the length countdown by one frame
    ///
    /// Returns `Ok(true)` while the note keeps sounding and `Ok(false)` once the
    /// countdown hits zero and the voice must be released. Ties never change.
    pub fn tick(&mut self) -> crate::Result<bool> {
        match self.length {
            NOTE_TIE => Ok(true),
            len if len > 0 => {
                self.length -= 1;
                Ok(self.length != 0)
            }
            len => Err(SynthError::IllegalNoteCountdown(len)),
        }
    }
}

impl Default for Note {
    fn default() -> Self {
        Self::new(60, 127, NOTE_TIE)
    }
}

/// Envelope state, strictly ordered
///
/// Anything below [`EnvState::Rel`] is still "held" and accepts volume and
/// pitch changes from its track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive)]
pub enum EnvState {
    /// Freshly created, envelope not started
    Init = 0,
    /// Attack phase
    Atk,
    /// Decay phase
    Dec,
    /// Sustain phase
    Sus,
    /// Release phase
    Rel,
    /// Final sub-step letting the ramp reach zero
    Die,
    /// Silent, ready to be reclaimed
    Dead,
}

impl TryFrom<u8> for EnvState {
    type Error = SynthError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        EnvState::from_u8(value).ok_or(SynthError::InvalidEnvelopeState(value))
    }
}

/// Volume at the start and end of the sub-block being rendered
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChnVol {
    /// Left volume at the first sample
    pub from_left: f32,
    /// Right volume at the first sample
    pub from_right: f32,
    /// Left volume reached after the last sample
    pub to_left: f32,
    /// Right volume reached after the last sample
    pub to_right: f32,
}

impl ChnVol {
    /// Scale all four corners by a common factor
    pub fn scaled(self, factor: f32) -> Self {
        Self {
            from_left: self.from_left * factor,
            from_right: self.from_right * factor,
            to_left: self.to_left * factor,
            to_right: self.to_right * factor,
        }
    }
}

/// Integer channel volume with the value captured at the previous boundary
///
/// Track parameter changes only ever touch `left`/`right`; the `from_*`
/// side is re-anchored after each rendered sub-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeRamp {
    /// Left volume at the previous boundary
    pub from_left: u8,
    /// Right volume at the previous boundary
    pub from_right: u8,
    /// Target left volume
    pub left: u8,
    /// Target right volume
    pub right: u8,
}

impl VolumeRamp {
    /// Make the current target the start of the next ramp
    #[inline]
    pub fn settle(&mut self) {
        self.from_left = self.left;
        self.from_right = self.right;
    }

    /// Set a new target pair
    #[inline]
    pub fn set_target(&mut self, left: u8, right: u8) {
        self.left = left;
        self.right = right;
    }
}

/// Track-level parameters applied to every voice a track owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackParams {
    /// Track volume 0-127
    pub volume: u8,
    /// Track pan -64..=63
    pub pan: i8,
    /// Pitch bend in 1/768 octave units (64 per semitone)
    pub pitch: i16,
}

impl Default for TrackParams {
    fn default() -> Self {
        Self {
            volume: 127,
            pan: 0,
            pitch: 0,
        }
    }
}

/// Per-render arguments handed from the mixer to each voice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixingArgs {
    /// Voice group volume scale
    pub volume: f32,
    /// Playback rate of fixed-frequency samples
    pub fixed_mode_rate: u32,
    /// `1 / output_sample_rate`
    pub sample_rate_recip: f32,
}

/// Linear per-sample volume stepping across one sub-block
#[derive(Debug, Clone, Copy)]
pub(crate) struct RampCursor {
    pub left: f32,
    pub right: f32,
    left_step: f32,
    right_step: f32,
}

impl RampCursor {
    pub fn new(vol: ChnVol, frames_recip: f32) -> Self {
        Self {
            left: vol.from_left,
            right: vol.from_right,
            left_step: (vol.to_left - vol.from_left) * frames_recip,
            right_step: (vol.to_right - vol.from_right) * frames_recip,
        }
    }

    /// Accumulate one mono sample into an interleaved stereo frame
    #[inline]
    pub fn mix(&mut self, frame: &mut [f32], sample: f32) {
        frame[0] += sample * self.left;
        frame[1] += sample * self.right;
        self.left += self.left_step;
        self.right += self.right_step;
    }
}

/// Bitmask of keys (0-127) currently sounding on a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActiveNotes(u128);

impl ActiveNotes {
    /// Mark a key as sounding
    pub fn insert(&mut self, key: u8) {
        self.0 |= 1u128 << (key & 0x7F);
    }

    /// Check whether a key is sounding
    pub fn contains(&self, key: u8) -> bool {
        self.0 & (1u128 << (key & 0x7F)) != 0
    }

    /// Number of distinct sounding keys
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    /// True if nothing sounds
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}
