//! CGB (legacy Game Boy) voices
//!
//! Four fixed slots: two square channels, the 4-bit wave channel and the
//! noise channel. They share the envelope and volume ramp of sampled voices
//! but compute their output directly from the phase.

use tracing::trace;

use super::envelope::{stereo_volume, tick_note, Envelope};
use super::patterns::{noise_freq, noise_sequence, square_pattern};
use crate::sample::{CgbDef, CgbKind, NoisePattern, WaveDuty};
use crate::types::{Adsr, ChnVol, EnvState, MixingArgs, Note, RampCursor, TrackParams, VolumeRamp};

/// Owner of a slot that never played
const NO_OWNER: u8 = 0xFF;

/// Snap a pan value to the three positions the hardware can produce
#[inline]
pub fn snap_pan(pan: i32) -> i32 {
    if pan < -21 {
        -64
    } else if pan > 20 {
        63
    } else {
        0
    }
}

/// Frequency in Hz of a tonal CGB note
#[inline]
fn tone_freq(midi_key: u8, pitch: i16) -> f32 {
    let octaves = (midi_key as f32 - 69.0) / 12.0 + pitch as f32 / 768.0;
    440.0 * octaves.exp2()
}

/// One hardware CGB slot
#[derive(Debug, Clone)]
pub struct CgbVoice<'a> {
    kind: CgbKind,
    def: CgbDef<'a>,
    owner: u8,
    note: Note,
    envelope: Envelope,
    ramp: VolumeRamp,
    mono: bool,
    /// Periods per second for square/wave, bits per second for noise
    freq: f32,
    /// Position within the current period (square/wave) or bit (noise), `0.0..1.0`
    phase: f32,
    /// Current bit of the noise sequence
    noise_bit: usize,
    last_volume: ChnVol,
}

impl<'a> CgbVoice<'a> {
    /// Create a silent slot
    pub fn new(kind: CgbKind, sub_steps: u8, mono: bool) -> Self {
        let def = match kind {
            CgbKind::Square1 => CgbDef::Square1(WaveDuty::default()),
            CgbKind::Square2 => CgbDef::Square2(WaveDuty::default()),
            CgbKind::Wave => CgbDef::Wave(&[0x88; 16]),
            CgbKind::Noise => CgbDef::Noise(NoisePattern::default()),
        };
        let mut envelope = Envelope::new(Adsr::default(), sub_steps);
        envelope.kill();
        Self {
            kind,
            def,
            owner: NO_OWNER,
            note: Note::default(),
            envelope,
            ramp: VolumeRamp::default(),
            mono,
            freq: 0.0,
            phase: 0.0,
            noise_bit: 0,
            last_volume: ChnVol::default(),
        }
    }

    /// Start a new note on this slot, replacing whatever played before
    ///
    /// A definition for another channel is ignored.
    pub fn init(&mut self, owner: u8, def: CgbDef<'a>, adsr: Adsr, note: Note, track: TrackParams) {
        if def.kind() != self.kind {
            return;
        }
        trace!(owner, kind = ?self.kind, key = note.midi_key, "cgb note");
        self.def = def;
        self.owner = owner;
        self.note = note;
        self.envelope.restart(adsr);
        self.ramp = VolumeRamp::default();
        self.phase = 0.0;
        self.noise_bit = 0;
        self.set_volume(track.volume, track.pan);
        self.set_pitch(track.pitch);
    }

    /// Channel of this slot
    #[inline]
    pub fn kind(&self) -> CgbKind {
        self.kind
    }

    /// Track that started the current note
    #[inline]
    pub fn owner(&self) -> u8 {
        self.owner
    }

    /// Key the track asked for
    #[inline]
    pub fn original_key(&self) -> u8 {
        self.note.original_key
    }

    /// Envelope state
    #[inline]
    pub fn state(&self) -> EnvState {
        self.envelope.state()
    }

    /// True when the slot is silent
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.envelope.is_dead()
    }

    /// Current frequency
    #[inline]
    pub fn frequency(&self) -> f32 {
        self.freq
    }

    /// Volume ramp used for the most recent sub-block
    #[inline]
    pub fn last_volume(&self) -> ChnVol {
        self.last_volume
    }

    /// Apply track volume and pan (ignored once released)
    pub fn set_volume(&mut self, volume: u8, pan: i8) {
        if !self.envelope.is_held() {
            return;
        }
        let pan = if self.mono { 0 } else { snap_pan(pan as i32) };
        let (left, right) = stereo_volume(self.note.velocity, volume, pan);
        self.ramp.set_target(left, right);
    }

    /// Apply pitch bend in 1/768 octave units
    pub fn set_pitch(&mut self, pitch: i16) {
        self.freq = match self.def {
            CgbDef::Noise(_) => noise_freq(self.note.midi_key) * (pitch as f32 / 768.0).exp2(),
            _ => tone_freq(self.note.midi_key, pitch),
        };
    }

    /// Count down one frame of note length
    pub fn tick_note(&mut self) -> crate::Result<bool> {
        tick_note(&mut self.envelope, &mut self.note)
    }

    /// Enter release
    pub fn release(&mut self) {
        self.envelope.release();
    }

    /// Silence immediately
    pub fn kill(&mut self) {
        self.envelope.kill();
    }

    /// Render one sub-block, accumulating into interleaved stereo `buffer`
    pub fn process(&mut self, buffer: &mut [f32], args: &MixingArgs) {
        self.envelope.step(&mut self.ramp);
        if self.envelope.is_dead() {
            return;
        }
        let frames = buffer.len() / 2;
        if frames == 0 {
            return;
        }

        let vol = self.envelope.volume(&self.ramp).scaled(args.volume);
        self.last_volume = vol;
        let mut cursor = RampCursor::new(vol, 1.0 / frames as f32);
        let inc = self.freq * args.sample_rate_recip;

        match self.def {
            CgbDef::Square1(duty) | CgbDef::Square2(duty) => {
                let pattern = square_pattern(duty);
                for frame in buffer.chunks_exact_mut(2) {
                    let index = (self.phase * 8.0) as usize & 7;
                    cursor.mix(frame, pattern[index]);
                    self.phase = advance(self.phase, inc).0;
                }
            }
            CgbDef::Wave(table) => {
                for frame in buffer.chunks_exact_mut(2) {
                    let index = (self.phase * 32.0) as usize & 31;
                    let byte = table[index / 2];
                    let nibble = if index % 2 == 0 { byte >> 4 } else { byte & 0x0F };
                    cursor.mix(frame, (nibble as f32 - 8.0) / 16.0);
                    self.phase = advance(self.phase, inc).0;
                }
            }
            CgbDef::Noise(pattern) => {
                let seq = noise_sequence(pattern);
                for frame in buffer.chunks_exact_mut(2) {
                    let sample = if seq.bit(self.noise_bit) { 0.5 } else { -0.5 };
                    cursor.mix(frame, sample);
                    let (phase, bits) = advance(self.phase, inc);
                    self.phase = phase;
                    self.noise_bit = (self.noise_bit + bits) % seq.len();
                }
            }
        }
        self.ramp.settle();
    }
}

/// Step a fractional phase, returning the wrapped phase and whole periods crossed
#[inline]
fn advance(phase: f32, inc: f32) -> (f32, usize) {
    let next = phase + inc;
    let whole = next.floor();
    (next - whole, whole as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::patterns::NOISE_FINE_LEN;
    use crate::types::NOTE_TIE;

    /// Key 69 plays 64 samples per period at this rate
    const RATE: f32 = 440.0 * 64.0;

    fn args_at(rate: f32) -> MixingArgs {
        MixingArgs {
            volume: 1.0,
            fixed_mode_rate: 13_379,
            sample_rate_recip: 1.0 / rate,
        }
    }

    fn args() -> MixingArgs {
        args_at(RATE)
    }

    #[test]
    fn test_slots_start_silent() {
        let voice = CgbVoice::new(CgbKind::Noise, 4, false);
        assert!(voice.is_dead());
        assert_eq!(voice.owner(), NO_OWNER);
    }

    #[test]
    fn test_square_50_sign_pattern() {
        let mut voice = CgbVoice::new(CgbKind::Square1, 4, false);
        voice.init(
            0,
            CgbDef::Square1(WaveDuty::D50),
            Adsr::new(0xFF, 0, 0xFF, 0),
            Note::new(69, 127, NOTE_TIE),
            TrackParams::default(),
        );
        // 64 samples per period, 8 per pattern step
        let mut buffer = vec![0.0f32; 2 * 128];
        voice.process(&mut buffer, &args());

        // Probe the middle of each pattern step
        let signs: Vec<bool> = buffer
            .chunks_exact(2)
            .skip(4)
            .step_by(8)
            .map(|frame| frame[0] > 0.0)
            .collect();
        assert_eq!(
            signs,
            vec![true, true, true, true, false, false, false, false].repeat(2),
            "50% duty must alternate every 4 of 8 steps"
        );
        assert!(buffer.iter().all(|v| v.abs() > 0.0));
    }

    #[test]
    fn test_square_tracks_pattern_values() {
        let mut voice = CgbVoice::new(CgbKind::Square2, 4, false);
        voice.init(
            0,
            CgbDef::Square2(WaveDuty::D12),
            Adsr::new(0xFF, 0, 0xFF, 0),
            Note::new(69, 127, NOTE_TIE),
            TrackParams::default(),
        );
        let mut buffer = vec![0.0f32; 2 * 64];
        voice.process(&mut buffer, &args());
        let gain = voice.last_volume().from_left;
        for (step, expected) in square_pattern(WaveDuty::D12).iter().enumerate() {
            let frame = step * 8 + 4;
            approx::assert_relative_eq!(buffer[frame * 2], expected * gain, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_wave_nibble_order() {
        let mut table = [0u8; 16];
        table[0] = 0xF0;
        let mut voice = CgbVoice::new(CgbKind::Wave, 4, false);
        voice.init(
            0,
            CgbDef::Wave(&table),
            Adsr::new(0xFF, 0, 0xFF, 0),
            Note::new(69, 127, NOTE_TIE),
            TrackParams::default(),
        );
        // 256 samples per period, 8 per nibble
        let mut buffer = vec![0.0f32; 2 * 16];
        voice.process(&mut buffer, &args_at(440.0 * 256.0));
        let gain = voice.last_volume().from_left;
        // High nibble first: 0xF -> 7/16, then 0x0 -> -8/16
        approx::assert_relative_eq!(buffer[4 * 2], 7.0 / 16.0 * gain, max_relative = 1e-5);
        approx::assert_relative_eq!(buffer[12 * 2], -0.5 * gain, max_relative = 1e-5);
    }

    #[test]
    fn test_noise_is_bipolar() {
        let mut voice = CgbVoice::new(CgbKind::Noise, 4, false);
        voice.init(
            0,
            CgbDef::Noise(NoisePattern::Rough),
            Adsr::new(0xFF, 0, 0xFF, 0),
            Note::new(60, 127, NOTE_TIE),
            TrackParams::default(),
        );
        let mut buffer = vec![0.0f32; 2 * 512];
        voice.process(&mut buffer, &args());
        let gain = voice.last_volume().from_left;
        assert!(buffer
            .chunks_exact(2)
            .all(|f| (f[0].abs() - 0.5 * gain).abs() < 1e-6));
        assert!(buffer.iter().any(|&v| v > 0.0));
        assert!(buffer.iter().any(|&v| v < 0.0));
    }

    #[test]
    fn test_pan_snaps() {
        assert_eq!(snap_pan(-22), -64);
        assert_eq!(snap_pan(-21), 0);
        assert_eq!(snap_pan(20), 0);
        assert_eq!(snap_pan(21), 63);

        let mut voice = CgbVoice::new(CgbKind::Square1, 4, false);
        voice.init(
            0,
            CgbDef::Square1(WaveDuty::D50),
            Adsr::new(0xFF, 0, 0xFF, 0),
            Note::new(69, 127, NOTE_TIE),
            TrackParams {
                volume: 127,
                pan: 30,
                pitch: 0,
            },
        );
        let mut buffer = vec![0.0f32; 2 * 16];
        voice.process(&mut buffer, &args());
        let vol = voice.last_volume();
        assert!(
            vol.from_left * 100.0 < vol.from_right,
            "hard right leaves left almost silent"
        );
    }

    #[test]
    fn test_mismatched_definition_is_ignored() {
        let mut voice = CgbVoice::new(CgbKind::Square1, 4, false);
        voice.init(
            3,
            CgbDef::Noise(NoisePattern::Fine),
            Adsr::new(0xFF, 0, 0xFF, 0),
            Note::new(60, 127, NOTE_TIE),
            TrackParams::default(),
        );
        assert!(voice.is_dead());
        assert_eq!(voice.owner(), NO_OWNER);
    }

    #[test]
    fn test_noise_keeps_pitch_late_in_period() {
        let args = args_at(48_000.0);
        for key in [21u8, 30, 40, 80] {
            let mut voice = CgbVoice::new(CgbKind::Noise, 4, false);
            voice.init(
                0,
                CgbDef::Noise(NoisePattern::Fine),
                Adsr::new(0xFF, 0, 0xFF, 0),
                Note::new(key, 127, NOTE_TIE),
                TrackParams::default(),
            );
            // Close to the end of the 15-bit period, as after minutes of a held note
            voice.noise_bit = 32_000;
            let mut buffer = vec![0.0f32; 2 * 1000];
            voice.process(&mut buffer, &args);

            let inc = (voice.frequency() * args.sample_rate_recip) as f64;
            let len = NOISE_FINE_LEN as f64;
            let expected = (32_000.0 + inc * 1000.0) % len;
            let actual = voice.noise_bit as f64 + voice.phase as f64;
            assert!(
                (actual - expected).abs() < 0.01,
                "key {key}: expected position {expected}, got {actual}"
            );
            assert!((0.0..1.0).contains(&voice.phase));
        }
    }

    #[test]
    fn test_noise_pitch_uses_table() {
        let mut voice = CgbVoice::new(CgbKind::Noise, 4, false);
        voice.init(
            0,
            CgbDef::Noise(NoisePattern::Fine),
            Adsr::new(0xFF, 0, 0xFF, 0),
            Note::new(60, 127, NOTE_TIE),
            TrackParams::default(),
        );
        approx::assert_relative_eq!(voice.frequency(), noise_freq(60));
        voice.set_pitch(768);
        approx::assert_relative_eq!(voice.frequency(), noise_freq(60) * 2.0, max_relative = 1e-5);
    }
}
