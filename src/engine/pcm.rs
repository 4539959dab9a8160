//! Sampled (DirectSound) voices
//!
//! Besides plain 8-bit samples a voice handles two game-specific formats:
//! 4-bit compressed samples (marked by a negative end offset) and the
//! synthesized pulse, saw and triangle instruments (marked by a looping
//! sample with zero loop start and zero length, the "sample" bytes holding
//! generator parameters).

use tracing::trace;

use super::envelope::{stereo_volume, tick_note, Envelope};
use crate::config::EngineConfig;
use crate::resampler::{Resampler, SampleSource};
use crate::sample::SampleDescriptor;
use crate::types::{Adsr, ChnVol, EnvState, MixingArgs, Note, RampCursor, TrackParams, VolumeRamp};

/// Shift register start value of the compressed decoder
const COMPRESSED_INITIAL_SHIFT: u8 = 0x38;

/// Saw generator bias
const SAW_FIX: u32 = 0x70;

/// Synth instruments run their phase 64 times slower than samples
const SYNTH_RATE_DIVISOR: f32 = 64.0;

/// Waveform of a synthesized instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthWaveform {
    /// Pulse with modulated duty
    Pulse,
    /// Fixed-point sawtooth
    Saw,
    /// Triangle
    Triangle,
}

/// Generator parameters embedded in a synth instrument's sample bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthParams {
    /// Waveform selector (byte 1)
    pub waveform: SynthWaveform,
    /// Base duty (byte 2)
    pub duty_base: u8,
    /// Duty modulation step per frame (byte 3)
    pub duty_step: u8,
    /// Modulation depth (byte 4)
    pub depth: u8,
    /// Initial duty (byte 5)
    pub init_duty: u8,
}

impl SynthParams {
    fn from_bytes(data: &[u8]) -> Option<Self> {
        let bytes = data.get(..6)?;
        let waveform = match bytes[1] {
            0 => SynthWaveform::Pulse,
            1 => SynthWaveform::Saw,
            _ => SynthWaveform::Triangle,
        };
        Some(Self {
            waveform,
            duty_base: bytes[2],
            duty_step: bytes[3],
            depth: bytes[4],
            init_duty: bytes[5],
        })
    }
}

/// How a voice turns its sample into audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    /// Signed 8-bit sample through the resampler
    Normal,
    /// 4-bit compressed sample through the resampler
    Compressed,
    /// Generated waveform, no resampling
    Synth(SynthParams),
}

/// Read cursor over a voice's sample data
#[derive(Debug, Clone)]
struct SampleStream<'a> {
    data: &'a [u8],
    pos: u32,
    end: u32,
    loop_pos: u32,
    looping: bool,
    compressed: bool,
    level: i16,
    shift: u8,
}

impl<'a> SampleStream<'a> {
    #[inline]
    fn decode(&mut self) -> f32 {
        if self.compressed {
            self.decode_compressed()
        } else {
            let value = self.data[self.pos as usize] as i8;
            self.pos += 1;
            value as f32 / 128.0
        }
    }

    /// One step of the adaptive 4-bit delta decoder
    fn decode_compressed(&mut self) -> f32 {
        let low_nibble = self.pos & 1 == 1;
        let byte = self.data[(self.pos >> 1) as usize] as u32;
        self.pos += 1;

        // Nibble lands in bits 31..28
        let nibble = if low_nibble {
            (byte << 28) as i32
        } else {
            ((byte << 24) & 0xF000_0000) as i32
        };

        if self.shift <= 63 {
            let delta = nibble >> (self.shift >> 1);
            self.level = self.level.wrapping_add(delta as i16);
        }

        let magnitude = if nibble < 0 {
            nibble.wrapping_neg()
        } else {
            nibble
        };
        self.shift = self
            .shift
            .wrapping_add(4)
            .wrapping_sub(((magnitude as u32) >> 28) as u8);

        self.level as f32 / 128.0
    }
}

impl<'a> SampleSource for SampleStream<'a> {
    fn fetch(&mut self, buf: &mut Vec<f32>, required: usize) -> bool {
        if buf.len() >= required {
            return true;
        }
        loop {
            let wanted = required - buf.len();
            let until_end = self.end.saturating_sub(self.pos) as usize;
            for _ in 0..wanted.min(until_end) {
                let sample = self.decode();
                buf.push(sample);
            }

            if self.pos >= self.end {
                if self.looping {
                    self.pos = self.loop_pos;
                } else {
                    buf.resize(required, 0.0);
                    return false;
                }
            }
            if buf.len() >= required {
                return true;
            }
        }
    }
}

/// Generator state for synth instruments
#[derive(Debug, Clone, Copy, Default)]
struct SynthState {
    /// Phase in periods, `0.0..1.0`
    inter_pos: f32,
    /// Fixed-point accumulator (duty modulation or saw feedback)
    acc: u32,
}

/// A sounding sampled note
#[derive(Debug, Clone)]
pub struct PcmVoice<'a> {
    owner: u8,
    note: Note,
    envelope: Envelope,
    ramp: VolumeRamp,
    inst_pan: i8,
    mono: bool,
    mid_c_freq: f32,
    freq: f32,
    fixed: bool,
    playback: Playback,
    resampler: Resampler,
    stream: SampleStream<'a>,
    synth: SynthState,
    last_volume: ChnVol,
}

impl<'a> PcmVoice<'a> {
    /// Start a note on a sample
    ///
    /// The descriptor's end offset is clamped to the data actually present,
    /// a loop start at or past the end disables looping.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: u8,
        sample: SampleDescriptor<'a>,
        adsr: Adsr,
        note: Note,
        track: TrackParams,
        inst_pan: i8,
        fixed: bool,
        config: &EngineConfig,
    ) -> Self {
        let synth_params = if sample.is_special_synth() {
            SynthParams::from_bytes(sample.data)
        } else {
            None
        };
        let compressed = synth_params.is_none() && sample.is_compressed();

        let playback = match synth_params {
            Some(params) => Playback::Synth(params),
            None if compressed => Playback::Compressed,
            None => Playback::Normal,
        };

        let available = sample.data.len().min(u32::MAX as usize / 2) as u32;
        let end = if compressed {
            sample.end_pos.wrapping_neg().min(available * 2)
        } else {
            sample.end_pos.min(available)
        };
        let looping = !compressed && sample.loop_enabled && sample.loop_pos < end;

        let resampler_kind = if fixed {
            config.fixed_resampler
        } else {
            config.resampler
        };

        trace!(
            owner,
            key = note.midi_key,
            ?playback,
            end,
            looping,
            "new pcm voice"
        );

        let mut voice = Self {
            owner,
            note,
            envelope: Envelope::new(adsr, config.sub_steps),
            ramp: VolumeRamp::default(),
            inst_pan,
            mono: config.mono,
            mid_c_freq: sample.mid_c_freq,
            freq: 0.0,
            fixed,
            playback,
            resampler: Resampler::new(resampler_kind),
            stream: SampleStream {
                data: sample.data,
                pos: 0,
                end,
                loop_pos: sample.loop_pos,
                looping,
                compressed,
                level: 0,
                shift: COMPRESSED_INITIAL_SHIFT,
            },
            synth: SynthState::default(),
            last_volume: ChnVol::default(),
        };
        voice.set_volume(track.volume, track.pan);
        voice.set_pitch(track.pitch);
        voice
    }

    /// Track that started the note
    #[inline]
    pub fn owner(&self) -> u8 {
        self.owner
    }

    /// Key the track asked for
    #[inline]
    pub fn original_key(&self) -> u8 {
        self.note.original_key
    }

    /// Note as currently counted down
    #[inline]
    pub fn note(&self) -> Note {
        self.note
    }

    /// Envelope state
    #[inline]
    pub fn state(&self) -> EnvState {
        self.envelope.state()
    }

    /// Envelope
    #[inline]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// True once the voice can be dropped
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.envelope.is_dead()
    }

    /// Playback path picked at creation
    #[inline]
    pub fn playback(&self) -> Playback {
        self.playback
    }

    /// Current playback frequency in Hz
    #[inline]
    pub fn frequency(&self) -> f32 {
        self.freq
    }

    /// Volume ramp used for the most recent sub-block
    #[inline]
    pub fn last_volume(&self) -> ChnVol {
        self.last_volume
    }

    /// Integer volume targets
    #[inline]
    pub fn volume_ramp(&self) -> VolumeRamp {
        self.ramp
    }

    /// Apply track volume and pan (ignored once released)
    pub fn set_volume(&mut self, volume: u8, pan: i8) {
        if !self.envelope.is_held() {
            return;
        }
        let pan = if self.mono {
            0
        } else {
            pan as i32 + self.inst_pan as i32
        };
        let (left, right) = stereo_volume(self.note.velocity, volume, pan);
        self.ramp.set_target(left, right);
    }

    /// Apply pitch bend in 1/768 octave units
    pub fn set_pitch(&mut self, pitch: i16) {
        let octaves = (self.note.midi_key as f32 - 60.0) / 12.0 + pitch as f32 / 768.0;
        self.freq = self.mid_c_freq * octaves.exp2();
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
    ///
    /// `scratch` is reused storage for resampled audio.
    pub fn process(&mut self, buffer: &mut [f32], scratch: &mut Vec<f32>, args: &MixingArgs) {
        self.envelope.step(&mut self.ramp);
        if self.envelope.is_dead() {
            return;
        }
        let frames = buffer.len() / 2;
        if frames == 0 {
            return;
        }
        let frames_recip = 1.0 / frames as f32;

        let vol = self.envelope.volume(&self.ramp).scaled(args.volume);
        self.last_volume = vol;
        let mut cursor = RampCursor::new(vol, frames_recip);

        match self.playback {
            Playback::Synth(params) => {
                let inc = self.freq * args.sample_rate_recip / SYNTH_RATE_DIVISOR;
                match params.waveform {
                    SynthWaveform::Pulse => {
                        self.process_pulse(buffer, &mut cursor, inc, params, frames_recip)
                    }
                    SynthWaveform::Saw => self.process_saw(buffer, &mut cursor, inc),
                    SynthWaveform::Triangle => self.process_triangle(buffer, &mut cursor, inc),
                }
            }
            Playback::Normal | Playback::Compressed => {
                let inc = if self.fixed {
                    args.fixed_mode_rate as f32 * args.sample_rate_recip
                } else {
                    self.freq * args.sample_rate_recip
                };
                scratch.clear();
                scratch.resize(frames, 0.0);
                let running = self.resampler.process(scratch, inc, &mut self.stream);
                for (frame, &sample) in buffer.chunks_exact_mut(2).zip(scratch.iter()) {
                    cursor.mix(frame, sample);
                }
                if !running {
                    trace!(owner = self.owner, key = self.note.midi_key, "sample exhausted");
                    self.envelope.kill();
                }
            }
        }
        self.ramp.settle();
    }

    /// Pulse with a duty cycle swept by a phase accumulator
    fn process_pulse(
        &mut self,
        buffer: &mut [f32],
        cursor: &mut RampCursor,
        inc: f32,
        params: SynthParams,
        frames_recip: f32,
    ) {
        let step = (params.duty_step as u32) << 24;
        if self.envelope.inter_step() == 0 {
            self.synth.acc = self.synth.acc.wrapping_add(step);
        }
        let from_pos = self.synth.acc;
        let to_pos = from_pos.wrapping_add(step);

        let from_thresh = pulse_threshold(from_pos, params);
        let to_thresh = pulse_threshold(to_pos, params);

        let sub_steps_recip = 1.0 / self.envelope.sub_steps() as f32;
        let delta = to_thresh - from_thresh;
        let mut threshold =
            from_thresh + delta * (self.envelope.inter_step() as f32 * sub_steps_recip);
        let thresh_step = delta * sub_steps_recip * frames_recip;

        for frame in buffer.chunks_exact_mut(2) {
            let mut sample = if self.synth.inter_pos < threshold {
                0.5
            } else {
                -0.5
            };
            // Keep the pulse zero-mean for any duty
            sample += 0.5 - threshold;
            threshold += thresh_step;
            cursor.mix(frame, sample);

            self.synth.inter_pos += inc;
            if self.synth.inter_pos >= 1.0 {
                self.synth.inter_pos -= 1.0;
            }
        }
    }

    /// Fixed-point sawtooth, bit-exact with the hardware routine
    fn process_saw(&mut self, buffer: &mut [f32], cursor: &mut RampCursor, inc: f32) {
        for frame in buffer.chunks_exact_mut(2) {
            self.synth.inter_pos += inc;
            if self.synth.inter_pos >= 1.0 {
                self.synth.inter_pos -= 1.0;
            }
            let sample = saw_step(&mut self.synth.acc, self.synth.inter_pos);
            cursor.mix(frame, sample);
        }
    }

    fn process_triangle(&mut self, buffer: &mut [f32], cursor: &mut RampCursor, inc: f32) {
        for frame in buffer.chunks_exact_mut(2) {
            self.synth.inter_pos += inc;
            if self.synth.inter_pos >= 1.0 {
                self.synth.inter_pos -= 1.0;
            }
            let phase = self.synth.inter_pos;
            let sample = if phase < 0.5 {
                4.0 * phase - 1.0
            } else {
                3.0 - 4.0 * phase
            };
            cursor.mix(frame, sample);
        }
    }
}

/// Duty threshold (`0.0..1.0`) for a modulation accumulator value
fn pulse_threshold(pos: u32, params: SynthParams) -> f32 {
    let mut thresh = ((params.init_duty as u32) << 24).wrapping_add(pos);
    thresh = if (thresh as i32) < 0 {
        !thresh >> 8
    } else {
        thresh >> 8
    };
    thresh = thresh
        .wrapping_mul(params.depth as u32)
        .wrapping_add((params.duty_base as u32) << 24);
    thresh as f32 / 4_294_967_296.0
}

/// One saw sample; `acc` carries the feedback term between samples
#[inline]
fn saw_step(acc: &mut u32, inter_pos: f32) -> f32 {
    let var1 = ((inter_pos * 256.0) as u32).wrapping_sub(SAW_FIX);
    let var2 = ((inter_pos * 65536.0) as u32) << 17;
    let var3 = var1.wrapping_sub(var2 >> 27);
    *acc = var3.wrapping_add(((*acc as i32) >> 1) as u32);
    (*acc as i32) as f32 / 256.0
}
