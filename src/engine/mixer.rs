//! Block mixer
//!
//! Owns every live voice and renders one driver frame at a time into
//! per-track interleaved stereo buffers. A frame is split into envelope
//! sub-blocks; every voice steps its envelope once per sub-block and ramps
//! its volume linearly across it. Master volume and fades are applied
//! before the reverb of each buffer.

use tracing::{debug, trace};

use super::cgb::CgbVoice;
use super::pcm::PcmVoice;
use crate::config::EngineConfig;
use crate::reverb::Reverb;
use crate::sample::{CgbDef, CgbKind, SampleDescriptor};
use crate::types::{ActiveNotes, Adsr, EnvState, MixingArgs, Note, TrackParams, NOTE_ALL};
use crate::Result;

const CGB_KINDS: [CgbKind; 4] = [
    CgbKind::Square1,
    CgbKind::Square2,
    CgbKind::Wave,
    CgbKind::Noise,
];

/// The sound engine mixer
#[derive(Debug)]
pub struct SoundMixer<'a> {
    config: EngineConfig,
    pcm_voices: Vec<PcmVoice<'a>>,
    cgb_voices: [CgbVoice<'a>; 4],
    buffers: Vec<Vec<f32>>,
    reverbs: Vec<Reverb>,
    scratch: Vec<f32>,
    samples_per_sub_block: usize,
    samples_per_block: usize,
    sample_rate_recip: f32,
    fade_pos: f32,
    fade_step: f32,
    fade_target: f32,
    fade_samples_left: usize,
}

impl<'a> SoundMixer<'a> {
    /// Create a mixer for a validated configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let samples_per_sub_block = config.samples_per_sub_block();
        let samples_per_block = config.samples_per_block();
        let track_count = config.track_limit() as usize;
        let hw_buffers = config.reverb_buffer_count();

        debug!(
            sample_rate = config.sample_rate,
            samples_per_block,
            track_count,
            reverb = %config.reverb_kind,
            hw_buffers,
            "sound mixer created"
        );

        let reverbs = (0..track_count)
            .map(|_| {
                Reverb::new(
                    config.reverb_kind,
                    config.reverb_intensity,
                    config.sample_rate,
                    hw_buffers,
                )
            })
            .collect();
        let cgb_voices = CGB_KINDS.map(|kind| CgbVoice::new(kind, config.sub_steps, config.mono));

        Ok(Self {
            sample_rate_recip: 1.0 / config.sample_rate as f32,
            buffers: vec![vec![0.0; samples_per_block * 2]; track_count],
            reverbs,
            scratch: Vec::with_capacity(samples_per_sub_block),
            pcm_voices: Vec::new(),
            cgb_voices,
            samples_per_sub_block,
            samples_per_block,
            fade_pos: 1.0,
            fade_step: 0.0,
            fade_target: 1.0,
            fade_samples_left: 0,
            config,
        })
    }

    /// Active configuration
    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a sampled note
    ///
    /// `fixed` plays the sample at the hardware mixing rate regardless of key.
    #[allow(clippy::too_many_arguments)]
    pub fn new_pcm_voice(
        &mut self,
        owner: u8,
        sample: SampleDescriptor<'a>,
        adsr: Adsr,
        note: Note,
        track: TrackParams,
        inst_pan: i8,
        fixed: bool,
    ) {
        let voice = PcmVoice::new(owner, sample, adsr, note, track, inst_pan, fixed, &self.config);
        self.pcm_voices.push(voice);
    }

    /// Start a note on the CGB slot named by `def`, cutting off its previous note
    pub fn new_cgb_voice(
        &mut self,
        owner: u8,
        def: CgbDef<'a>,
        adsr: Adsr,
        note: Note,
        track: TrackParams,
    ) {
        self.cgb_voices[def.kind().index()].init(owner, def, adsr, note, track);
    }

    /// Push volume, pan and pitch to every voice of a track
    pub fn set_track_params(&mut self, owner: u8, track: TrackParams) {
        for voice in self.pcm_voices.iter_mut().filter(|v| v.owner() == owner) {
            voice.set_volume(track.volume, track.pan);
            voice.set_pitch(track.pitch);
        }
        for voice in self.cgb_voices.iter_mut().filter(|v| v.owner() == owner) {
            voice.set_volume(track.volume, track.pan);
            voice.set_pitch(track.pitch);
        }
    }

    /// Count down note lengths of a track's voices
    ///
    /// Returns how many are still held. Expired notes enter release.
    pub fn tick_track_notes(&mut self, owner: u8) -> Result<usize> {
        let mut active = 0;
        for voice in self.pcm_voices.iter_mut().filter(|v| v.owner() == owner) {
            if voice.tick_note()? {
                active += 1;
            }
        }
        for voice in self.cgb_voices.iter_mut().filter(|v| v.owner() == owner) {
            if voice.tick_note()? {
                active += 1;
            }
        }
        Ok(active)
    }

    /// Original keys of a track's held voices
    pub fn track_active_notes(&self, owner: u8) -> ActiveNotes {
        let mut notes = ActiveNotes::default();
        self.pcm_voices
            .iter()
            .filter(|v| v.owner() == owner && v.state() < EnvState::Rel)
            .for_each(|v| notes.insert(v.original_key()));
        self.cgb_voices
            .iter()
            .filter(|v| v.owner() == owner && v.state() < EnvState::Rel)
            .for_each(|v| notes.insert(v.original_key()));
        notes
    }

    /// Release a note of a track
    ///
    /// Only the first held voice matching `key` is released. [`NOTE_ALL`]
    /// releases every voice of the track.
    pub fn stop_voice(&mut self, owner: u8, key: u8) {
        if key == NOTE_ALL {
            self.pcm_voices
                .iter_mut()
                .filter(|v| v.owner() == owner)
                .for_each(|v| v.release());
            self.cgb_voices
                .iter_mut()
                .filter(|v| v.owner() == owner)
                .for_each(|v| v.release());
            return;
        }

        let matches = |owner_of: u8, key_of: u8, state: EnvState| {
            owner_of == owner && key_of == key && state < EnvState::Rel
        };
        if let Some(voice) = self
            .pcm_voices
            .iter_mut()
            .find(|v| matches(v.owner(), v.original_key(), v.state()))
        {
            voice.release();
            return;
        }
        if let Some(voice) = self
            .cgb_voices
            .iter_mut()
            .find(|v| matches(v.owner(), v.original_key(), v.state()))
        {
            voice.release();
        }
    }

    /// Render one driver frame
    ///
    /// Returns one interleaved stereo buffer per track (a single buffer when
    /// `track_count` is 1). The buffers are overwritten by the next call.
    pub fn render_next_block(&mut self) -> &[Vec<f32>] {
        self.purge_dead_voices();
        for buffer in &mut self.buffers {
            buffer.fill(0.0);
        }

        let pcm_args = MixingArgs {
            volume: self.config.pcm_scale(),
            fixed_mode_rate: self.config.fixed_mode_rate,
            sample_rate_recip: self.sample_rate_recip,
        };
        let cgb_args = MixingArgs {
            volume: 1.0,
            ..pcm_args
        };
        let track_count = self.buffers.len();
        let sub_len = self.samples_per_sub_block * 2;

        for step in 0..self.config.sub_steps as usize {
            let range = step * sub_len..(step + 1) * sub_len;
            for voice in &mut self.pcm_voices {
                let target = route(voice.owner(), track_count);
                voice.process(
                    &mut self.buffers[target][range.clone()],
                    &mut self.scratch,
                    &pcm_args,
                );
            }
            for voice in &mut self.cgb_voices {
                let target = route(voice.owner(), track_count);
                voice.process(&mut self.buffers[target][range.clone()], &cgb_args);
            }
        }

        self.apply_master_volume();
        for (buffer, reverb) in self.buffers.iter_mut().zip(&mut self.reverbs) {
            reverb.process(buffer);
        }
        &self.buffers
    }

    fn purge_dead_voices(&mut self) {
        let before = self.pcm_voices.len();
        self.pcm_voices.retain(|v| !v.is_dead());
        let purged = before - self.pcm_voices.len();
        if purged > 0 {
            trace!(purged, remaining = self.pcm_voices.len(), "purged dead voices");
        }
    }

    fn apply_master_volume(&mut self) {
        let master = self.config.master_volume;
        for frame in 0..self.samples_per_block {
            let gain = master * self.fade_pos;
            for buffer in &mut self.buffers {
                buffer[frame * 2] *= gain;
                buffer[frame * 2 + 1] *= gain;
            }
            if self.fade_samples_left > 0 {
                self.fade_pos += self.fade_step;
                self.fade_samples_left -= 1;
                if self.fade_samples_left == 0 {
                    self.fade_pos = self.fade_target;
                }
            }
        }
    }

    /// Voices that still produce sound
    pub fn active_voice_count(&self) -> usize {
        let pcm = self.pcm_voices.iter().filter(|v| !v.is_dead()).count();
        let cgb = self.cgb_voices.iter().filter(|v| !v.is_dead()).count();
        pcm + cgb
    }

    /// Frames per rendered block
    #[inline]
    pub fn samples_per_block(&self) -> usize {
        self.samples_per_block
    }

    /// Output sample rate in Hz
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Number of output buffers
    #[inline]
    pub fn track_count(&self) -> usize {
        self.buffers.len()
    }

    /// CGB slot for a channel
    #[inline]
    pub fn cgb_voice(&self, kind: CgbKind) -> &CgbVoice<'a> {
        &self.cgb_voices[kind.index()]
    }

    /// Live sampled voices in creation order
    #[inline]
    pub fn pcm_voices(&self) -> &[PcmVoice<'a>] {
        &self.pcm_voices
    }

    /// Fade from the current level to silence over `millis`
    pub fn fade_out(&mut self, millis: f32) {
        debug!(millis, "fade out");
        let from = self.fade_pos;
        self.start_fade(from, 0.0, millis);
    }

    /// Fade from silence to full level over `millis`
    pub fn fade_in(&mut self, millis: f32) {
        debug!(millis, "fade in");
        self.start_fade(0.0, 1.0, millis);
    }

    /// True once no fade is in progress
    #[inline]
    pub fn is_fade_done(&self) -> bool {
        self.fade_samples_left == 0
    }

    /// Current fade gain
    #[inline]
    pub fn fade_level(&self) -> f32 {
        self.fade_pos
    }

    fn start_fade(&mut self, from: f32, to: f32, millis: f32) {
        self.fade_target = to;
        if millis.is_nan() || millis <= 0.0 {
            self.fade_pos = to;
            self.fade_step = 0.0;
            self.fade_samples_left = 0;
            return;
        }
        let samples = ((millis * self.config.sample_rate as f32 / 1000.0).round() as usize).max(1);
        self.fade_pos = from;
        self.fade_step = (to - from) / samples as f32;
        self.fade_samples_left = samples;
    }
}

/// Output buffer of a track
#[inline]
fn route(owner: u8, track_count: usize) -> usize {
    if track_count == 1 {
        0
    } else {
        (owner as usize).min(track_count - 1)
    }
}
