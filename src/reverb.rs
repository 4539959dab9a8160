//! Post-mix reverb
//!
//! Every variant keeps a circular stereo history sized in hardware DMA
//! buffers (one buffer is one frame of audio at the output rate) and mixes
//! delayed copies of it back into the signal in place.

use crate::config::{ReverbKind, AGB_FPS};

/// Golden Sun second-variant feedback factors
pub const GS2_FACTORS: (f32, f32) = (0.414_062_5, -0.0625);

/// Mario Golf: Advance Tour feedback factors
pub const MGAT_FACTORS: (f32, f32) = (0.25, -0.046_875);

/// Reverb state for one output buffer
#[derive(Debug, Clone)]
pub struct Reverb {
    kind: ReverbKind,
    intensity: f32,
    /// Interleaved stereo history
    history: Vec<f32>,
    frames_per_buffer: usize,
    pos: usize,
    pos2: usize,
}

impl Reverb {
    /// Create a reverb
    ///
    /// `intensity` is the driver value (0-127, scaled by 1/128) and
    /// `hw_buffers` the history length in hardware buffers.
    pub fn new(kind: ReverbKind, intensity: u8, sample_rate: u32, hw_buffers: u8) -> Self {
        let intensity = match kind {
            ReverbKind::None => 0.0,
            _ => intensity.min(0x7F) as f32 / 128.0,
        };
        let frames_per_buffer = ((sample_rate as f64 / AGB_FPS) as usize).max(1);
        let frames = frames_per_buffer * hw_buffers.max(1) as usize;
        Self {
            kind,
            intensity,
            history: vec![0.0; frames * 2],
            frames_per_buffer,
            pos: 0,
            pos2: frames_per_buffer % frames,
        }
    }

    /// Algorithm
    #[inline]
    pub fn kind(&self) -> ReverbKind {
        self.kind
    }

    /// Effective intensity (`0.0..1.0`)
    #[inline]
    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Frames in one hardware buffer
    #[inline]
    pub fn frames_per_buffer(&self) -> usize {
        self.frames_per_buffer
    }

    /// History length in frames
    #[inline]
    pub fn history_frames(&self) -> usize {
        self.history.len() / 2
    }

    /// Apply to an interleaved stereo buffer in place
    pub fn process(&mut self, buffer: &mut [f32]) {
        match self.kind {
            ReverbKind::None => {}
            ReverbKind::Normal => self.run(buffer, Self::normal_frame),
            ReverbKind::GoldenSun1 => self.run(buffer, Self::gs1_frame),
            ReverbKind::GoldenSun2 => self.run(buffer, |rev, frame| {
                rev.two_stage_frame(frame, GS2_FACTORS)
            }),
            ReverbKind::Mgat => self.run(buffer, |rev, frame| {
                rev.two_stage_frame(frame, MGAT_FACTORS)
            }),
            ReverbKind::Test => self.run(buffer, Self::test_frame),
        }
    }

    fn run<F>(&mut self, buffer: &mut [f32], mut per_frame: F)
    where
        F: FnMut(&mut Self, &mut [f32]),
    {
        let frames = self.history_frames();
        for frame in buffer.chunks_exact_mut(2) {
            per_frame(self, frame);
            self.pos += 1;
            if self.pos >= frames {
                self.pos = 0;
            }
            self.pos2 += 1;
            if self.pos2 >= frames {
                self.pos2 = 0;
            }
        }
    }

    #[inline]
    fn tap(&self, pos: usize) -> (f32, f32) {
        (self.history[pos * 2], self.history[pos * 2 + 1])
    }

    #[inline]
    fn store(&mut self, left: f32, right: f32) {
        self.history[self.pos * 2] = left;
        self.history[self.pos * 2 + 1] = right;
    }

    /// Two taps one hardware buffer apart, averaged over both channels
    fn normal_frame(&mut self, frame: &mut [f32]) {
        let (al, ar) = self.tap(self.pos);
        let (bl, br) = self.tap(self.pos2);
        let rev = (al + ar + bl + br) * self.intensity * 0.25;
        frame[0] += rev;
        frame[1] += rev;
        self.store(frame[0], frame[1]);
    }

    /// One delay line fed back across channels
    fn gs1_frame(&mut self, frame: &mut [f32]) {
        let (dl, dr) = self.tap(self.pos);
        frame[0] += dr * self.intensity;
        frame[1] += dl * self.intensity;
        self.store(frame[0], frame[1]);
    }

    /// Primary tap on the full history, secondary tap crossed from one buffer later
    fn two_stage_frame(&mut self, frame: &mut [f32], (primary, secondary): (f32, f32)) {
        let (pl, pr) = self.tap(self.pos);
        let (sl, sr) = self.tap(self.pos2);
        let rev_l = pl * primary + sr * secondary;
        let rev_r = pr * primary + sl * secondary;
        let (in_l, in_r) = (frame[0], frame[1]);
        frame[0] = in_l + rev_l * self.intensity;
        frame[1] = in_r + rev_r * self.intensity;
        self.store(in_l + rev_l, in_r + rev_r);
    }

    /// Record without touching the signal
    fn test_frame(&mut self, frame: &mut [f32]) {
        self.store(frame[0], frame[1]);
    }
}
