//! ADSR envelope processor
//!
//! The driver updates envelopes once per frame. The mixer renders each frame
//! as `sub_steps` sub-blocks and steps the envelope once per sub-block, so
//! every state transition happens on every `sub_steps`-th step and the level
//! in between is interpolated linearly.
//!
//! Levels are 8-bit (`0..=0xFF`). Decay and release are multiplicative
//! (`level * rate >> 8`), attack is additive.

use crate::types::{Adsr, ChnVol, EnvState, Note, VolumeRamp};

/// Left/right target volume for a velocity, track volume and combined pan
///
/// `pan` is clamped to `-64..=63`; each side is `velocity * volume * (64 ∓ pan) / 8192`.
pub fn stereo_volume(velocity: u8, volume: u8, pan: i32) -> (u8, u8) {
    let pan = pan.clamp(-64, 63);
    let base = velocity as i32 * volume as i32;
    let left = base * (64 - pan) / 8192;
    let right = base * (pan + 64) / 8192;
    (left.min(0xFF) as u8, right.min(0xFF) as u8)
}

/// Count down a held note, releasing the envelope when it runs out
///
/// Returns whether the note is still held afterwards.
pub fn tick_note(envelope: &mut Envelope, note: &mut Note) -> crate::Result<bool> {
    if !envelope.is_held() {
        return Ok(false);
    }
    let held = note.tick()?;
    if !held {
        envelope.release();
    }
    Ok(held)
}

/// Per-voice envelope state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    adsr: Adsr,
    state: EnvState,
    level: u8,
    from_level: u8,
    inter_step: u8,
    sub_steps: u8,
}

impl Envelope {
    /// Create an envelope in [`EnvState::Init`]
    pub fn new(adsr: Adsr, sub_steps: u8) -> Self {
        Self {
            adsr,
            state: EnvState::Init,
            level: 0,
            from_level: 0,
            inter_step: 0,
            sub_steps: sub_steps.max(1),
        }
    }

    /// Restart with new rates (CGB slots are reused between notes)
    pub fn restart(&mut self, adsr: Adsr) {
        *self = Self::new(adsr, self.sub_steps);
    }

    /// Envelope rates
    #[inline]
    pub fn adsr(&self) -> Adsr {
        self.adsr
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> EnvState {
        self.state
    }

    /// Level reached at the end of the current frame
    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Level at the start of the current frame
    #[inline]
    pub fn from_level(&self) -> u8 {
        self.from_level
    }

    /// Sub-steps per frame
    #[inline]
    pub fn sub_steps(&self) -> u8 {
        self.sub_steps
    }

    /// Sub-step within the current frame
    #[inline]
    pub fn inter_step(&self) -> u8 {
        self.inter_step
    }

    /// True while the voice accepts volume and pitch changes
    #[inline]
    pub fn is_held(&self) -> bool {
        self.state < EnvState::Rel
    }

    /// True once the voice is silent for good
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.state == EnvState::Dead
    }

    /// Enter the release phase (no-op once released)
    pub fn release(&mut self) {
        if self.state < EnvState::Rel {
            self.state = EnvState::Rel;
        }
    }

    /// Silence immediately
    pub fn kill(&mut self) {
        self.state = EnvState::Dead;
        self.inter_step = 0;
    }

    /// Advance by one sub-step
    ///
    /// Leaving [`EnvState::Init`] anchors the volume ramp at its current target.
    pub fn step(&mut self, ramp: &mut VolumeRamp) {
        match self.state {
            EnvState::Init => {
                ramp.settle();
                self.from_level = if self.adsr.att == 0xFF { 0xFF } else { 0 };
                self.level = self.adsr.att;
                self.inter_step = 0;
                self.state = EnvState::Atk;
            }
            EnvState::Atk => {
                if self.next_frame() {
                    let new_level = self.level as u32 + self.adsr.att as u32;
                    if new_level >= 0xFF {
                        self.state = EnvState::Dec;
                        self.level = 0xFF;
                    } else {
                        self.level = new_level as u8;
                    }
                }
            }
            EnvState::Dec => {
                if self.next_frame() {
                    let new_level = (self.level as u32 * self.adsr.dec as u32) >> 8;
                    if new_level <= self.adsr.sus as u32 {
                        self.state = EnvState::Sus;
                        self.level = self.adsr.sus;
                    } else {
                        self.level = new_level as u8;
                    }
                }
            }
            EnvState::Sus => {
                self.next_frame();
            }
            EnvState::Rel => {
                if self.next_frame() {
                    let new_level = (self.level as u32 * self.adsr.rel as u32) >> 8;
                    if new_level == 0 {
                        self.state = EnvState::Die;
                        self.level = 0;
                    } else {
                        self.level = new_level as u8;
                    }
                }
            }
            EnvState::Die => {
                self.inter_step = self.inter_step.saturating_add(1);
                if self.inter_step >= self.sub_steps {
                    self.from_level = self.level;
                    self.state = EnvState::Dead;
                }
            }
            EnvState::Dead => {}
        }
    }

    /// Count one sub-step; on a frame boundary re-anchor and report it
    fn next_frame(&mut self) -> bool {
        self.inter_step += 1;
        if self.inter_step >= self.sub_steps {
            self.from_level = self.level;
            self.inter_step = 0;
            true
        } else {
            false
        }
    }

    /// Envelope value at the start and end of the current sub-step
    pub fn interpolated(&self) -> (f32, f32) {
        let base = self.from_level as f32;
        let delta = (self.level as f32 - base) / self.sub_steps as f32;
        (
            base + delta * self.inter_step as f32,
            base + delta * (self.inter_step as f32 + 1.0),
        )
    }

    /// Channel volume for the current sub-step
    ///
    /// `volume * envelope / 65536` at both ends, ramping from the previous
    /// boundary's volume to the current target.
    pub fn volume(&self, ramp: &VolumeRamp) -> ChnVol {
        let (from_env, to_env) = self.interpolated();
        const SCALE: f32 = 1.0 / 65536.0;
        ChnVol {
            from_left: ramp.from_left as f32 * from_env * SCALE,
            from_right: ramp.from_right as f32 * from_env * SCALE,
            to_left: ramp.left as f32 * to_env * SCALE,
            to_right: ramp.right as f32 * to_env * SCALE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stepped(adsr: Adsr, steps: usize) -> Envelope {
        let mut env = Envelope::new(adsr, 4);
        let mut ramp = VolumeRamp::default();
        for _ in 0..steps {
            env.step(&mut ramp);
        }
        env
    }

    #[test]
    fn test_instant_attack_to_sustain() {
        let adsr = Adsr::new(0xFF, 0, 0xFF, 0x80);

        let env = stepped(adsr, 1);
        assert_eq!(env.state(), EnvState::Atk);
        assert_eq!(env.level(), 0xFF);
        assert_eq!(env.from_level(), 0xFF);

        // One frame later the attack saturates
        let env = stepped(adsr, 1 + 4);
        assert_eq!(env.state(), EnvState::Dec);
        assert_eq!(env.level(), 0xFF);

        // Decay rate 0 drops below sustain immediately and clamps to it
        let env = stepped(adsr, 1 + 8);
        assert_eq!(env.state(), EnvState::Sus);
        assert_eq!(env.level(), 0xFF);
    }

    #[test]
    fn test_slow_attack_ramps_up() {
        let adsr = Adsr::new(0x40, 0xFF, 0x80, 0x80);
        let env = stepped(adsr, 1);
        assert_eq!(env.from_level(), 0);
        assert_eq!(env.level(), 0x40);

        let env = stepped(adsr, 1 + 4);
        assert_eq!(env.state(), EnvState::Atk);
        assert_eq!(env.from_level(), 0x40);
        assert_eq!(env.level(), 0x80);
    }

    #[test]
    fn test_release_terminates() {
        let adsr = Adsr::new(0xFF, 0, 0xFF, 0x80);
        let mut env = Envelope::new(adsr, 4);
        let mut ramp = VolumeRamp::default();
        for _ in 0..9 {
            env.step(&mut ramp);
        }
        assert_eq!(env.level(), 0xFF);
        env.release();

        // 255 -> 127 -> 63 -> 31 -> 15 -> 7 -> 3 -> 1 -> 0: eight frames, then one frame dying
        let mut steps = 0;
        while !env.is_dead() {
            env.step(&mut ramp);
            steps += 1;
            assert!(steps <= 9 * 4, "release did not finish in time");
        }
        assert_eq!(env.level(), 0);
        assert!(steps > 8 * 4, "release finished too early after {steps} steps");
    }

    #[test]
    fn test_release_is_sticky() {
        let mut env = Envelope::new(Adsr::new(0xFF, 0xFF, 0xFF, 0), 4);
        let mut ramp = VolumeRamp::default();
        env.step(&mut ramp);
        env.release();
        env.release();
        assert_eq!(env.state(), EnvState::Rel);
        // Release rate 0 drops straight to zero
        for _ in 0..4 {
            env.step(&mut ramp);
        }
        assert_eq!(env.state(), EnvState::Die);
        env.release();
        assert_eq!(env.state(), EnvState::Die);
    }

    #[test]
    fn test_kill_is_immediate() {
        let mut env = stepped(Adsr::new(0xFF, 0xFF, 0xFF, 0xFF), 3);
        env.kill();
        assert!(env.is_dead());
        let mut ramp = VolumeRamp::default();
        env.step(&mut ramp);
        assert!(env.is_dead());
    }

    #[test]
    fn test_levels_stay_in_range() {
        let rates = [0u8, 1, 0x10, 0x7F, 0x80, 0xC0, 0xFE, 0xFF];
        for &att in &rates {
            for &dec in &rates {
                for &sus in &rates {
                    for &rel in &rates {
                        let mut env = Envelope::new(Adsr::new(att, dec, sus, rel), 4);
                        let mut ramp = VolumeRamp::default();
                        for step in 0..200 {
                            if step == 120 {
                                env.release();
                            }
                            env.step(&mut ramp);
                            let (from, to) = env.interpolated();
                            assert!((0.0..=255.0).contains(&from));
                            assert!((0.0..=255.0).contains(&to));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_interpolation_reaches_target_at_frame_end() {
        let mut env = Envelope::new(Adsr::new(0x40, 0xFF, 0x80, 0x80), 4);
        let mut ramp = VolumeRamp::default();
        env.step(&mut ramp);
        for _ in 0..3 {
            env.step(&mut ramp);
        }
        // Last sub-step of the first frame ends exactly on the target level
        assert_eq!(env.inter_step(), 3);
        let (_, to) = env.interpolated();
        assert!((to - env.level() as f32).abs() < 1e-4);
    }

    #[test]
    fn test_stereo_volume_pan_law() {
        assert_eq!(stereo_volume(127, 127, 0), (126, 126));
        assert_eq!(stereo_volume(127, 127, -64), (252, 0));
        // Pan is clamped before the split
        assert_eq!(stereo_volume(127, 127, 100), stereo_volume(127, 127, 63));
        assert_eq!(stereo_volume(0, 127, 10), (0, 0));
    }

    #[test]
    fn test_tick_note_releases_at_zero() {
        let mut env = Envelope::new(Adsr::new(0xFF, 0, 0xFF, 0x80), 4);
        let mut note = Note::new(60, 127, 2);
        assert!(tick_note(&mut env, &mut note).unwrap());
        assert!(!tick_note(&mut env, &mut note).unwrap());
        assert_eq!(env.state(), EnvState::Rel);
        // Released notes are no longer counted and never fault
        assert!(!tick_note(&mut env, &mut note).unwrap());
    }

    #[test]
    fn test_volume_uses_ramp_corners() {
        let mut env = Envelope::new(Adsr::new(0xFF, 0, 0xFF, 0), 4);
        let mut ramp = VolumeRamp {
            from_left: 0,
            from_right: 0,
            left: 64,
            right: 32,
        };
        env.step(&mut ramp);
        // Init anchored the ramp at the target
        assert_eq!(ramp.from_left, 64);
        let vol = env.volume(&ramp);
        assert!((vol.from_left - 64.0 * 255.0 / 65536.0).abs() < 1e-6);
        assert!((vol.to_right - 32.0 * 255.0 / 65536.0).abs() < 1e-6);
    }
}
