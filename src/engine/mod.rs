//! MP2K sound engine
//!
//! Voices, their envelope and the block mixer that drives them.
//! - `envelope`: ADSR state machine and volume interpolation
//! - `pcm`: sampled voices (normal, compressed and synthesized)
//! - `cgb`: the four legacy Game Boy channels
//! - `patterns`: square duty tables and noise sequences
//! - `mixer`: per-track buffers, fades and reverb

pub mod cgb;
pub mod envelope;
pub mod mixer;
pub mod patterns;
pub mod pcm;

pub use cgb::CgbVoice;
pub use envelope::Envelope;
pub use mixer::SoundMixer;
pub use pcm::{PcmVoice, Playback};
