//! Borrowed sample data and CGB waveform definitions
//!
//! Sample data is never copied: a [`SampleDescriptor`] is a view into memory
//! owned by whoever loaded the ROM, and every voice playing it borrows it for
//! the lifetime `'a`.

use bitflags::bitflags;
use nom::{number::complete::le_u32, sequence::tuple, IResult};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::{Result, SynthError};

/// Size of the MP2K sample header preceding the sample data
pub const SAMPLE_HEADER_SIZE: usize = 16;

/// Size of a CGB wave channel table in bytes (32 nibbles)
pub const WAVE_TABLE_SIZE: usize = 16;

/// End offsets at or above this value mark 4-bit compressed data
pub const COMPRESSED_END_MARKER: u32 = 0x8000_0000;

bitflags! {
    /// Flag word at the start of an MP2K sample header
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SampleFlags: u32 {
        /// Sample loops from its loop start
        const LOOP = 0x4000_0000;
    }
}

/// Descriptor for a block of signed 8-bit sample data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleDescriptor<'a> {
    /// Raw sample bytes (interpreted as `i8`), starting at sample 0
    pub data: &'a [u8],
    /// Playback frequency for MIDI key 60
    pub mid_c_freq: f32,
    /// Loop flag
    pub loop_enabled: bool,
    /// Loop start in samples
    pub loop_pos: u32,
    /// End offset in samples; bit 31 marks compressed data
    pub end_pos: u32,
}

impl<'a> SampleDescriptor<'a> {
    /// Create a descriptor from its raw fields
    pub fn new(
        data: &'a [u8],
        mid_c_freq: f32,
        loop_enabled: bool,
        loop_pos: u32,
        end_pos: u32,
    ) -> Self {
        Self {
            data,
            mid_c_freq,
            loop_enabled,
            loop_pos,
            end_pos,
        }
    }

    /// Parse a sample header followed by its data
    ///
    /// Layout (little-endian): flags, frequency in 1/1024 Hz, loop start,
    /// end offset, then the sample bytes.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let (data, (flags, freq, loop_pos, end_pos)) = sample_header(bytes).map_err(|_| {
            SynthError::ParseError(format!(
                "sample header needs {} bytes, got {}",
                SAMPLE_HEADER_SIZE,
                bytes.len()
            ))
        })?;
        let flags = SampleFlags::from_bits_truncate(flags);

        Ok(Self {
            data,
            mid_c_freq: freq as f32 / 1024.0,
            loop_enabled: flags.contains(SampleFlags::LOOP),
            loop_pos,
            end_pos,
        })
    }

    /// True if the end offset carries the compressed marker
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.end_pos >= COMPRESSED_END_MARKER
    }

    /// True for the synthesized pulse/saw/triangle instruments
    #[inline]
    pub fn is_special_synth(&self) -> bool {
        self.loop_enabled && self.loop_pos == 0 && self.end_pos == 0
    }
}

fn sample_header(input: &[u8]) -> IResult<&[u8], (u32, u32, u32, u32)> {
    tuple((le_u32, le_u32, le_u32, le_u32))(input)
}

/// Hardware CGB channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum CgbKind {
    /// Square channel 1 (with sweep on hardware)
    Square1 = 0,
    /// Square channel 2
    Square2,
    /// Wave channel
    Wave,
    /// Noise channel
    Noise,
}

impl CgbKind {
    /// Map an MP2K instrument type byte to its channel
    ///
    /// Types 1-4 and their fixed-pitch variants 9-12 are CGB instruments.
    pub fn from_instrument_type(ty: u8) -> Option<Self> {
        match ty & 0x07 {
            t @ 1..=4 => CgbKind::from_u8(t - 1),
            _ => None,
        }
    }

    /// Slot index in the mixer
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Square channel duty cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive)]
pub enum WaveDuty {
    /// 12.5%
    D12 = 0,
    /// 25%
    D25,
    /// 50%
    #[default]
    D50,
    /// 75%
    D75,
}

impl WaveDuty {
    /// Duty from the low two bits of an instrument parameter
    pub fn from_bits(bits: u8) -> Self {
        WaveDuty::from_u8(bits & 0x03).unwrap_or_default()
    }
}

/// Noise channel LFSR width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, FromPrimitive)]
pub enum NoisePattern {
    /// 15-bit register
    #[default]
    Fine = 0,
    /// 7-bit register
    Rough,
}

impl NoisePattern {
    /// Pattern from the low bit of an instrument parameter
    pub fn from_bits(bits: u8) -> Self {
        NoisePattern::from_u8(bits & 0x01).unwrap_or_default()
    }
}

/// Waveform definition for a CGB note, tagged by channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgbDef<'a> {
    /// Square channel 1 with its duty
    Square1(WaveDuty),
    /// Square channel 2 with its duty
    Square2(WaveDuty),
    /// Wave channel with its 32-nibble table
    Wave(&'a [u8; WAVE_TABLE_SIZE]),
    /// Noise channel with its LFSR width
    Noise(NoisePattern),
}

impl<'a> CgbDef<'a> {
    /// Channel this definition plays on
    pub fn kind(&self) -> CgbKind {
        match self {
            CgbDef::Square1(_) => CgbKind::Square1,
            CgbDef::Square2(_) => CgbKind::Square2,
            CgbDef::Wave(_) => CgbKind::Wave,
            CgbDef::Noise(_) => CgbKind::Noise,
        }
    }

    /// Wave channel definition from the first 16 bytes of a slice
    pub fn wave_from_bytes(bytes: &'a [u8]) -> Result<Self> {
        bytes
            .get(..WAVE_TABLE_SIZE)
            .and_then(|table| <&[u8; WAVE_TABLE_SIZE]>::try_from(table).ok())
            .map(CgbDef::Wave)
            .ok_or_else(|| {
                SynthError::ParseError(format!(
                    "wave table needs {} bytes, got {}",
                    WAVE_TABLE_SIZE,
                    bytes.len()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(flags: u32, freq: u32, loop_pos: u32, end: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        for word in [flags, freq, loop_pos, end] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_parse_sample_header() {
        let mut bytes = header(0x4000_0000, 13_379 * 1024, 4, 8);
        bytes.extend_from_slice(&[0, 10, 20, 30, 40, 50, 60, 70]);

        let desc = SampleDescriptor::parse(&bytes).unwrap();
        assert!(desc.loop_enabled);
        assert_eq!(desc.loop_pos, 4);
        assert_eq!(desc.end_pos, 8);
        assert_eq!(desc.data.len(), 8);
        assert!((desc.mid_c_freq - 13_379.0).abs() < 1e-3);
        assert!(!desc.is_compressed());
        assert!(!desc.is_special_synth());
    }

    #[test]
    fn test_parse_rejects_short_header() {
        let bytes = [0u8; 12];
        assert!(matches!(
            SampleDescriptor::parse(&bytes),
            Err(SynthError::ParseError(_))
        ));
    }

    #[test]
    fn test_markers() {
        let data = [0u8; 8];
        let synth = SampleDescriptor::new(&data, 0.0, true, 0, 0);
        assert!(synth.is_special_synth());

        let compressed = SampleDescriptor::new(&data, 0.0, false, 0, 16u32.wrapping_neg());
        assert!(compressed.is_compressed());
    }

    #[test]
    fn test_instrument_type_mapping() {
        assert_eq!(CgbKind::from_instrument_type(0x01), Some(CgbKind::Square1));
        assert_eq!(CgbKind::from_instrument_type(0x0A), Some(CgbKind::Square2));
        assert_eq!(CgbKind::from_instrument_type(0x03), Some(CgbKind::Wave));
        assert_eq!(CgbKind::from_instrument_type(0x0C), Some(CgbKind::Noise));
        assert_eq!(CgbKind::from_instrument_type(0x00), None);
        assert_eq!(CgbKind::from_instrument_type(0x08), None);
    }

    #[test]
    fn test_wave_from_bytes() {
        let table: Vec<u8> = (0..20).collect();
        let def = CgbDef::wave_from_bytes(&table).unwrap();
        assert_eq!(def.kind(), CgbKind::Wave);
        match def {
            CgbDef::Wave(t) => assert_eq!(t[15], 15),
            _ => panic!("expected wave definition"),
        }
        assert!(CgbDef::wave_from_bytes(&table[..10]).is_err());
    }

    #[test]
    fn test_duty_and_noise_bits() {
        assert_eq!(WaveDuty::from_bits(0x06), WaveDuty::D50);
        assert_eq!(NoisePattern::from_bits(0x01), NoisePattern::Rough);
        assert_eq!(CgbDef::Square2(WaveDuty::D75).kind(), CgbKind::Square2);
    }
}
