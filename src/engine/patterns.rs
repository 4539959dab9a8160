//! CGB lookup tables
//!
//! Square duty patterns, the noise key-to-frequency table and the two noise
//! bit sequences generated by the hardware LFSR.

use crate::sample::{NoisePattern, WaveDuty};

/// Period of the 15-bit noise register
pub const NOISE_FINE_LEN: usize = 32_767;

/// Period of the 7-bit noise register
pub const NOISE_ROUGH_LEN: usize = 127;

/// Square duty 12.5%
pub const SQUARE_12: [f32; 8] = [0.875, -0.125, -0.125, -0.125, -0.125, -0.125, -0.125, -0.125];
/// Square duty 25%
pub const SQUARE_25: [f32; 8] = [0.75, 0.75, -0.25, -0.25, -0.25, -0.25, -0.25, -0.25];
/// Square duty 50%
pub const SQUARE_50: [f32; 8] = [0.5, 0.5, 0.5, 0.5, -0.5, -0.5, -0.5, -0.5];
/// Square duty 75%
pub const SQUARE_75: [f32; 8] = [0.25, 0.25, 0.25, 0.25, 0.25, 0.25, -0.75, -0.75];

/// Noise clock in Hz for MIDI keys 21..=80
///
/// Keys below 21 use the first entry, keys above 80 the last.
#[allow(clippy::excessive_precision)]
#[rustfmt::skip]
pub const NOISE_KEY_TO_FREQ: [f32; 60] = [
    4.571428571428571, 5.333333333333333, 6.4, 8.0,
    9.142857142857142, 10.666666666666666, 12.8, 16.0,
    18.285714285714285, 21.333333333333332, 25.6, 32.0,
    36.57142857142857, 42.666666666666664, 51.2, 64.0,
    73.14285714285714, 85.33333333333333, 102.4, 128.0,
    146.28571428571428, 170.66666666666666, 204.8, 256.0,
    292.57142857142856, 341.3333333333333, 409.6, 512.0,
    585.1428571428571, 682.6666666666666, 819.2, 1024.0,
    1170.2857142857142, 1365.3333333333333, 1638.4, 2048.0,
    2340.5714285714284, 2730.6666666666665, 3276.8, 4096.0,
    4681.142857142857, 5461.333333333333, 6553.6, 8192.0,
    9362.285714285714, 10922.666666666666, 13107.2, 16384.0,
    18724.571428571428, 21845.333333333332, 26214.4, 32768.0,
    37449.142857142855, 43690.666666666664, 52428.8, 65536.0,
    87381.33333333333, 131072.0, 262144.0, 524288.0,
];

/// Duty pattern for a square channel
#[inline]
pub fn square_pattern(duty: WaveDuty) -> &'static [f32; 8] {
    match duty {
        WaveDuty::D12 => &SQUARE_12,
        WaveDuty::D25 => &SQUARE_25,
        WaveDuty::D50 => &SQUARE_50,
        WaveDuty::D75 => &SQUARE_75,
    }
}

/// Noise clock for a key
#[inline]
pub fn noise_freq(midi_key: u8) -> f32 {
    let index = (midi_key as i32 - 21).clamp(0, NOISE_KEY_TO_FREQ.len() as i32 - 1);
    NOISE_KEY_TO_FREQ[index as usize]
}

/// Packed output of one LFSR period
#[derive(Debug)]
pub struct NoiseSequence {
    words: Vec<u64>,
    len: usize,
}

impl NoiseSequence {
    /// Run a right-shifting LFSR for `len` steps
    ///
    /// Each step emits the bit shifted out; a set bit XORs `feedback` back in.
    fn generate(seed: u32, feedback: u32, len: usize) -> Self {
        let mut words = vec![0u64; (len + 63) / 64];
        let mut reg = seed;
        for i in 0..len {
            if reg & 1 == 1 {
                reg >>= 1;
                reg ^= feedback;
                words[i / 64] |= 1u64 << (i % 64);
            } else {
                reg >>= 1;
            }
        }
        Self { words, len }
    }

    /// Bit at position `index`, wrapping around the period
    #[inline]
    pub fn bit(&self, index: usize) -> bool {
        let i = index % self.len;
        self.words[i / 64] & (1u64 << (i % 64)) != 0
    }

    /// Period in bits
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; a sequence has at least one bit
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

static NOISE_FINE: std::sync::OnceLock<NoiseSequence> = std::sync::OnceLock::new();
static NOISE_ROUGH: std::sync::OnceLock<NoiseSequence> = std::sync::OnceLock::new();

/// Noise sequence for an LFSR width, generated on first use
pub fn noise_sequence(pattern: NoisePattern) -> &'static NoiseSequence {
    match pattern {
        NoisePattern::Fine => {
            NOISE_FINE.get_or_init(|| NoiseSequence::generate(0x4000, 0x6000, NOISE_FINE_LEN))
        }
        NoisePattern::Rough => {
            NOISE_ROUGH.get_or_init(|| NoiseSequence::generate(0x40, 0x60, NOISE_ROUGH_LEN))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smallest_period(seq: &NoiseSequence) -> usize {
        let len = seq.len();
        (1..=len)
            .find(|&p| len % p == 0 && (0..len).all(|i| seq.bit(i) == seq.bit(i + p)))
            .unwrap_or(len)
    }

    #[test]
    fn test_fine_noise_period() {
        let seq = noise_sequence(NoisePattern::Fine);
        assert_eq!(seq.len(), 32_767);
        assert_eq!(
            smallest_period(seq),
            32_767,
            "fine LFSR must not repeat before 32767 bits"
        );
    }

    #[test]
    fn test_rough_noise_period() {
        let seq = noise_sequence(NoisePattern::Rough);
        assert_eq!(seq.len(), 127);
        assert_eq!(smallest_period(seq), 127);
        // A maximal-length 7-bit register emits 64 ones per period
        let ones = (0..127).filter(|&i| seq.bit(i)).count();
        assert_eq!(ones, 64);
    }

    #[test]
    fn test_lfsr_continues_register_recurrence() {
        // Running the register one extra period from the seed lands on the seed again
        let mut reg = 0x40u32;
        for _ in 0..NOISE_ROUGH_LEN {
            if reg & 1 == 1 {
                reg = (reg >> 1) ^ 0x60;
            } else {
                reg >>= 1;
            }
        }
        assert_eq!(reg, 0x40);
    }

    #[test]
    fn test_square_patterns_are_zero_mean() {
        for duty in [WaveDuty::D12, WaveDuty::D25, WaveDuty::D50, WaveDuty::D75] {
            let sum: f32 = square_pattern(duty).iter().sum();
            assert!(sum.abs() < 1e-6, "{duty:?} pattern has DC offset {sum}");
        }
    }

    #[test]
    fn test_noise_freq_clamps() {
        assert_eq!(noise_freq(0), NOISE_KEY_TO_FREQ[0]);
        assert_eq!(noise_freq(21), NOISE_KEY_TO_FREQ[0]);
        assert_eq!(noise_freq(60), NOISE_KEY_TO_FREQ[39]);
        assert_eq!(noise_freq(127), NOISE_KEY_TO_FREQ[59]);
    }
}
