//! Resampling strategies for sampled voices
//!
//! A [`Resampler`] turns a source stream read at a fractional rate into a
//! fixed number of output samples. Source samples are pulled lazily from a
//! [`SampleSource`] into the resampler's own fetch buffer; only as many as
//! the kernel needs ahead of the read cursor are requested.
//!
//! The band-limited kernels (sinc, BLEP, BLAMP) share one set of tables built
//! on first use: a Blackman-windowed sinc, its integral (step response) and
//! its second integral (ramp response).

use crate::config::ResamplerKind;

/// Half width of the band-limited kernels in source samples
pub const KERNEL_HALF_WIDTH: usize = 16;

/// Table resolution (points per source sample)
const TABLE_RES: usize = 512;

/// Tables cover `[-TABLE_EXTENT, TABLE_EXTENT]`
const TABLE_EXTENT: f64 = (KERNEL_HALF_WIDTH + 2) as f64;

/// Provider of source samples
pub trait SampleSource {
    /// Append samples to `buf` until it holds at least `required` entries
    ///
    /// Returns `false` once the stream is exhausted; the missing tail is then
    /// zero-filled so `buf.len() >= required` holds either way.
    fn fetch(&mut self, buf: &mut Vec<f32>, required: usize) -> bool;
}

/// Windowed sinc with its first and second integrals
struct KernelTables {
    impulse: Vec<f64>,
    step: Vec<f64>,
    ramp: Vec<f64>,
}

impl KernelTables {
    fn new() -> Self {
        let points = (2.0 * TABLE_EXTENT * TABLE_RES as f64) as usize + 1;
        let dx = 1.0 / TABLE_RES as f64;
        let x_at = |i: usize| -TABLE_EXTENT + i as f64 * dx;

        let impulse: Vec<f64> = (0..points).map(|i| windowed_sinc(x_at(i))).collect();

        let mut step = vec![0.0; points];
        for i in 1..points {
            step[i] = step[i - 1] + (impulse[i - 1] + impulse[i]) * 0.5 * dx;
        }
        let total = step[points - 1];
        if total > 0.0 {
            step.iter_mut().for_each(|v| *v /= total);
        }

        let mut ramp = vec![0.0; points];
        for i in 1..points {
            ramp[i] = ramp[i - 1] + (step[i - 1] + step[i]) * 0.5 * dx;
        }

        Self {
            impulse,
            step,
            ramp,
        }
    }

    #[inline]
    fn lookup(table: &[f64], x: f64) -> Option<f64> {
        let pos = (x + TABLE_EXTENT) * TABLE_RES as f64;
        if pos < 0.0 {
            return None;
        }
        let i = pos as usize;
        if i + 1 >= table.len() {
            return None;
        }
        let frac = pos - i as f64;
        Some(table[i] + (table[i + 1] - table[i]) * frac)
    }

    #[inline]
    fn impulse_at(&self, x: f64) -> f64 {
        Self::lookup(&self.impulse, x).unwrap_or(0.0)
    }

    #[inline]
    fn step_at(&self, x: f64) -> f64 {
        match Self::lookup(&self.step, x) {
            Some(v) => v,
            None if x < 0.0 => 0.0,
            None => 1.0,
        }
    }

    #[inline]
    fn ramp_at(&self, x: f64) -> f64 {
        match Self::lookup(&self.ramp, x) {
            Some(v) => v,
            None if x < 0.0 => 0.0,
            None => {
                let last = self.ramp.len() - 1;
                self.ramp[last] + (x - TABLE_EXTENT)
            }
        }
    }
}

fn windowed_sinc(x: f64) -> f64 {
    let half = KERNEL_HALF_WIDTH as f64;
    if x.abs() >= half {
        return 0.0;
    }
    let sinc = if x.abs() < 1e-12 {
        1.0
    } else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    };
    let w = std::f64::consts::PI * x / half;
    let blackman = 0.42 + 0.5 * w.cos() + 0.08 * (2.0 * w).cos();
    sinc * blackman
}

static KERNEL_TABLES: std::sync::OnceLock<KernelTables> = std::sync::OnceLock::new();

fn kernel_tables() -> &'static KernelTables {
    KERNEL_TABLES.get_or_init(KernelTables::new)
}

/// Stateful resampler, one per voice
#[derive(Debug, Clone)]
pub struct Resampler {
    kind: ResamplerKind,
    phase: f32,
    fetch_buffer: Vec<f32>,
    primed: bool,
}

impl Resampler {
    /// Create a resampler of the given kind
    pub fn new(kind: ResamplerKind) -> Self {
        Self {
            kind,
            phase: 0.0,
            fetch_buffer: Vec::with_capacity(64),
            primed: false,
        }
    }

    /// Algorithm in use
    #[inline]
    pub fn kind(&self) -> ResamplerKind {
        self.kind
    }

    /// Fractional read position between source samples
    #[inline]
    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Fill `out` reading the source at `phase_inc` source samples per output sample
    ///
    /// Always writes every element of `out`. Returns `false` if the source ran
    /// dry; the samples past its end are silence.
    pub fn process<S: SampleSource + ?Sized>(
        &mut self,
        out: &mut [f32],
        phase_inc: f32,
        source: &mut S,
    ) -> bool {
        if out.is_empty() {
            return true;
        }
        let ahead = (self.phase + phase_inc * out.len() as f32) as usize;
        match self.kind {
            ResamplerKind::Nearest => {
                let running = source.fetch(&mut self.fetch_buffer, ahead + 1);
                self.run(out, phase_inc, |buf, fi, _| at(buf, fi));
                running
            }
            ResamplerKind::Linear => {
                let running = source.fetch(&mut self.fetch_buffer, ahead + 2);
                self.run(out, phase_inc, |buf, fi, phase| {
                    let a = at(buf, fi);
                    let b = at(buf, fi + 1);
                    a + (b - a) * phase
                });
                running
            }
            ResamplerKind::Sinc | ResamplerKind::Blep | ResamplerKind::Blamp => {
                if !self.primed {
                    self.fetch_buffer.resize(KERNEL_HALF_WIDTH, 0.0);
                    self.primed = true;
                }
                let running =
                    source.fetch(&mut self.fetch_buffer, ahead + 2 * KERNEL_HALF_WIDTH + 2);
                let tables = kernel_tables();
                let cutoff = (1.0 / phase_inc as f64).min(1.0);
                let kind = self.kind;
                self.run(out, phase_inc, |buf, fi, phase| {
                    band_limited(kind, tables, cutoff, buf, fi, phase as f64)
                });
                running
            }
        }
    }

    /// Walk the cursor across `out`, then drop the consumed source samples
    fn run<F>(&mut self, out: &mut [f32], phase_inc: f32, kernel: F)
    where
        F: Fn(&[f32], usize, f32) -> f32,
    {
        let mut fi = 0usize;
        let mut phase = self.phase;
        for sample in out.iter_mut() {
            *sample = kernel(&self.fetch_buffer, fi, phase);
            phase += phase_inc;
            let whole = phase as usize;
            fi += whole;
            phase -= whole as f32;
        }
        self.phase = phase;
        let consumed = fi.min(self.fetch_buffer.len());
        self.fetch_buffer.drain(..consumed);
    }
}

#[inline]
fn at(buf: &[f32], index: usize) -> f32 {
    buf.get(index).copied().unwrap_or(0.0)
}

/// One output sample from a band-limited kernel
///
/// `buf[fi + KERNEL_HALF_WIDTH]` is the sample at or just before the cursor.
fn band_limited(
    kind: ResamplerKind,
    tables: &KernelTables,
    cutoff: f64,
    buf: &[f32],
    fi: usize,
    phase: f64,
) -> f32 {
    let half = KERNEL_HALF_WIDTH as i64;
    let mut acc = 0.0f64;
    let mut weight_sum = 0.0f64;
    for j in -half..=half + 1 {
        let u = phase - j as f64;
        let weight = match kind {
            ResamplerKind::Sinc => cutoff * tables.impulse_at(cutoff * u),
            ResamplerKind::Blep => tables.step_at(cutoff * u) - tables.step_at(cutoff * (u - 1.0)),
            _ => {
                (tables.ramp_at(cutoff * (u + 1.0)) - 2.0 * tables.ramp_at(cutoff * u)
                    + tables.ramp_at(cutoff * (u - 1.0)))
                    / cutoff
            }
        };
        let index = (fi as i64 + half + j) as usize;
        acc += weight * at(buf, index) as f64;
        weight_sum += weight;
    }
    if weight_sum.abs() > 1e-9 {
        (acc / weight_sum) as f32
    } else {
        acc as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ramp source 0, 1, 2, ... with optional end
    struct Counter {
        next: usize,
        end: Option<usize>,
    }

    impl SampleSource for Counter {
        fn fetch(&mut self, buf: &mut Vec<f32>, required: usize) -> bool {
            while buf.len() < required {
                match self.end {
                    Some(end) if self.next >= end => {
                        buf.resize(required, 0.0);
                        return false;
                    }
                    _ => {
                        buf.push(self.next as f32);
                        self.next += 1;
                    }
                }
            }
            true
        }
    }

    struct Constant(f32);

    impl SampleSource for Constant {
        fn fetch(&mut self, buf: &mut Vec<f32>, required: usize) -> bool {
            buf.resize(buf.len().max(required), self.0);
            true
        }
    }

    const ALL: [ResamplerKind; 5] = [
        ResamplerKind::Nearest,
        ResamplerKind::Linear,
        ResamplerKind::Sinc,
        ResamplerKind::Blep,
        ResamplerKind::Blamp,
    ];

    #[test]
    fn test_nearest_holds_samples() {
        let mut rs = Resampler::new(ResamplerKind::Nearest);
        let mut src = Counter { next: 0, end: None };
        let mut out = [0.0; 8];
        assert!(rs.process(&mut out, 0.5, &mut src));
        assert_eq!(out, [0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_linear_interpolates() {
        let mut rs = Resampler::new(ResamplerKind::Linear);
        let mut src = Counter { next: 0, end: None };
        let mut out = [0.0; 6];
        assert!(rs.process(&mut out, 0.25, &mut src));
        for (i, v) in out.iter().enumerate() {
            approx::assert_abs_diff_eq!(*v, i as f32 * 0.25, epsilon = 1e-6);
        }
        // Continues seamlessly in the next call
        let mut out = [0.0; 2];
        assert!(rs.process(&mut out, 0.25, &mut src));
        approx::assert_abs_diff_eq!(out[0], 1.5, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(out[1], 1.75, epsilon = 1e-6);
    }

    #[test]
    fn test_output_length_with_exhaustion() {
        for kind in ALL {
            for &rate in &[0.1f32, 0.75, 1.0, 2.5, 7.0] {
                let mut rs = Resampler::new(kind);
                let mut src = Counter {
                    next: 0,
                    end: Some(10),
                };
                let mut out = vec![f32::NAN; 300];
                let running = rs.process(&mut out, rate, &mut src);
                assert!(out.iter().all(|v| v.is_finite()), "{kind} left gaps");
                let needed = (rate * 300.0) as usize;
                if needed > 10 {
                    assert!(!running, "{kind} at {rate} should report exhaustion");
                }
            }
        }
    }

    #[test]
    fn test_silence_after_exhaustion_nearest() {
        let mut rs = Resampler::new(ResamplerKind::Nearest);
        let mut src = Counter {
            next: 1,
            end: Some(5),
        };
        let mut out = [9.0; 10];
        assert!(!rs.process(&mut out, 1.0, &mut src));
        assert_eq!(&out[..4], &[1.0, 2.0, 3.0, 4.0]);
        assert!(out[4..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_band_limited_dc_gain() {
        for kind in [ResamplerKind::Sinc, ResamplerKind::Blep, ResamplerKind::Blamp] {
            for &rate in &[0.3f32, 1.0, 3.0] {
                let mut rs = Resampler::new(kind);
                let mut src = Constant(0.5);
                let mut out = vec![0.0; 512];
                rs.process(&mut out, rate, &mut src);
                // Past the zero history the kernel sees a constant input
                let settled = &out[(40.0 / rate) as usize + 1..];
                for v in settled {
                    approx::assert_abs_diff_eq!(*v, 0.5, epsilon = 1e-3);
                }
            }
        }
    }

    #[test]
    fn test_sinc_passes_integer_positions() {
        let mut rs = Resampler::new(ResamplerKind::Sinc);
        let mut src = Counter { next: 0, end: None };
        let mut out = vec![0.0; 64];
        rs.process(&mut out, 1.0, &mut src);
        // At unit rate and zero phase the sinc is a delta
        for (i, v) in out.iter().enumerate() {
            approx::assert_abs_diff_eq!(*v, i as f32, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_deterministic() {
        for kind in ALL {
            let render = || {
                let mut rs = Resampler::new(kind);
                let mut src = Counter {
                    next: 0,
                    end: Some(100),
                };
                let mut out = vec![0.0; 77];
                rs.process(&mut out, 1.37, &mut src);
                out
            };
            assert_eq!(render(), render());
        }
    }

    #[test]
    fn test_empty_output_fetches_nothing() {
        let mut rs = Resampler::new(ResamplerKind::Linear);
        let mut src = Counter {
            next: 0,
            end: Some(0),
        };
        assert!(rs.process(&mut [], 1.0, &mut src));
        assert_eq!(src.next, 0);
    }
}
