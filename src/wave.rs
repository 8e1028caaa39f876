use std::f64::consts::TAU;

use num_complex::Complex64;

use crate::error::SweepError;

/// One acquired channel's time-domain record: a fixed sample rate plus an
/// ordered run of real-valued samples. Immutable once constructed.
#[derive(Clone, Debug)]
pub struct Waveform {
    sample_rate_hz: f64,
    samples: Vec<f64>,
}

impl Waveform {
    pub fn new(sample_rate_hz: f64, samples: Vec<f64>) -> Result<Self, SweepError> {
        if !(sample_rate_hz > 0.0) || !sample_rate_hz.is_finite() {
            return Err(SweepError::invalid_waveform(format!(
                "sample rate must be positive, got {sample_rate_hz}"
            )));
        }
        Ok(Self {
            sample_rate_hz,
            samples,
        })
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Complex amplitude of this record's content at `frequency_hz`.
    ///
    /// Single-bin DFT (Goertzel-style accumulation): correlate the record
    /// against a complex exponential at the target frequency and normalize
    /// by the record length, so the magnitude is independent of N. For a
    /// pure sine of amplitude A the result has magnitude A/2. O(N) rather
    /// than the O(N log N) of a full transform; only one bin is ever needed
    /// per measurement point.
    pub fn value_at(&self, frequency_hz: f64) -> Result<Complex64, SweepError> {
        if self.samples.is_empty() {
            return Err(SweepError::invalid_waveform("empty record"));
        }
        if !(frequency_hz > 0.0) || !frequency_hz.is_finite() {
            return Err(SweepError::invalid_waveform(format!(
                "target frequency must be positive, got {frequency_hz}"
            )));
        }
        if self.sample_rate_hz <= 2.0 * frequency_hz {
            return Err(SweepError::invalid_waveform(format!(
                "sample rate {} Hz below Nyquist for {} Hz",
                self.sample_rate_hz, frequency_hz
            )));
        }
        let n = self.samples.len();
        let step = TAU * frequency_hz / self.sample_rate_hz;
        let mut acc = Complex64::new(0.0, 0.0);
        for (i, &sample) in self.samples.iter().enumerate() {
            let angle = step * i as f64;
            acc += Complex64::new(angle.cos(), -angle.sin()) * sample;
        }
        Ok(acc / n as f64)
    }
}
