use serde::{Deserialize, Serialize};

use crate::error::SweepError;

/// Analysis window used by the transfer extraction, and the record length
/// requested from the digitizer. Kept explicit in the config so the slice
/// taken out of each capture is never a hidden constant.
pub const DEFAULT_WINDOW_LEN: usize = 1024;

/// Default sampling ratio: samples captured per stimulus cycle.
pub const DEFAULT_SAMPLES_PER_HZ: f64 = 64.0;

/// How the swept frequency table is generated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FrequencyPlan {
    /// Evenly spaced points from `start_hz` to `stop_hz` inclusive.
    Linear {
        start_hz: f64,
        stop_hz: f64,
        points: usize,
    },
    /// Logarithmic spacing with a fixed point count per decade.
    LogDecade {
        start_hz: f64,
        stop_hz: f64,
        points_per_decade: usize,
    },
}

impl FrequencyPlan {
    pub fn frequencies(&self) -> Result<Vec<f64>, SweepError> {
        match *self {
            FrequencyPlan::Linear {
                start_hz,
                stop_hz,
                points,
            } => {
                Self::check_span(start_hz, stop_hz)?;
                if points < 2 {
                    return Err(SweepError::InvalidConfig {
                        reason: format!("linear plan needs at least 2 points, got {points}"),
                    });
                }
                let step = (stop_hz - start_hz) / (points - 1) as f64;
                Ok((0..points).map(|i| start_hz + step * i as f64).collect())
            }
            FrequencyPlan::LogDecade {
                start_hz,
                stop_hz,
                points_per_decade,
            } => {
                Self::check_span(start_hz, stop_hz)?;
                if points_per_decade == 0 {
                    return Err(SweepError::InvalidConfig {
                        reason: "log plan needs at least 1 point per decade".into(),
                    });
                }
                let decades = (stop_hz / start_hz).log10();
                let total = (decades * points_per_decade as f64).ceil() as usize + 1;
                let mut frequencies: Vec<f64> = (0..total)
                    .map(|i| start_hz * 10f64.powf(i as f64 / points_per_decade as f64))
                    .collect();
                // Clamp the last point onto the requested stop frequency.
                if let Some(last) = frequencies.last_mut() {
                    if *last > stop_hz {
                        *last = stop_hz;
                    }
                }
                frequencies.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
                Ok(frequencies)
            }
        }
    }

    fn check_span(start_hz: f64, stop_hz: f64) -> Result<(), SweepError> {
        if !(start_hz > 0.0) || !start_hz.is_finite() || !stop_hz.is_finite() || stop_hz <= start_hz
        {
            return Err(SweepError::InvalidConfig {
                reason: format!("invalid frequency span {start_hz}..{stop_hz} Hz"),
            });
        }
        Ok(())
    }
}

/// Everything one sweep needs: the frequency table, the stimulus level, the
/// sampling ratio, and the two instrument resource names. Read-only for the
/// sweep core; owned by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    pub frequencies: Vec<f64>,
    /// Stimulus sine amplitude in volts.
    pub voltage: f64,
    /// Digitizer sample rate as a multiple of the stimulus frequency.
    pub samples_per_hz: f64,
    /// Samples analyzed per channel; also the record length requested from
    /// the digitizer.
    pub window_len: usize,
    pub generator_device: String,
    pub acquisition_device: String,
}

impl SweepConfig {
    pub fn new(
        frequencies: Vec<f64>,
        voltage: f64,
        generator_device: impl Into<String>,
        acquisition_device: impl Into<String>,
    ) -> Self {
        Self {
            frequencies,
            voltage,
            samples_per_hz: DEFAULT_SAMPLES_PER_HZ,
            window_len: DEFAULT_WINDOW_LEN,
            generator_device: generator_device.into(),
            acquisition_device: acquisition_device.into(),
        }
    }

    pub fn from_plan(
        plan: &FrequencyPlan,
        voltage: f64,
        generator_device: impl Into<String>,
        acquisition_device: impl Into<String>,
    ) -> Result<Self, SweepError> {
        Ok(Self::new(
            plan.frequencies()?,
            voltage,
            generator_device,
            acquisition_device,
        ))
    }

    pub fn points(&self) -> usize {
        self.frequencies.len()
    }

    pub fn frequency_at(&self, index: usize) -> Option<f64> {
        self.frequencies.get(index).copied()
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        if self.frequencies.is_empty() {
            return Err(SweepError::InvalidConfig {
                reason: "frequency table is empty".into(),
            });
        }
        if let Some(&bad) = self
            .frequencies
            .iter()
            .find(|f| !(**f > 0.0) || !f.is_finite())
        {
            return Err(SweepError::InvalidConfig {
                reason: format!("frequency table contains {bad} Hz"),
            });
        }
        if !(self.voltage > 0.0) || !self.voltage.is_finite() {
            return Err(SweepError::InvalidConfig {
                reason: format!("stimulus voltage must be positive, got {}", self.voltage),
            });
        }
        // fs = f * samples_per_hz must clear Nyquist for every point.
        if !(self.samples_per_hz > 2.0) || !self.samples_per_hz.is_finite() {
            return Err(SweepError::InvalidConfig {
                reason: format!(
                    "samples_per_hz must exceed 2 for Nyquist, got {}",
                    self.samples_per_hz
                ),
            });
        }
        if self.window_len == 0 {
            return Err(SweepError::InvalidConfig {
                reason: "window length must be nonzero".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_plan_hits_endpoints() {
        let plan = FrequencyPlan::Linear {
            start_hz: 100.0,
            stop_hz: 1000.0,
            points: 10,
        };
        let freqs = plan.frequencies().unwrap();
        assert_eq!(freqs.len(), 10);
        assert!((freqs[0] - 100.0).abs() < 1e-9);
        assert!((freqs[9] - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn log_plan_is_monotonic_and_bounded() {
        let plan = FrequencyPlan::LogDecade {
            start_hz: 10.0,
            stop_hz: 100_000.0,
            points_per_decade: 10,
        };
        let freqs = plan.frequencies().unwrap();
        assert!(freqs.windows(2).all(|w| w[1] > w[0]));
        assert!((freqs[0] - 10.0).abs() < 1e-9);
        assert!(*freqs.last().unwrap() <= 100_000.0 + 1e-6);
        // one decade = points_per_decade steps
        assert!((freqs[10] - 100.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_plans_are_rejected() {
        assert!(FrequencyPlan::Linear {
            start_hz: 0.0,
            stop_hz: 10.0,
            points: 5
        }
        .frequencies()
        .is_err());
        assert!(FrequencyPlan::Linear {
            start_hz: 10.0,
            stop_hz: 10.0,
            points: 5
        }
        .frequencies()
        .is_err());
        assert!(FrequencyPlan::LogDecade {
            start_hz: 10.0,
            stop_hz: 100.0,
            points_per_decade: 0
        }
        .frequencies()
        .is_err());
    }

    #[test]
    fn validation_flags_bad_fields() {
        let mut config = SweepConfig::new(vec![1000.0], 1.0, "gen0", "scope0");
        config.validate().unwrap();

        config.voltage = 0.0;
        assert!(config.validate().is_err());
        config.voltage = 1.0;

        config.samples_per_hz = 2.0;
        assert!(config.validate().is_err());
        config.samples_per_hz = 64.0;

        config.window_len = 0;
        assert!(config.validate().is_err());
        config.window_len = 1024;

        config.frequencies = vec![1000.0, -5.0];
        assert!(config.validate().is_err());

        config.frequencies = Vec::new();
        assert!(config.validate().is_err());
    }
}
