use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::SweepConfig;
use crate::error::SweepError;
use crate::label;
use crate::point::{measure_point, MeasurementResult};
use crate::session::{CancelToken, Instrument, ProgressSink};

/// Finalized sweep output: one `MeasurementResult` per configured
/// frequency, in sweep order, plus the configuration that produced it.
/// Only a completed sweep ever constructs one; a failed or cancelled sweep
/// yields no dataset at all.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseDataset {
    config: SweepConfig,
    results: Vec<MeasurementResult>,
}

impl ResponseDataset {
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn results(&self) -> &[MeasurementResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MeasurementResult> {
        self.results.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MeasurementResult> {
        self.results.iter()
    }
}

/// Drives one frequency sweep: one measurement point per configured
/// frequency, strictly in table order, one live session pair at a time.
pub struct FrequencySweep {
    config: SweepConfig,
}

impl FrequencySweep {
    pub fn new(config: SweepConfig) -> Result<Self, SweepError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Runs the sweep to completion.
    ///
    /// The first point failure aborts the whole run and is returned wrapped
    /// with its point index; accumulated results are discarded, so callers
    /// never see a partial dataset. Cancellation is honored between points,
    /// never mid-point.
    pub fn run<I: Instrument, P: ProgressSink>(
        &self,
        instrument: &I,
        progress: &mut P,
        cancel: &CancelToken,
    ) -> Result<ResponseDataset, SweepError> {
        let total = self.config.points();
        info!("starting {total}-point frequency sweep");
        progress.start(total);

        let mut results = Vec::with_capacity(total);
        for (index, &frequency_hz) in self.config.frequencies.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("sweep cancelled before point {index}");
                return Err(SweepError::Cancelled);
            }
            progress.progress(&label::format_hz(frequency_hz), index);
            match measure_point(instrument, frequency_hz, &self.config) {
                Ok(result) => {
                    debug!(
                        "point {index}: |in| = {:.6}, |out| = {:.6}",
                        result.input.norm(),
                        result.output.norm()
                    );
                    results.push(result);
                }
                Err(source) => {
                    return Err(SweepError::PointFailed {
                        index,
                        frequency_hz,
                        source: Box::new(source),
                    });
                }
            }
        }

        progress.finish();
        info!("sweep completed with {} points", results.len());
        Ok(ResponseDataset {
            config: self.config.clone(),
            results,
        })
    }
}
