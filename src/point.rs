use log::{debug, warn};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::SweepConfig;
use crate::error::SweepError;
use crate::session::{
    AcquisitionSession, AcquisitionSetup, Capture, Coupling, Instrument, StimulusSession,
};
use crate::wave::Waveform;

// Vertical setup shared by both digitizer channels.
const VERTICAL_RANGE_V: f64 = 10.0;
const VERTICAL_OFFSET_V: f64 = 0.0;
const INPUT_IMPEDANCE_OHMS: f64 = 1_000_000.0;
const PRETRIGGER_PERCENT: f64 = 50.0;
const FETCH_TIMEOUT_S: f64 = 5.0;
const CHANNELS: usize = 2;

/// One swept point: the stimulus frequency and the complex amplitude seen
/// on the reference (DUT input) and response (DUT output) channels.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub frequency_hz: f64,
    pub input: Complex64,
    pub output: Complex64,
}

impl MeasurementResult {
    /// Complex transfer value output/input.
    pub fn gain(&self) -> Complex64 {
        self.output / self.input
    }

    pub fn gain_db(&self) -> f64 {
        20.0 * self.gain().norm().log10()
    }

    pub fn phase_deg(&self) -> f64 {
        self.gain().arg().to_degrees()
    }
}

/// Runs one generate -> acquire -> stop -> extract cycle at `frequency_hz`.
///
/// Both sessions are opened fresh for this point and closed on every exit
/// path, success or failure. A close failure is logged, never returned, so
/// it cannot mask the fault that aborted the point.
pub fn measure_point<I: Instrument>(
    instrument: &I,
    frequency_hz: f64,
    config: &SweepConfig,
) -> Result<MeasurementResult, SweepError> {
    debug!("measuring point at {frequency_hz} Hz");
    let mut stimulus = instrument.open_stimulus(&config.generator_device)?;
    let result = drive_point(&mut stimulus, instrument, frequency_hz, config);
    if let Err(err) = stimulus.close() {
        warn!("stimulus close failed after point at {frequency_hz} Hz: {err}");
    }
    result
}

fn drive_point<I: Instrument>(
    stimulus: &mut I::Stimulus,
    instrument: &I,
    frequency_hz: f64,
    config: &SweepConfig,
) -> Result<MeasurementResult, SweepError> {
    stimulus.configure_sine(config.voltage, 0.0, frequency_hz, 0.0)?;
    stimulus.start()?;

    let mut acquisition = instrument.open_acquisition(&config.acquisition_device)?;
    let captured = capture_records(&mut acquisition, frequency_hz, config);
    // Generation is stopped once the record is in (or the capture failed),
    // before either session is released.
    let stopped = stimulus.stop();
    if let Err(err) = acquisition.close() {
        warn!("acquisition close failed after point at {frequency_hz} Hz: {err}");
    }
    let capture = match captured {
        Ok(capture) => capture,
        Err(err) => {
            // The capture fault is the primary cause; a stop failure on
            // this path is recorded, not returned.
            if let Err(stop_err) = stopped {
                warn!("stimulus stop failed after capture fault at {frequency_hz} Hz: {stop_err}");
            }
            return Err(err);
        }
    };
    stopped?;

    extract_pair(&capture, frequency_hz, config.window_len)
}

fn capture_records<A: AcquisitionSession>(
    acquisition: &mut A,
    frequency_hz: f64,
    config: &SweepConfig,
) -> Result<Capture, SweepError> {
    let setup = AcquisitionSetup {
        channels: CHANNELS,
        vertical_range_v: VERTICAL_RANGE_V,
        vertical_offset_v: VERTICAL_OFFSET_V,
        coupling: Coupling::Dc,
        input_impedance_ohms: INPUT_IMPEDANCE_OHMS,
        sample_rate_hz: frequency_hz * config.samples_per_hz,
        record_len: config.window_len,
        pretrigger_percent: PRETRIGGER_PERCENT,
    };
    acquisition.configure(&setup)?;
    acquisition.start()?;

    let actual_len = acquisition.actual_record_length()?;
    if actual_len < config.window_len {
        return Err(SweepError::RecordTooShort {
            expected: config.window_len,
            actual: actual_len,
        });
    }
    let capture = acquisition.fetch(FETCH_TIMEOUT_S)?;
    if capture.channels != CHANNELS {
        return Err(SweepError::ChannelCount {
            expected: CHANNELS,
            actual: capture.channels,
        });
    }
    if capture.record_len < config.window_len
        || capture.samples.len() != capture.channels * capture.record_len
    {
        return Err(SweepError::RecordTooShort {
            expected: config.window_len,
            actual: capture.samples.len() / capture.channels.max(1),
        });
    }
    Ok(capture)
}

fn extract_pair(
    capture: &Capture,
    frequency_hz: f64,
    window_len: usize,
) -> Result<MeasurementResult, SweepError> {
    // First record is the reference (DUT input), second the DUT output.
    let reference = &capture.samples[..window_len];
    let response = &capture.samples[capture.record_len..capture.record_len + window_len];

    let input_wave = Waveform::new(capture.sample_rate_hz, reference.to_vec())?;
    let output_wave = Waveform::new(capture.sample_rate_hz, response.to_vec())?;

    Ok(MeasurementResult {
        frequency_hz,
        input: input_wave.value_at(frequency_hz)?,
        output: output_wave.value_at(frequency_hz)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{DutModel, SimFault, SimInstrument, SimStats};

    fn config() -> SweepConfig {
        SweepConfig::new(vec![1000.0], 1.0, "sim-gen", "sim-scope")
    }

    #[test]
    fn point_recovers_dut_gain_and_phase() {
        let instrument = SimInstrument::new(DutModel::low_pass(1.0, 1000.0));
        let result = measure_point(&instrument, 1000.0, &config()).unwrap();
        // At the corner the single-pole gain is 1/sqrt(2), phase -45 deg.
        assert!((result.gain().norm() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((result.phase_deg() + 45.0).abs() < 1e-3);
    }

    #[test]
    fn sessions_close_once_on_success() {
        let instrument = SimInstrument::new(DutModel::unity());
        measure_point(&instrument, 1000.0, &config()).unwrap();
        let stats = instrument.stats();
        assert_eq!(stats.stimulus_opened, 1);
        assert_eq!(stats.stimulus_closed, 1);
        assert_eq!(stats.acquisition_opened, 1);
        assert_eq!(stats.acquisition_closed, 1);
        assert_eq!(stats.stimulus_started, 1);
        assert_eq!(stats.stimulus_stopped, 1);
    }

    #[test]
    fn fetch_fault_still_closes_both_sessions() {
        let instrument = SimInstrument::new(DutModel::unity());
        instrument.fail_at(0, SimFault::Fetch);
        let err = measure_point(&instrument, 1000.0, &config()).unwrap_err();
        assert!(matches!(err, SweepError::Instrument { .. }));
        let stats = instrument.stats();
        assert_eq!(stats.stimulus_closed, 1);
        assert_eq!(stats.acquisition_closed, 1);
    }

    #[test]
    fn acquisition_open_fault_closes_stimulus() {
        let instrument = SimInstrument::new(DutModel::unity());
        instrument.fail_at(0, SimFault::OpenAcquisition);
        let err = measure_point(&instrument, 1000.0, &config()).unwrap_err();
        assert!(matches!(err, SweepError::Instrument { .. }));
        let stats = instrument.stats();
        assert_eq!(stats.stimulus_opened, 1);
        assert_eq!(stats.stimulus_closed, 1);
        assert_eq!(stats.acquisition_opened, 0);
        assert_eq!(stats.acquisition_closed, 0);
    }

    #[test]
    fn stimulus_open_fault_leaves_nothing_to_close() {
        let instrument = SimInstrument::new(DutModel::unity());
        instrument.fail_at(0, SimFault::OpenStimulus);
        let err = measure_point(&instrument, 1000.0, &config()).unwrap_err();
        assert!(matches!(err, SweepError::Instrument { .. }));
        assert_eq!(instrument.stats(), SimStats::default());
    }

    #[test]
    fn stimulus_configure_fault_closes_stimulus_only() {
        let instrument = SimInstrument::new(DutModel::unity());
        instrument.fail_at(0, SimFault::ConfigureStimulus);
        let err = measure_point(&instrument, 1000.0, &config()).unwrap_err();
        assert!(matches!(err, SweepError::Instrument { .. }));
        let stats = instrument.stats();
        assert_eq!(stats.stimulus_opened, 1);
        assert_eq!(stats.stimulus_closed, 1);
        assert_eq!(stats.stimulus_started, 0);
        assert_eq!(stats.acquisition_opened, 0);
    }

    #[test]
    fn stimulus_start_fault_closes_stimulus_only() {
        let instrument = SimInstrument::new(DutModel::unity());
        instrument.fail_at(0, SimFault::StartStimulus);
        let err = measure_point(&instrument, 1000.0, &config()).unwrap_err();
        assert!(matches!(err, SweepError::Instrument { .. }));
        let stats = instrument.stats();
        assert_eq!(stats.stimulus_closed, 1);
        assert_eq!(stats.acquisition_opened, 0);
    }

    #[test]
    fn acquisition_configure_fault_closes_both_sessions_once() {
        let instrument = SimInstrument::new(DutModel::unity());
        instrument.fail_at(0, SimFault::ConfigureAcquisition);
        let err = measure_point(&instrument, 1000.0, &config()).unwrap_err();
        assert!(matches!(err, SweepError::Instrument { .. }));
        let stats = instrument.stats();
        assert_eq!(stats.stimulus_opened, 1);
        assert_eq!(stats.stimulus_closed, 1);
        assert_eq!(stats.acquisition_opened, 1);
        assert_eq!(stats.acquisition_closed, 1);
    }

    #[test]
    fn acquisition_start_fault_closes_both_sessions_once() {
        let instrument = SimInstrument::new(DutModel::unity());
        instrument.fail_at(0, SimFault::StartAcquisition);
        let err = measure_point(&instrument, 1000.0, &config()).unwrap_err();
        assert!(matches!(err, SweepError::Instrument { .. }));
        let stats = instrument.stats();
        assert_eq!(stats.acquisition_closed, 1);
        assert_eq!(stats.stimulus_closed, 1);
    }

    #[test]
    fn stop_fault_after_good_capture_is_fatal_and_closes_both() {
        // The record came back fine; a failing generator stop still aborts
        // the point, after both sessions are released.
        let instrument = SimInstrument::new(DutModel::unity());
        instrument.fail_at(0, SimFault::StopStimulus);
        let err = measure_point(&instrument, 1000.0, &config()).unwrap_err();
        assert!(matches!(err, SweepError::Instrument { .. }));
        let stats = instrument.stats();
        assert_eq!(stats.stimulus_started, 1);
        assert_eq!(stats.stimulus_stopped, 0);
        assert_eq!(stats.stimulus_closed, 1);
        assert_eq!(stats.acquisition_closed, 1);
    }

    #[test]
    fn stimulus_close_fault_does_not_mask_the_result() {
        let instrument = SimInstrument::new(DutModel::unity());
        instrument.fail_at(0, SimFault::CloseStimulus);
        let result = measure_point(&instrument, 1000.0, &config()).unwrap();
        assert!((result.gain().norm() - 1.0).abs() < 1e-6);
        assert_eq!(instrument.stats().stimulus_closed, 1);
    }

    #[test]
    fn short_record_is_rejected() {
        let instrument = SimInstrument::new(DutModel::unity());
        instrument.set_actual_record_len(512);
        let err = measure_point(&instrument, 1000.0, &config()).unwrap_err();
        assert!(matches!(
            err,
            SweepError::RecordTooShort {
                expected: 1024,
                actual: 512
            }
        ));
        let stats = instrument.stats();
        assert_eq!(stats.acquisition_closed, 1);
        assert_eq!(stats.stimulus_closed, 1);
    }

    #[test]
    fn oversized_record_is_sliced_per_channel() {
        let instrument = SimInstrument::new(DutModel::unity());
        instrument.set_actual_record_len(1500);
        let result = measure_point(&instrument, 1000.0, &config()).unwrap();
        assert!((result.gain().norm() - 1.0).abs() < 1e-6);
    }
}
