//! Deterministic in-process instrument: a sine generator and two-channel
//! digitizer wired through a single-pole DUT model. Used by the tests and
//! the demo in place of real hardware; supports scripted fault injection
//! and counts session lifecycle calls so release discipline can be checked.

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SweepError;
use crate::session::{
    AcquisitionSession, AcquisitionSetup, Capture, Instrument, StimulusSession,
};

/// Linear DUT model applied between the reference and response channels.
#[derive(Clone, Copy, Debug)]
pub struct DutModel {
    pub dc_gain: f64,
    pub corner_hz: f64,
}

impl DutModel {
    /// Single-pole low-pass: `H(f) = dc_gain / (1 + j f/corner)`.
    pub fn low_pass(dc_gain: f64, corner_hz: f64) -> Self {
        Self { dc_gain, corner_hz }
    }

    /// Flat unity response at every frequency.
    pub fn unity() -> Self {
        Self {
            dc_gain: 1.0,
            corner_hz: f64::INFINITY,
        }
    }

    pub fn response(&self, frequency_hz: f64) -> Complex64 {
        Complex64::new(self.dc_gain, 0.0) / Complex64::new(1.0, frequency_hz / self.corner_hz)
    }
}

/// Where a scripted fault fires within a measurement point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimFault {
    OpenStimulus,
    ConfigureStimulus,
    StartStimulus,
    StopStimulus,
    CloseStimulus,
    OpenAcquisition,
    ConfigureAcquisition,
    StartAcquisition,
    Fetch,
    CloseAcquisition,
}

/// Session lifecycle counters, one sweep's worth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    pub stimulus_opened: usize,
    pub stimulus_closed: usize,
    pub stimulus_started: usize,
    pub stimulus_stopped: usize,
    pub acquisition_opened: usize,
    pub acquisition_closed: usize,
}

#[derive(Clone, Copy, Debug)]
struct ActiveStimulus {
    frequency_hz: f64,
    amplitude_v: f64,
}

#[derive(Debug)]
struct SimState {
    model: DutModel,
    fail: Option<(usize, SimFault)>,
    point: usize,
    stats: SimStats,
    actual_record_len: Option<usize>,
    noise_v: f64,
    seed: u64,
    active: Option<ActiveStimulus>,
}

impl SimState {
    fn fault_hit(&self, fault: SimFault) -> bool {
        // `point` is post-incremented at stimulus open, so the current
        // point index is point - 1 for everything after the open itself.
        match self.fail {
            Some((at, f)) if f == fault => at + 1 == self.point,
            _ => false,
        }
    }
}

fn fault_err(fault: SimFault) -> SweepError {
    SweepError::instrument(format!("simulated fault: {fault:?}"))
}

/// Simulated instrument front end; cheap to clone handles via `Arc`.
#[derive(Clone, Debug)]
pub struct SimInstrument {
    state: Arc<Mutex<SimState>>,
}

impl SimInstrument {
    pub fn new(model: DutModel) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                model,
                fail: None,
                point: 0,
                stats: SimStats::default(),
                actual_record_len: None,
                noise_v: 0.0,
                seed: 0x5eed,
                active: None,
            })),
        }
    }

    /// Scripts one fault to fire at measurement point `point` (0-indexed).
    pub fn fail_at(&self, point: usize, fault: SimFault) {
        self.lock().fail = Some((point, fault));
    }

    /// Overrides the record length the digitizer reports and delivers.
    pub fn set_actual_record_len(&self, record_len: usize) {
        self.lock().actual_record_len = Some(record_len);
    }

    /// Additive uniform noise on both channels, in volts.
    pub fn set_noise(&self, amplitude_v: f64) {
        self.lock().noise_v = amplitude_v;
    }

    pub fn stats(&self) -> SimStats {
        self.lock().stats
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state poisoned")
    }
}

impl Instrument for SimInstrument {
    type Stimulus = SimStimulus;
    type Acquisition = SimAcquisition;

    fn open_stimulus(&self, _device: &str) -> Result<Self::Stimulus, SweepError> {
        let mut state = self.lock();
        let idx = state.point;
        state.point += 1;
        if matches!(state.fail, Some((at, SimFault::OpenStimulus)) if at == idx) {
            return Err(fault_err(SimFault::OpenStimulus));
        }
        state.stats.stimulus_opened += 1;
        Ok(SimStimulus {
            state: Arc::clone(&self.state),
            closed: false,
        })
    }

    fn open_acquisition(&self, _device: &str) -> Result<Self::Acquisition, SweepError> {
        let mut state = self.lock();
        if state.fault_hit(SimFault::OpenAcquisition) {
            return Err(fault_err(SimFault::OpenAcquisition));
        }
        state.stats.acquisition_opened += 1;
        Ok(SimAcquisition {
            state: Arc::clone(&self.state),
            setup: None,
            armed: false,
            closed: false,
        })
    }
}

pub struct SimStimulus {
    state: Arc<Mutex<SimState>>,
    closed: bool,
}

impl SimStimulus {
    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state poisoned")
    }
}

impl StimulusSession for SimStimulus {
    fn configure_sine(
        &mut self,
        amplitude_v: f64,
        _offset_v: f64,
        frequency_hz: f64,
        _phase_deg: f64,
    ) -> Result<(), SweepError> {
        let mut state = self.lock();
        if state.fault_hit(SimFault::ConfigureStimulus) {
            return Err(fault_err(SimFault::ConfigureStimulus));
        }
        state.active = Some(ActiveStimulus {
            frequency_hz,
            amplitude_v,
        });
        Ok(())
    }

    fn start(&mut self) -> Result<(), SweepError> {
        let mut state = self.lock();
        if state.fault_hit(SimFault::StartStimulus) {
            return Err(fault_err(SimFault::StartStimulus));
        }
        if state.active.is_none() {
            return Err(SweepError::instrument("stimulus started before configure"));
        }
        state.stats.stimulus_started += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SweepError> {
        let mut state = self.lock();
        if state.fault_hit(SimFault::StopStimulus) {
            return Err(fault_err(SimFault::StopStimulus));
        }
        state.active = None;
        state.stats.stimulus_stopped += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SweepError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.lock();
        state.active = None;
        state.stats.stimulus_closed += 1;
        if state.fault_hit(SimFault::CloseStimulus) {
            return Err(fault_err(SimFault::CloseStimulus));
        }
        Ok(())
    }
}

pub struct SimAcquisition {
    state: Arc<Mutex<SimState>>,
    setup: Option<AcquisitionSetup>,
    armed: bool,
    closed: bool,
}

impl SimAcquisition {
    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state poisoned")
    }

    fn record_len(&self, state: &SimState) -> usize {
        let requested = self.setup.as_ref().map(|s| s.record_len).unwrap_or(0);
        state.actual_record_len.unwrap_or(requested)
    }
}

impl AcquisitionSession for SimAcquisition {
    fn configure(&mut self, setup: &AcquisitionSetup) -> Result<(), SweepError> {
        let state = self.lock();
        if state.fault_hit(SimFault::ConfigureAcquisition) {
            return Err(fault_err(SimFault::ConfigureAcquisition));
        }
        drop(state);
        self.setup = Some(setup.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), SweepError> {
        let state = self.lock();
        if state.fault_hit(SimFault::StartAcquisition) {
            return Err(fault_err(SimFault::StartAcquisition));
        }
        drop(state);
        if self.setup.is_none() {
            return Err(SweepError::instrument("acquisition started before configure"));
        }
        self.armed = true;
        Ok(())
    }

    fn actual_record_length(&self) -> Result<usize, SweepError> {
        let state = self.lock();
        Ok(self.record_len(&state))
    }

    fn fetch(&mut self, _timeout_s: f64) -> Result<Capture, SweepError> {
        let state = self.lock();
        if state.fault_hit(SimFault::Fetch) {
            return Err(fault_err(SimFault::Fetch));
        }
        if !self.armed {
            return Err(SweepError::instrument("fetch before acquisition start"));
        }
        let setup = self
            .setup
            .as_ref()
            .ok_or_else(|| SweepError::instrument("fetch before configure"))?;
        let record_len = self.record_len(&state);
        let sample_rate_hz = setup.sample_rate_hz;
        let mut rng = StdRng::seed_from_u64(state.seed.wrapping_add(state.point as u64));

        let mut samples = Vec::with_capacity(2 * record_len);
        match state.active {
            Some(active) => {
                let transfer = state.model.response(active.frequency_hz);
                let out_amp = active.amplitude_v * transfer.norm();
                let out_phase = transfer.arg();
                let step = TAU * active.frequency_hz / sample_rate_hz;
                for n in 0..record_len {
                    let noise = if state.noise_v > 0.0 {
                        rng.gen_range(-state.noise_v..state.noise_v)
                    } else {
                        0.0
                    };
                    samples.push(active.amplitude_v * (step * n as f64).sin() + noise);
                }
                for n in 0..record_len {
                    let noise = if state.noise_v > 0.0 {
                        rng.gen_range(-state.noise_v..state.noise_v)
                    } else {
                        0.0
                    };
                    samples.push(out_amp * (step * n as f64 + out_phase).sin() + noise);
                }
            }
            // Nothing driving the DUT: both channels capture silence.
            None => samples.resize(2 * record_len, 0.0),
        }

        Ok(Capture {
            sample_rate_hz,
            channels: 2,
            record_len,
            samples,
        })
    }

    fn close(&mut self) -> Result<(), SweepError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.lock();
        state.stats.acquisition_closed += 1;
        if state.fault_hit(SimFault::CloseAcquisition) {
            return Err(fault_err(SimFault::CloseAcquisition));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_pass_model_rolls_off() {
        let model = DutModel::low_pass(1.0, 1000.0);
        assert!((model.response(10.0).norm() - 1.0).abs() < 1e-3);
        assert!((model.response(1000.0).norm() - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
        assert!(model.response(100_000.0).norm() < 0.02);
    }

    #[test]
    fn unity_model_is_flat() {
        let model = DutModel::unity();
        let r = model.response(123_456.0);
        assert!((r.norm() - 1.0).abs() < 1e-12);
        assert!(r.arg().abs() < 1e-12);
    }

    #[test]
    fn close_is_idempotent() {
        let instrument = SimInstrument::new(DutModel::unity());
        let mut stim = instrument.open_stimulus("gen").unwrap();
        stim.close().unwrap();
        stim.close().unwrap();
        let mut acq = instrument.open_acquisition("scope").unwrap();
        acq.close().unwrap();
        acq.close().unwrap();
        let stats = instrument.stats();
        assert_eq!(stats.stimulus_closed, 1);
        assert_eq!(stats.acquisition_closed, 1);
    }

    #[test]
    fn unconfigured_fetch_is_an_instrument_fault() {
        let instrument = SimInstrument::new(DutModel::unity());
        let mut acq = instrument.open_acquisition("scope").unwrap();
        assert!(matches!(
            acq.fetch(1.0),
            Err(SweepError::Instrument { .. })
        ));
    }
}
