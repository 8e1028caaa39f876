use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SweepError;

/// Digitizer input coupling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
}

/// One acquisition's full setup, handed to the digitizer before arming.
#[derive(Clone, Debug)]
pub struct AcquisitionSetup {
    pub channels: usize,
    pub vertical_range_v: f64,
    pub vertical_offset_v: f64,
    pub coupling: Coupling,
    pub input_impedance_ohms: f64,
    /// Minimum sample rate to configure; the driver may round up.
    pub sample_rate_hz: f64,
    /// Minimum record length per channel; the driver may round up.
    pub record_len: usize,
    pub pretrigger_percent: f64,
}

/// Combined fetch result: channel-major sample buffer plus the rate the
/// digitizer actually ran at.
#[derive(Clone, Debug)]
pub struct Capture {
    pub sample_rate_hz: f64,
    pub channels: usize,
    pub record_len: usize,
    /// `channels * record_len` samples, one full record per channel.
    pub samples: Vec<f64>,
}

/// Live handle to one sine-generator channel.
///
/// `close` must be idempotent and safe after a partially failed setup; the
/// measurement core calls it on every exit path.
pub trait StimulusSession {
    fn configure_sine(
        &mut self,
        amplitude_v: f64,
        offset_v: f64,
        frequency_hz: f64,
        phase_deg: f64,
    ) -> Result<(), SweepError>;

    /// Non-blocking start of generation.
    fn start(&mut self) -> Result<(), SweepError>;

    fn stop(&mut self) -> Result<(), SweepError>;

    fn close(&mut self) -> Result<(), SweepError>;
}

/// Live handle to the digitizer channels capturing one measurement point.
pub trait AcquisitionSession {
    fn configure(&mut self, setup: &AcquisitionSetup) -> Result<(), SweepError>;

    /// Arms the trigger and blocks until the configured record is complete.
    fn start(&mut self) -> Result<(), SweepError>;

    /// Record length the driver actually allocated (>= requested).
    fn actual_record_length(&self) -> Result<usize, SweepError>;

    fn fetch(&mut self, timeout_s: f64) -> Result<Capture, SweepError>;

    /// Idempotent; safe after partial configuration.
    fn close(&mut self) -> Result<(), SweepError>;
}

/// Session factory bound to instrument resource names. One fresh session
/// pair is opened per measurement point and destroyed before the next, so
/// no configuration carries over between points.
pub trait Instrument {
    type Stimulus: StimulusSession;
    type Acquisition: AcquisitionSession;

    fn open_stimulus(&self, device: &str) -> Result<Self::Stimulus, SweepError>;
    fn open_acquisition(&self, device: &str) -> Result<Self::Acquisition, SweepError>;
}

/// Receiver for sweep progress events.
pub trait ProgressSink {
    fn start(&mut self, total_steps: usize);
    fn progress(&mut self, label: &str, step: usize);
    fn finish(&mut self);
}

/// Sink that swallows every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn start(&mut self, _total_steps: usize) {}
    fn progress(&mut self, _label: &str, _step: usize) {}
    fn finish(&mut self) {}
}

/// Cooperative cancellation flag, checked between measurement points. An
/// in-flight hardware operation is never interrupted.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
