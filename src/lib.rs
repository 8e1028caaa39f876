//! Swept-sine frequency response measurement core.
//!
//! Drives a stimulus generator and a two-channel digitizer through an
//! ordered frequency table, reduces each captured record pair to one
//! complex transfer value via a single-bin DFT, and hands back an ordered
//! [`ResponseDataset`]. Instrument access goes through the [`session`]
//! traits; [`sim`] provides a deterministic in-process implementation and
//! [`ni`] binds the National Instruments FGEN/SCOPE drivers at runtime.

pub mod config;
pub mod error;
pub mod label;
pub mod ni;
pub mod plot;
pub mod point;
pub mod session;
pub mod sim;
pub mod sweep;
pub mod wave;

pub use config::{FrequencyPlan, SweepConfig, DEFAULT_SAMPLES_PER_HZ, DEFAULT_WINDOW_LEN};
pub use error::SweepError;
pub use ni::NiInstrument;
pub use plot::{render_bode_png, PlotStyle};
pub use point::{measure_point, MeasurementResult};
pub use session::{
    AcquisitionSession, AcquisitionSetup, CancelToken, Capture, Coupling, Instrument,
    NullProgress, ProgressSink, StimulusSession,
};
pub use sim::{DutModel, SimFault, SimInstrument, SimStats};
pub use sweep::{FrequencySweep, ResponseDataset};
pub use wave::Waveform;
