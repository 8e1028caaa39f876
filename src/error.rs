use thiserror::Error;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("instrument fault: {context}")]
    Instrument { context: String },
    #[error("unusable waveform: {reason}")]
    InvalidWaveform { reason: String },
    #[error("acquisition record too short: need {expected} samples, got {actual}")]
    RecordTooShort { expected: usize, actual: usize },
    #[error("unexpected channel count: expected {expected}, got {actual}")]
    ChannelCount { expected: usize, actual: usize },
    #[error("invalid sweep configuration: {reason}")]
    InvalidConfig { reason: String },
    #[error("measurement point {index} at {frequency_hz} Hz failed")]
    PointFailed {
        index: usize,
        frequency_hz: f64,
        #[source]
        source: Box<SweepError>,
    },
    #[error("sweep cancelled")]
    Cancelled,
    #[error("failed to render plot: {0}")]
    Plot(String),
}

impl SweepError {
    pub fn instrument(context: impl Into<String>) -> Self {
        SweepError::Instrument {
            context: context.into(),
        }
    }

    pub fn invalid_waveform(reason: impl Into<String>) -> Self {
        SweepError::InvalidWaveform {
            reason: reason.into(),
        }
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for SweepError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        SweepError::Plot(format!("{value:?}"))
    }
}

impl From<image::ImageError> for SweepError {
    fn from(value: image::ImageError) -> Self {
        SweepError::Plot(value.to_string())
    }
}
