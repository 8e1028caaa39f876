//! Runtime-loaded NI-FGEN / NI-SCOPE backend.
//!
//! The National Instruments drivers ship as C DLLs; we bind the handful of
//! entry points the sweep needs at first use and keep the handles in
//! process-wide statics. Loading fails cleanly at runtime when the driver
//! DLLs are not installed, so the crate itself builds everywhere.

use std::ffi::CString;
use std::os::raw::{c_char, c_double, c_int, c_ushort, c_uint};

use libloading::Library;
use log::warn;
use once_cell::sync::OnceCell;

use crate::error::SweepError;
use crate::session::{
    AcquisitionSession, AcquisitionSetup, Capture, Coupling, Instrument, StimulusSession,
};

type ViStatus = c_int;
type ViSession = c_uint;
type ViBoolean = c_ushort;
type ViInt32 = c_int;
type ViReal64 = c_double;
type ViAttr = c_uint;

const VI_TRUE: ViBoolean = 1;
const VI_FALSE: ViBoolean = 0;

const FGEN_LIB: &str = "niFgen_64.dll";
const SCOPE_LIB: &str = "niScope_64.dll";

const NIFGEN_VAL_OUTPUT_FUNC: ViInt32 = 0;
const NIFGEN_VAL_WFM_SINE: ViInt32 = 1;
const NISCOPE_VAL_NORMAL: ViInt32 = 0;
const NISCOPE_VAL_AC: ViInt32 = 0;
const NISCOPE_VAL_DC: ViInt32 = 1;
const NISCOPE_ATTR_ENABLE_TIME_INTERLEAVED_SAMPLING: ViAttr = 1_150_128;

/// Per-waveform metadata filled in by `niScope_Fetch`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
struct WfmInfo {
    absolute_initial_x: ViReal64,
    relative_initial_x: ViReal64,
    x_increment: ViReal64,
    actual_samples: ViInt32,
    offset: ViReal64,
    gain: ViReal64,
    reserved1: ViReal64,
    reserved2: ViReal64,
}

struct NiFgenApi {
    #[allow(dead_code)]
    lib: Library,
    init: unsafe extern "C" fn(*const c_char, ViBoolean, ViBoolean, *mut ViSession) -> ViStatus,
    configure_channels: unsafe extern "C" fn(ViSession, *const c_char) -> ViStatus,
    configure_output_mode: unsafe extern "C" fn(ViSession, ViInt32) -> ViStatus,
    configure_standard_waveform: unsafe extern "C" fn(
        ViSession,
        *const c_char,
        ViInt32,
        ViReal64,
        ViReal64,
        ViReal64,
        ViReal64,
    ) -> ViStatus,
    initiate_generation: unsafe extern "C" fn(ViSession) -> ViStatus,
    abort_generation: unsafe extern "C" fn(ViSession) -> ViStatus,
    close: unsafe extern "C" fn(ViSession) -> ViStatus,
}

impl NiFgenApi {
    fn load() -> Result<Self, SweepError> {
        let lib = unsafe { Library::new(FGEN_LIB) }
            .map_err(|e| SweepError::instrument(format!("cannot load {FGEN_LIB}: {e}")))?;
        // Safety: signatures follow the published NI-FGEN C API.
        unsafe {
            Ok(Self {
                init: *get(&lib, b"niFgen_init\0")?,
                configure_channels: *get(&lib, b"niFgen_ConfigureChannels\0")?,
                configure_output_mode: *get(&lib, b"niFgen_ConfigureOutputMode\0")?,
                configure_standard_waveform: *get(&lib, b"niFgen_ConfigureStandardWaveform\0")?,
                initiate_generation: *get(&lib, b"niFgen_InitiateGeneration\0")?,
                abort_generation: *get(&lib, b"niFgen_AbortGeneration\0")?,
                close: *get(&lib, b"niFgen_close\0")?,
                lib,
            })
        }
    }

    fn instance() -> Result<&'static NiFgenApi, SweepError> {
        static API: OnceCell<NiFgenApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }
}

struct NiScopeApi {
    #[allow(dead_code)]
    lib: Library,
    init: unsafe extern "C" fn(*const c_char, ViBoolean, ViBoolean, *mut ViSession) -> ViStatus,
    configure_acquisition: unsafe extern "C" fn(ViSession, ViInt32) -> ViStatus,
    configure_vertical: unsafe extern "C" fn(
        ViSession,
        *const c_char,
        ViReal64,
        ViReal64,
        ViInt32,
        ViReal64,
        ViBoolean,
    ) -> ViStatus,
    configure_chan_characteristics:
        unsafe extern "C" fn(ViSession, *const c_char, ViReal64, ViReal64) -> ViStatus,
    configure_horizontal_timing: unsafe extern "C" fn(
        ViSession,
        ViReal64,
        ViInt32,
        ViReal64,
        ViInt32,
        ViBoolean,
    ) -> ViStatus,
    configure_trigger_immediate: unsafe extern "C" fn(ViSession) -> ViStatus,
    set_attribute_vi_boolean:
        unsafe extern "C" fn(ViSession, *const c_char, ViAttr, ViBoolean) -> ViStatus,
    initiate_acquisition: unsafe extern "C" fn(ViSession) -> ViStatus,
    actual_num_wfms: unsafe extern "C" fn(ViSession, *const c_char, *mut ViInt32) -> ViStatus,
    actual_record_length: unsafe extern "C" fn(ViSession, *mut ViInt32) -> ViStatus,
    fetch: unsafe extern "C" fn(
        ViSession,
        *const c_char,
        ViReal64,
        ViInt32,
        *mut ViReal64,
        *mut WfmInfo,
    ) -> ViStatus,
    sample_rate: unsafe extern "C" fn(ViSession, *mut ViReal64) -> ViStatus,
    close: unsafe extern "C" fn(ViSession) -> ViStatus,
}

impl NiScopeApi {
    fn load() -> Result<Self, SweepError> {
        let lib = unsafe { Library::new(SCOPE_LIB) }
            .map_err(|e| SweepError::instrument(format!("cannot load {SCOPE_LIB}: {e}")))?;
        // Safety: signatures follow the published NI-SCOPE C API.
        unsafe {
            Ok(Self {
                init: *get(&lib, b"niScope_init\0")?,
                configure_acquisition: *get(&lib, b"niScope_ConfigureAcquisition\0")?,
                configure_vertical: *get(&lib, b"niScope_ConfigureVertical\0")?,
                configure_chan_characteristics: *get(
                    &lib,
                    b"niScope_ConfigureChanCharacteristics\0",
                )?,
                configure_horizontal_timing: *get(&lib, b"niScope_ConfigureHorizontalTiming\0")?,
                configure_trigger_immediate: *get(&lib, b"niScope_ConfigureTriggerImmediate\0")?,
                set_attribute_vi_boolean: *get(&lib, b"niScope_SetAttributeViBoolean\0")?,
                initiate_acquisition: *get(&lib, b"niScope_InitiateAcquisition\0")?,
                actual_num_wfms: *get(&lib, b"niScope_ActualNumWfms\0")?,
                actual_record_length: *get(&lib, b"niScope_ActualRecordLength\0")?,
                fetch: *get(&lib, b"niScope_Fetch\0")?,
                sample_rate: *get(&lib, b"niScope_SampleRate\0")?,
                close: *get(&lib, b"niScope_close\0")?,
                lib,
            })
        }
    }

    fn instance() -> Result<&'static NiScopeApi, SweepError> {
        static API: OnceCell<NiScopeApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }
}

unsafe fn get<'a, T>(lib: &'a Library, symbol: &[u8]) -> Result<libloading::Symbol<'a, T>, SweepError> {
    lib.get(symbol).map_err(|e| {
        SweepError::instrument(format!(
            "missing driver symbol {}: {e}",
            String::from_utf8_lossy(&symbol[..symbol.len() - 1])
        ))
    })
}

fn check(status: ViStatus, context: &str) -> Result<(), SweepError> {
    if status < 0 {
        Err(SweepError::instrument(format!(
            "{context} failed (status {status})"
        )))
    } else {
        if status > 0 {
            warn!("{context} returned warning status {status}");
        }
        Ok(())
    }
}

fn resource(device: &str) -> Result<CString, SweepError> {
    CString::new(device)
        .map_err(|_| SweepError::instrument(format!("device name {device:?} contains NUL")))
}

fn channel_list(channels: usize) -> Result<CString, SweepError> {
    let list = (0..channels)
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",");
    CString::new(list).map_err(|_| SweepError::instrument("invalid channel list"))
}

/// Instrument front end backed by the installed NI drivers.
pub struct NiInstrument {
    fgen: &'static NiFgenApi,
    scope: &'static NiScopeApi,
}

impl NiInstrument {
    /// Binds both driver DLLs; fails if either is missing.
    pub fn load() -> Result<Self, SweepError> {
        Ok(Self {
            fgen: NiFgenApi::instance()?,
            scope: NiScopeApi::instance()?,
        })
    }
}

impl Instrument for NiInstrument {
    type Stimulus = NiStimulus;
    type Acquisition = NiAcquisition;

    fn open_stimulus(&self, device: &str) -> Result<Self::Stimulus, SweepError> {
        let name = resource(device)?;
        let mut vi: ViSession = 0;
        check(
            unsafe { (self.fgen.init)(name.as_ptr(), VI_TRUE, VI_TRUE, &mut vi) },
            "niFgen_init",
        )?;
        Ok(NiStimulus {
            api: self.fgen,
            vi,
            closed: false,
        })
    }

    fn open_acquisition(&self, device: &str) -> Result<Self::Acquisition, SweepError> {
        let name = resource(device)?;
        let mut vi: ViSession = 0;
        check(
            unsafe { (self.scope.init)(name.as_ptr(), VI_FALSE, VI_FALSE, &mut vi) },
            "niScope_init",
        )?;
        Ok(NiAcquisition {
            api: self.scope,
            vi,
            channels: CString::default(),
            num_channels: 0,
            closed: false,
        })
    }
}

pub struct NiStimulus {
    api: &'static NiFgenApi,
    vi: ViSession,
    closed: bool,
}

impl StimulusSession for NiStimulus {
    fn configure_sine(
        &mut self,
        amplitude_v: f64,
        offset_v: f64,
        frequency_hz: f64,
        phase_deg: f64,
    ) -> Result<(), SweepError> {
        let channel = CString::new("0").expect("static channel name");
        check(
            unsafe { (self.api.configure_channels)(self.vi, channel.as_ptr()) },
            "niFgen_ConfigureChannels",
        )?;
        check(
            unsafe { (self.api.configure_output_mode)(self.vi, NIFGEN_VAL_OUTPUT_FUNC) },
            "niFgen_ConfigureOutputMode",
        )?;
        check(
            unsafe {
                (self.api.configure_standard_waveform)(
                    self.vi,
                    channel.as_ptr(),
                    NIFGEN_VAL_WFM_SINE,
                    amplitude_v,
                    offset_v,
                    frequency_hz,
                    phase_deg,
                )
            },
            "niFgen_ConfigureStandardWaveform",
        )
    }

    fn start(&mut self) -> Result<(), SweepError> {
        check(
            unsafe { (self.api.initiate_generation)(self.vi) },
            "niFgen_InitiateGeneration",
        )
    }

    fn stop(&mut self) -> Result<(), SweepError> {
        check(
            unsafe { (self.api.abort_generation)(self.vi) },
            "niFgen_AbortGeneration",
        )
    }

    fn close(&mut self) -> Result<(), SweepError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        check(unsafe { (self.api.close)(self.vi) }, "niFgen_close")
    }
}

impl Drop for NiStimulus {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("leaking generator session: {err}");
        }
    }
}

pub struct NiAcquisition {
    api: &'static NiScopeApi,
    vi: ViSession,
    channels: CString,
    num_channels: usize,
    closed: bool,
}

impl AcquisitionSession for NiAcquisition {
    fn configure(&mut self, setup: &AcquisitionSetup) -> Result<(), SweepError> {
        self.channels = channel_list(setup.channels)?;
        self.num_channels = setup.channels;
        let coupling = match setup.coupling {
            Coupling::Ac => NISCOPE_VAL_AC,
            Coupling::Dc => NISCOPE_VAL_DC,
        };
        check(
            unsafe { (self.api.configure_acquisition)(self.vi, NISCOPE_VAL_NORMAL) },
            "niScope_ConfigureAcquisition",
        )?;
        check(
            unsafe {
                (self.api.configure_vertical)(
                    self.vi,
                    self.channels.as_ptr(),
                    setup.vertical_range_v,
                    setup.vertical_offset_v,
                    coupling,
                    1.0,
                    VI_TRUE,
                )
            },
            "niScope_ConfigureVertical",
        )?;
        check(
            unsafe {
                (self.api.configure_chan_characteristics)(
                    self.vi,
                    self.channels.as_ptr(),
                    setup.input_impedance_ohms,
                    0.0,
                )
            },
            "niScope_ConfigureChanCharacteristics",
        )?;
        check(
            unsafe {
                (self.api.configure_horizontal_timing)(
                    self.vi,
                    setup.sample_rate_hz,
                    setup.record_len as ViInt32,
                    setup.pretrigger_percent,
                    1,
                    VI_TRUE,
                )
            },
            "niScope_ConfigureHorizontalTiming",
        )?;
        // Interleaved sampling skews inter-channel timing; the transfer
        // extraction needs both channels on a common clock.
        check(
            unsafe {
                (self.api.set_attribute_vi_boolean)(
                    self.vi,
                    self.channels.as_ptr(),
                    NISCOPE_ATTR_ENABLE_TIME_INTERLEAVED_SAMPLING,
                    VI_FALSE,
                )
            },
            "niScope_SetAttributeViBoolean",
        )?;
        check(
            unsafe { (self.api.configure_trigger_immediate)(self.vi) },
            "niScope_ConfigureTriggerImmediate",
        )
    }

    fn start(&mut self) -> Result<(), SweepError> {
        // The driver arms here and blocks inside fetch until the record is
        // complete, which satisfies the session's ordering contract.
        check(
            unsafe { (self.api.initiate_acquisition)(self.vi) },
            "niScope_InitiateAcquisition",
        )
    }

    fn actual_record_length(&self) -> Result<usize, SweepError> {
        let mut len: ViInt32 = 0;
        check(
            unsafe { (self.api.actual_record_length)(self.vi, &mut len) },
            "niScope_ActualRecordLength",
        )?;
        Ok(len.max(0) as usize)
    }

    fn fetch(&mut self, timeout_s: f64) -> Result<Capture, SweepError> {
        let mut num_wfms: ViInt32 = 0;
        check(
            unsafe { (self.api.actual_num_wfms)(self.vi, self.channels.as_ptr(), &mut num_wfms) },
            "niScope_ActualNumWfms",
        )?;
        let num_wfms = num_wfms.max(0) as usize;
        if num_wfms != self.num_channels {
            return Err(SweepError::ChannelCount {
                expected: self.num_channels,
                actual: num_wfms,
            });
        }
        let record_len = self.actual_record_length()?;

        let mut samples = vec![0.0f64; record_len * num_wfms];
        let mut info = vec![WfmInfo::default(); num_wfms];
        check(
            unsafe {
                (self.api.fetch)(
                    self.vi,
                    self.channels.as_ptr(),
                    timeout_s,
                    record_len as ViInt32,
                    samples.as_mut_ptr(),
                    info.as_mut_ptr(),
                )
            },
            "niScope_Fetch",
        )?;

        let mut sample_rate_hz: ViReal64 = 0.0;
        check(
            unsafe { (self.api.sample_rate)(self.vi, &mut sample_rate_hz) },
            "niScope_SampleRate",
        )?;

        Ok(Capture {
            sample_rate_hz,
            channels: num_wfms,
            record_len,
            samples,
        })
    }

    fn close(&mut self) -> Result<(), SweepError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        check(unsafe { (self.api.close)(self.vi) }, "niScope_close")
    }
}

impl Drop for NiAcquisition {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("leaking digitizer session: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_list_formats_counts() {
        assert_eq!(channel_list(1).unwrap().to_str().unwrap(), "0");
        assert_eq!(channel_list(2).unwrap().to_str().unwrap(), "0,1");
    }

    #[test]
    fn status_check_maps_failures() {
        assert!(check(0, "op").is_ok());
        assert!(check(4, "op").is_ok());
        assert!(matches!(
            check(-1074135040, "op"),
            Err(SweepError::Instrument { .. })
        ));
    }
}
