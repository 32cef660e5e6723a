//! USRP sample source over the UHD C API.
//!
//! Minimal hand-written bindings; only the receive path the pipeline needs.
//! Samples are requested packet-by-packet inside `fill` with the device
//! mutex held only around hardware calls, never across DSP work.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_double, c_int, c_void};
use std::ptr;
use std::sync::Mutex;

use num_complex::Complex32;

use crate::{Antenna, CircularBuffer, SampleSource, SAMPLE_SCALE};

type UhdError = c_int;
const UHD_ERROR_NONE: UhdError = 0;

type UhdUsrpHandle = *mut c_void;
type UhdRxStreamerHandle = *mut c_void;
type UhdRxMetadataHandle = *mut c_void;
type UhdStringVectorHandle = *mut c_void;
type UhdMetaRangeHandle = *mut c_void;
type UhdSubdevSpecHandle = *mut c_void;

const UHD_TUNE_REQUEST_POLICY_AUTO: c_int = 65;
const UHD_STREAM_MODE_START_CONTINUOUS: c_int = 97;
const UHD_STREAM_MODE_STOP_CONTINUOUS: c_int = 111;

const UHD_RX_METADATA_ERROR_CODE_TIMEOUT: c_int = 0x1;
const UHD_RX_METADATA_ERROR_CODE_OVERFLOW: c_int = 0x8;

#[repr(C)]
struct UhdTuneRequest {
    target_freq: c_double,
    rf_freq_policy: c_int,
    rf_freq: c_double,
    dsp_freq_policy: c_int,
    dsp_freq: c_double,
    args: *mut c_char,
}

#[repr(C)]
struct UhdTuneResult {
    clipped_rf_freq: c_double,
    target_rf_freq: c_double,
    actual_rf_freq: c_double,
    target_dsp_freq: c_double,
    actual_dsp_freq: c_double,
}

#[repr(C)]
struct UhdStreamArgs {
    cpu_format: *mut c_char,
    otw_format: *mut c_char,
    args: *mut c_char,
    channel_list: *mut usize,
    n_channels: c_int,
}

#[repr(C)]
struct UhdStreamCmd {
    stream_mode: c_int,
    num_samps: usize,
    stream_now: bool,
    time_spec_full_secs: i64,
    time_spec_frac_secs: c_double,
}

extern "C" {
    fn uhd_string_vector_make(h: *mut UhdStringVectorHandle) -> UhdError;
    fn uhd_string_vector_free(h: *mut UhdStringVectorHandle) -> UhdError;
    fn uhd_string_vector_size(h: UhdStringVectorHandle, size_out: *mut usize) -> UhdError;
    fn uhd_string_vector_at(
        h: UhdStringVectorHandle,
        index: usize,
        value_out: *mut c_char,
        strbuffer_len: usize,
    ) -> UhdError;

    fn uhd_usrp_make(h: *mut UhdUsrpHandle, args: *const c_char) -> UhdError;
    fn uhd_usrp_free(h: *mut UhdUsrpHandle) -> UhdError;
    fn uhd_usrp_set_master_clock_rate(h: UhdUsrpHandle, rate: c_double, mboard: usize) -> UhdError;
    fn uhd_usrp_set_clock_source(h: UhdUsrpHandle, source: *const c_char, mboard: usize)
        -> UhdError;
    fn uhd_usrp_set_rx_rate(h: UhdUsrpHandle, rate: c_double, chan: usize) -> UhdError;
    fn uhd_usrp_get_rx_rate(h: UhdUsrpHandle, chan: usize, rate_out: *mut c_double) -> UhdError;
    fn uhd_usrp_set_rx_gain(
        h: UhdUsrpHandle,
        gain: c_double,
        chan: usize,
        gain_name: *const c_char,
    ) -> UhdError;
    fn uhd_usrp_get_rx_gain_range(
        h: UhdUsrpHandle,
        name: *const c_char,
        chan: usize,
        range_out: UhdMetaRangeHandle,
    ) -> UhdError;
    fn uhd_usrp_set_rx_freq(
        h: UhdUsrpHandle,
        tune_request: *mut UhdTuneRequest,
        chan: usize,
        tune_result: *mut UhdTuneResult,
    ) -> UhdError;
    fn uhd_usrp_set_rx_antenna(h: UhdUsrpHandle, ant: *const c_char, chan: usize) -> UhdError;
    fn uhd_usrp_get_rx_antennas(
        h: UhdUsrpHandle,
        chan: usize,
        antennas_out: *mut UhdStringVectorHandle,
    ) -> UhdError;
    fn uhd_usrp_set_rx_subdev_spec(
        h: UhdUsrpHandle,
        subdev_spec: UhdSubdevSpecHandle,
        mboard: usize,
    ) -> UhdError;
    fn uhd_usrp_get_rx_stream(
        h: UhdUsrpHandle,
        stream_args: *mut UhdStreamArgs,
        h_out: UhdRxStreamerHandle,
    ) -> UhdError;

    fn uhd_meta_range_make(h: *mut UhdMetaRangeHandle) -> UhdError;
    fn uhd_meta_range_free(h: *mut UhdMetaRangeHandle) -> UhdError;
    fn uhd_meta_range_start(h: UhdMetaRangeHandle, start_out: *mut c_double) -> UhdError;
    fn uhd_meta_range_stop(h: UhdMetaRangeHandle, stop_out: *mut c_double) -> UhdError;

    fn uhd_subdev_spec_make(h: *mut UhdSubdevSpecHandle, markup: *const c_char) -> UhdError;
    fn uhd_subdev_spec_free(h: *mut UhdSubdevSpecHandle) -> UhdError;

    fn uhd_rx_streamer_make(h: *mut UhdRxStreamerHandle) -> UhdError;
    fn uhd_rx_streamer_free(h: *mut UhdRxStreamerHandle) -> UhdError;
    fn uhd_rx_streamer_max_num_samps(h: UhdRxStreamerHandle, max_out: *mut usize) -> UhdError;
    fn uhd_rx_streamer_recv(
        h: UhdRxStreamerHandle,
        buffs: *mut *mut c_void,
        samps_per_buff: usize,
        md: *mut UhdRxMetadataHandle,
        timeout: c_double,
        one_packet: bool,
        items_recvd: *mut usize,
    ) -> UhdError;
    fn uhd_rx_streamer_issue_stream_cmd(
        h: UhdRxStreamerHandle,
        stream_cmd: *const UhdStreamCmd,
    ) -> UhdError;

    fn uhd_rx_metadata_make(handle: *mut UhdRxMetadataHandle) -> UhdError;
    fn uhd_rx_metadata_free(handle: *mut UhdRxMetadataHandle) -> UhdError;
    fn uhd_rx_metadata_error_code(h: UhdRxMetadataHandle, error_code_out: *mut c_int) -> UhdError;
}

struct DeviceHandles {
    usrp: UhdUsrpHandle,
    streamer: UhdRxStreamerHandle,
    metadata: UhdRxMetadataHandle,
}

// Raw UHD handles; access is serialized by the owning Mutex.
unsafe impl Send for DeviceHandles {}

const RECV_TIMEOUT: f64 = 3.0;

/// USRP receive source.  Hardware reads happen synchronously inside `fill`
/// and `flush`; the mutex covers every UHD call and nothing else.
pub struct UsrpSource {
    dev: Mutex<DeviceHandles>,
    cb: CircularBuffer,
    sample_rate: f64,
    samples_per_packet: usize,
    staging: Vec<Complex32>,
}

fn check(err: UhdError, what: &str) -> Result<(), String> {
    if err != UHD_ERROR_NONE {
        Err(format!("{} failed: uhd error {}", what, err))
    } else {
        Ok(())
    }
}

impl UsrpSource {
    /// Open the device and configure the receive chain.
    pub fn open(
        device_address: Option<&str>,
        sample_rate: f64,
        fpga_master_clock_freq: Option<f64>,
        external_ref: bool,
    ) -> Result<Self, String> {
        let mut addr = String::from("recv_frame_size=4096,num_recv_frames=64");
        if let Some(a) = device_address {
            addr = format!("{},{}", a, addr);
        }
        let addr_c = CString::new(addr).map_err(|e| e.to_string())?;

        unsafe {
            let mut usrp: UhdUsrpHandle = ptr::null_mut();
            check(uhd_usrp_make(&mut usrp, addr_c.as_ptr()), "uhd_usrp_make")?;

            if let Some(clock) = fpga_master_clock_freq {
                check(
                    uhd_usrp_set_master_clock_rate(usrp, clock, 0),
                    "uhd_usrp_set_master_clock_rate",
                )?;
            }
            if external_ref {
                let ext = CString::new("external").unwrap();
                check(
                    uhd_usrp_set_clock_source(usrp, ext.as_ptr(), 0),
                    "uhd_usrp_set_clock_source",
                )?;
            }

            check(uhd_usrp_set_rx_rate(usrp, sample_rate, 0), "uhd_usrp_set_rx_rate")?;
            let mut actual_rate = 0.0;
            check(
                uhd_usrp_get_rx_rate(usrp, 0, &mut actual_rate),
                "uhd_usrp_get_rx_rate",
            )?;

            let mut streamer: UhdRxStreamerHandle = ptr::null_mut();
            check(uhd_rx_streamer_make(&mut streamer), "uhd_rx_streamer_make")?;

            let cpu = CString::new("fc32").unwrap();
            let otw = CString::new("sc16").unwrap();
            let args = CString::new("").unwrap();
            let mut channel = 0usize;
            let mut stream_args = UhdStreamArgs {
                cpu_format: cpu.as_ptr() as *mut c_char,
                otw_format: otw.as_ptr() as *mut c_char,
                args: args.as_ptr() as *mut c_char,
                channel_list: &mut channel,
                n_channels: 1,
            };
            check(
                uhd_usrp_get_rx_stream(usrp, &mut stream_args, streamer),
                "uhd_usrp_get_rx_stream",
            )?;

            let mut samples_per_packet = 0usize;
            check(
                uhd_rx_streamer_max_num_samps(streamer, &mut samples_per_packet),
                "uhd_rx_streamer_max_num_samps",
            )?;

            let mut metadata: UhdRxMetadataHandle = ptr::null_mut();
            check(uhd_rx_metadata_make(&mut metadata), "uhd_rx_metadata_make")?;

            log::info!(
                "usrp: rate {:.0} Hz, {} samples/packet",
                actual_rate,
                samples_per_packet
            );

            Ok(Self {
                dev: Mutex::new(DeviceHandles {
                    usrp,
                    streamer,
                    metadata,
                }),
                cb: CircularBuffer::new(1 << 20),
                sample_rate: actual_rate,
                samples_per_packet,
                staging: vec![Complex32::new(0.0, 0.0); samples_per_packet],
            })
        }
    }

    /// One packet off the wire.  Returns (samples received, overflow seen,
    /// timeout seen).
    fn recv_packet(&mut self, timeout: f64) -> (usize, bool, bool) {
        let dev = self.dev.lock().unwrap();
        let mut received = 0usize;
        let mut buff = self.staging.as_mut_ptr() as *mut c_void;
        let mut md = dev.metadata;
        unsafe {
            uhd_rx_streamer_recv(
                dev.streamer,
                &mut buff,
                self.samples_per_packet,
                &mut md,
                timeout,
                true,
                &mut received,
            );
            let mut code = 0;
            uhd_rx_metadata_error_code(dev.metadata, &mut code);
            (
                received,
                code & UHD_RX_METADATA_ERROR_CODE_OVERFLOW != 0,
                code & UHD_RX_METADATA_ERROR_CODE_TIMEOUT != 0,
            )
        }
    }

    fn issue_stream_cmd(&mut self, mode: c_int) {
        let dev = self.dev.lock().unwrap();
        let cmd = UhdStreamCmd {
            stream_mode: mode,
            num_samps: 0,
            stream_now: true,
            time_spec_full_secs: 0,
            time_spec_frac_secs: 0.0,
        };
        unsafe {
            uhd_rx_streamer_issue_stream_cmd(dev.streamer, &cmd);
        }
    }
}

impl SampleSource for UsrpSource {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn buffer(&mut self) -> &mut CircularBuffer {
        &mut self.cb
    }

    fn fill(&mut self, num_samples: usize) -> Result<u32, String> {
        let mut overruns = 0u32;

        while self.cb.data_available() < num_samples
            && self.cb.space_available() >= self.samples_per_packet
        {
            let (received, overflow, _timeout) = self.recv_packet(RECV_TIMEOUT);
            if overflow {
                log::warn!("overflow");
                overruns += 1;
            }
            if received > 0 {
                for s in &mut self.staging[..received] {
                    *s *= SAMPLE_SCALE;
                }
                let staging = &self.staging[..received];
                self.cb.write(staging);
            }
        }

        // A full buffer means data from the last packet was left behind.
        if self.cb.space_available() == 0 {
            log::warn!("local overrun");
            overruns += 1;
        }

        Ok(overruns)
    }

    fn flush(&mut self) {
        self.cb.flush();
        // Read until the device has nothing buffered for us.
        let timeout = 1.0 / self.sample_rate;
        loop {
            let (_received, _overflow, timed_out) = self.recv_packet(timeout);
            if timed_out {
                break;
            }
        }
    }

    fn start(&mut self) {
        self.issue_stream_cmd(UHD_STREAM_MODE_START_CONTINUOUS);
    }

    fn stop(&mut self) {
        self.issue_stream_cmd(UHD_STREAM_MODE_STOP_CONTINUOUS);
    }

    fn tune(&mut self, freq: f64) -> Result<(), String> {
        const MAX_ALLOWED_ERROR: f64 = 1.0; // Hz

        let dev = self.dev.lock().unwrap();
        let mut request = UhdTuneRequest {
            target_freq: freq,
            rf_freq_policy: UHD_TUNE_REQUEST_POLICY_AUTO,
            rf_freq: 0.0,
            dsp_freq_policy: UHD_TUNE_REQUEST_POLICY_AUTO,
            dsp_freq: 0.0,
            args: ptr::null_mut(),
        };
        let mut result = UhdTuneResult {
            clipped_rf_freq: 0.0,
            target_rf_freq: 0.0,
            actual_rf_freq: 0.0,
            target_dsp_freq: 0.0,
            actual_dsp_freq: 0.0,
        };
        unsafe {
            check(
                uhd_usrp_set_rx_freq(dev.usrp, &mut request, 0, &mut result),
                "uhd_usrp_set_rx_freq",
            )?;
        }
        if (result.target_dsp_freq - result.actual_dsp_freq).abs() > MAX_ALLOWED_ERROR {
            return Err(format!(
                "tune: dsp freq error {:.1} Hz",
                result.target_dsp_freq - result.actual_dsp_freq
            ));
        }
        Ok(())
    }

    fn set_gain(&mut self, gain: f64) -> Result<(), String> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(format!("gain {} out of range 0..1", gain));
        }
        let dev = self.dev.lock().unwrap();
        unsafe {
            let name = CString::new("").unwrap();
            let mut range: UhdMetaRangeHandle = ptr::null_mut();
            check(uhd_meta_range_make(&mut range), "uhd_meta_range_make")?;
            let r = uhd_usrp_get_rx_gain_range(dev.usrp, name.as_ptr(), 0, range);
            if r != UHD_ERROR_NONE {
                uhd_meta_range_free(&mut range);
                return Err(format!("uhd_usrp_get_rx_gain_range failed: {}", r));
            }
            let (mut lo, mut hi) = (0.0, 0.0);
            uhd_meta_range_start(range, &mut lo);
            uhd_meta_range_stop(range, &mut hi);
            uhd_meta_range_free(&mut range);

            check(
                uhd_usrp_set_rx_gain(dev.usrp, lo + gain * (hi - lo), 0, name.as_ptr()),
                "uhd_usrp_set_rx_gain",
            )?;
        }
        Ok(())
    }

    fn set_antenna(&mut self, antenna: &Antenna) -> Result<(), String> {
        let dev = self.dev.lock().unwrap();
        let name = match antenna {
            Antenna::Name(n) => n.clone(),
            Antenna::Index(idx) => unsafe {
                let mut sv: UhdStringVectorHandle = ptr::null_mut();
                check(uhd_string_vector_make(&mut sv), "uhd_string_vector_make")?;
                let r = uhd_usrp_get_rx_antennas(dev.usrp, 0, &mut sv);
                if r != UHD_ERROR_NONE {
                    uhd_string_vector_free(&mut sv);
                    return Err(format!("uhd_usrp_get_rx_antennas failed: {}", r));
                }
                let mut count = 0usize;
                uhd_string_vector_size(sv, &mut count);
                if *idx >= count {
                    uhd_string_vector_free(&mut sv);
                    return Err(format!("no such antenna index: {}", idx));
                }
                let mut buf = vec![0u8; 256];
                uhd_string_vector_at(sv, *idx, buf.as_mut_ptr() as *mut c_char, buf.len());
                uhd_string_vector_free(&mut sv);
                CStr::from_ptr(buf.as_ptr() as *const c_char)
                    .to_string_lossy()
                    .into_owned()
            },
        };
        let name_c = CString::new(name).map_err(|e| e.to_string())?;
        unsafe {
            check(
                uhd_usrp_set_rx_antenna(dev.usrp, name_c.as_ptr(), 0),
                "uhd_usrp_set_rx_antenna",
            )
        }
    }

    fn set_subdev(&mut self, side: u8) -> Result<(), String> {
        let dev = self.dev.lock().unwrap();
        let markup = CString::new(if side == 0 { "A:0" } else { "B:0" }).unwrap();
        unsafe {
            let mut spec: UhdSubdevSpecHandle = ptr::null_mut();
            check(
                uhd_subdev_spec_make(&mut spec, markup.as_ptr()),
                "uhd_subdev_spec_make",
            )?;
            let r = uhd_usrp_set_rx_subdev_spec(dev.usrp, spec, 0);
            uhd_subdev_spec_free(&mut spec);
            check(r, "uhd_usrp_set_rx_subdev_spec")
        }
    }
}

impl Drop for UsrpSource {
    fn drop(&mut self) {
        self.issue_stream_cmd(UHD_STREAM_MODE_STOP_CONTINUOUS);
        let mut dev = self.dev.lock().unwrap();
        unsafe {
            uhd_rx_metadata_free(&mut dev.metadata);
            uhd_rx_streamer_free(&mut dev.streamer);
            uhd_usrp_free(&mut dev.usrp);
        }
    }
}
