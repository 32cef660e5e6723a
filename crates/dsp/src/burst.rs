//! Burst demodulation against a known training sequence.

use num_complex::Complex32;
use std::f32::consts::FRAC_PI_2;

use cs_protocol::DATA_LEN;

use crate::dfe::{design_dfe, generate_channel_response, DfeFilter};
use crate::fir::{correlate_nodelay, delay};
use crate::gmsk::modulate;
use crate::interp::{peak2mean, peak_detect};

/// Channel response length used when no equalizer is supplied.
pub const DEFAULT_CR_LEN: usize = 6;
/// Feedforward tap count used when no equalizer is supplied.
pub const DEFAULT_DFE_TAPS: usize = 5;

/// Correlation peaks below this peak-to-mean ratio are not bursts.
const SNR_THRESHOLD: f32 = 3.0;

/// A modulated training sequence ready to correlate against incoming
/// bursts.  Generated once per TSC and reused.
pub struct ModulatedTsc {
    pub samples: Vec<Complex32>,
    /// Correlation-peak position of the midamble relative to burst start.
    pub toa: f32,
    /// Complex gain at the correlation peak.
    pub gain: Complex32,
}

impl ModulatedTsc {
    /// Modulate a training sequence and rotate it to match its position
    /// inside the transmitted burst.
    pub fn generate(sps: f32, tsc: &[u8], tsc_offset: usize) -> Result<Self, String> {
        let mut samples = modulate(tsc, 0, sps)?;

        let rot = Complex32::from_polar(1.0, FRAC_PI_2 * (tsc_offset % 4) as f32);
        for c in &mut samples {
            *c *= rot;
        }

        Ok(Self {
            samples,
            toa: tsc.len() as f32 / 2.0 + tsc_offset as f32,
            gain: Complex32::new(tsc.len() as f32, 0.0),
        })
    }
}

/// Demodulate one burst into soft bits.
///
/// Correlates `s` against the training sequence, estimates TOA and SNR,
/// aligns the burst to sample zero and equalizes it.  When `dfe` is empty
/// a channel response is estimated from the correlation and an equalizer is
/// designed and stored there for reuse.
///
/// Returns soft bits covering the burst (data, midamble and tails), or
/// None when no burst is present.
pub fn demod_burst(
    sps: f32,
    s: &[Complex32],
    mtsc: &ModulatedTsc,
    dfe: &mut Option<DfeFilter>,
    cr_len: usize,
    dfe_taps: usize,
) -> Option<Vec<f32>> {
    if (s.len() as f32) < sps * DATA_LEN as f32 {
        log::error!("demod_burst: not enough samples");
        return None;
    }

    let c = correlate_nodelay(s, &mtsc.samples);
    let peak = peak_detect(&c);

    let snr = peak2mean(&c, peak.value, peak.index.round() as usize, 4)?;
    if snr < SNR_THRESHOLD {
        log::debug!("demod_burst: no burst (snr {:.2})", snr);
        return None;
    }

    let adjusted_toa = peak.index - mtsc.toa;

    // A negative arrival means the start of the burst is missing; the
    // 3-bit guard absorbs a little of it.
    if adjusted_toa < -2.0 {
        return None;
    }
    if (s.len() as f32) < DATA_LEN as f32 * sps + adjusted_toa + 2.0 {
        return None;
    }

    if dfe.is_none() {
        let cr = generate_channel_response(&c, cr_len, peak.index, mtsc.gain)?;
        match design_dfe(&cr, snr, dfe_taps) {
            Ok(f) => *dfe = Some(f),
            Err(e) => {
                log::error!("{}", e);
                return None;
            }
        }
    }
    let filter = dfe.as_ref().expect("equalizer just designed");

    // center the burst for equalization
    let v_len = (DATA_LEN as f32 * sps + adjusted_toa + 2.0).ceil() as usize;
    let mut v = s[..v_len].to_vec();
    delay(&mut v, -adjusted_toa);

    Some(crate::dfe::equalize(&v, filter))
}
