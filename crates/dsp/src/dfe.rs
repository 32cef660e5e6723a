//! Channel estimation and MMSE decision-feedback equalization.
//!
//! The designer follows Al-Dhahir and Cioffi, "Fast Computation of
//! Channel-Estimate Based Equalizers in Packet Data Transmission",
//! symbol-spaced case: a Cholesky-style iteration on the row pair
//! (Gl, Gr) builds the column of L that yields the feedback filter, and a
//! back-substitution recovers the feedforward taps.

use num_complex::Complex32;

use crate::fir::convolve;
use crate::gmsk::slice_soft;
use crate::rotator::{rotator, rrotator, ROTATOR_LEN};
use crate::vectornorm2;

/// A designed equalizer: `feedforward` of the requested `Nf` taps and
/// `feedback` of channel-memory length.  Immutable once designed.
#[derive(Debug, Clone)]
pub struct DfeFilter {
    pub feedforward: Vec<Complex32>,
    pub feedback: Vec<Complex32>,
}

/// Select the `c_len`-tap window of the correlation `a` around the peak
/// with the most energy, normalized by the correlation peak gain.
///
/// A later window replaces the current best whenever its energy exceeds
/// 95% of it; keep the threshold as is.
pub fn generate_channel_response(
    a: &[Complex32],
    c_len: usize,
    toa: f32,
    peak: Complex32,
) -> Option<Vec<Complex32>> {
    if c_len == 0 || a.is_empty() {
        log::error!("generate_channel_response: empty input");
        return None;
    }

    let u_toa = toa.round().max(0.0) as usize;
    let mut max_energy = -1.0f32;
    let mut max_i = 0usize;

    for i in 0..c_len {
        if u_toa + i < c_len - 1 || u_toa + i > a.len() - 1 {
            continue;
        }
        let start = u_toa + i + 1 - c_len;
        let energy = vectornorm2(&a[start..start + c_len]);
        if energy > 0.95 * max_energy {
            max_i = i;
            max_energy = energy;
        }
    }

    if max_energy < 0.0 {
        log::error!("could not generate a {}-tap channel response", c_len);
        return None;
    }

    let start = u_toa + max_i + 1 - c_len;
    let gain = Complex32::new(1.0, 0.0) / peak;
    Some(a[start..start + c_len].iter().map(|&c| c * gain).collect())
}

/// Design an `nf`-tap MMSE decision-feedback equalizer for the channel
/// response `h` at the given SNR estimate.
pub fn design_dfe(h: &[Complex32], snr: f32, nf: usize) -> Result<DfeFilter, String> {
    if nf < 2 {
        return Err("design_dfe: feedforward taps must be >= 2".to_string());
    }
    if h.is_empty() {
        return Err("design_dfe: empty channel response".to_string());
    }

    // channel memory
    let nu = h.len() - 1;

    // G_0(D) = [ 1/sqrt(SNR) & h^*(D^*) ] = [ Gl & Gr ]
    let mut gl = vec![Complex32::new(0.0, 0.0); nu + 1];
    gl[0] = Complex32::new(1.0 / snr.sqrt(), 0.0);
    let mut gr: Vec<Complex32> = h.iter().map(|c| c.conj()).collect();

    // L is stored transposed: l[column][row]
    let mut l = vec![vec![Complex32::new(0.0, 0.0); nf + nu]; nf];

    for i in 0..nf {
        // d_i = |G_i(0)|^2
        let d = gl[0].norm_sqr() + gr[0].norm_sqr();

        // l_i(D) = D^i G_i(D) G_i^*(0) / d_i
        for j in 0..=nu {
            l[i][i + j] = (gl[j] * gl[0].conj() + gr[j] * gr[0].conj()) / d;
        }

        // k_i = beta_i / alpha_i
        // D G_{i+1}(D) = G_i(D) [ D & -k_i \\ k_i^* D & 1 ]
        if i != nf - 1 {
            let k = gr[0] / gl[0];

            let tgl: Vec<Complex32> = gl
                .iter()
                .zip(gr.iter())
                .map(|(&a, &b)| a + k.conj() * b)
                .collect();
            let mut tgr: Vec<Complex32> = gl
                .iter()
                .zip(gr.iter())
                .map(|(&a, &b)| b - k * a)
                .collect();

            // factor out D
            for t in 0..nu {
                tgr[t] = tgr[t + 1];
            }
            tgr[nu] = Complex32::new(0.0, 0.0);

            let scale = 1.0 / (1.0 + k.norm_sqr()).sqrt();
            gl = tgl.iter().map(|&c| c * scale).collect();
            gr = tgr.iter().map(|&c| c * scale).collect();
        }
    }

    // G was not refactored on the last pass, so d keeps its final value.
    let d = gl[0].norm_sqr() + gr[0].norm_sqr();

    // The Nf-th column of L is [ 0 .. 0 1 b_1 .. b_nu ]; the feedback
    // filter is -b^*.
    let feedback: Vec<Complex32> = (0..nu).map(|j| -l[nf - 1][nf + j].conj()).collect();

    // Back-substitute for v, then w_i = sum v[k+i] h^*[k] / d.
    let mut v = vec![Complex32::new(0.0, 0.0); nf];
    v[nf - 1] = Complex32::new(1.0, 0.0);
    for k in (0..nf - 1).rev() {
        let mut v_k = Complex32::new(0.0, 0.0);
        for j in k + 1..nf {
            v_k -= l[k][j] * v[j];
        }
        v[k] = v_k;
    }

    let mut feedforward = vec![Complex32::new(0.0, 0.0); nf];
    for i in 0..nf {
        let j = nu.min(nf - 1 - i);
        let mut w_i = Complex32::new(0.0, 0.0);
        for k in 0..=j {
            w_i += v[k + i] * h[k].conj();
        }
        feedforward[i] = w_i / d;
    }

    Ok(DfeFilter {
        feedforward,
        feedback,
    })
}

/// Equalize symbol-spaced samples with a designed DFE and return soft bits.
///
/// The feedforward convolution is trimmed causally (the first ff_len - 1
/// output samples are dropped); past hard decisions feed back re-rotated so
/// they line up with the incoming pi/2-rotated symbols.
pub fn equalize(v: &[Complex32], filter: &DfeFilter) -> Vec<f32> {
    let ff = &filter.feedforward;
    let fb = &filter.feedback;
    assert!(
        v.len() <= ROTATOR_LEN,
        "equalize: {} samples exceed rotator table",
        v.len()
    );

    let full = convolve(v, ff);
    let mut p: Vec<Complex32> = full[ff.len() - 1..ff.len() - 1 + v.len()].to_vec();

    let rot = rotator();
    let rrot = rrotator();
    let mut dfe_output = vec![Complex32::new(0.0, 0.0); v.len()];

    for i in 0..p.len() {
        // earlier decisions affect the current value
        for j in 0..fb.len().min(i) {
            p[i] = p[i] + fb[j] * p[i - j - 1];
        }

        // de-rotate for output
        p[i] *= rrot[i];
        dfe_output[i] = p[i];

        // hard decision, rotated back in line with the incoming data
        p[i] = if p[i].re > 0.0 {
            Complex32::new(1.0, 0.0)
        } else {
            Complex32::new(-1.0, 0.0)
        };
        p[i] *= rot[i];
    }

    slice_soft(&dfe_output)
}
