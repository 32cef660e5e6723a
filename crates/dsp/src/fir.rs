//! Direct-form convolution, correlation and fractional delay.
//!
//! The "nodelay" variants return an output the same length as the input,
//! shifted by (h_len - 1) / 2 to simulate a centered impulse response.

use num_complex::Complex32;
use std::f32::consts::PI;

use crate::interp::{sinc, COMMON_FILTER_LEN};

/// Full linear convolution; output length is `s.len() + h.len() - 1`.
pub fn convolve(s: &[Complex32], h: &[Complex32]) -> Vec<Complex32> {
    let len = s.len() + h.len() - 1;
    let mut y = vec![Complex32::new(0.0, 0.0); len];

    for n in 0..len {
        for i in 0..s.len() {
            if i > n {
                break;
            }
            if n < h.len() + i {
                y[n] += s[i] * h[n - i];
            }
        }
    }
    y
}

/// Centered convolution; output length equals `s.len()`.
pub fn convolve_nodelay(s: &[Complex32], h: &[Complex32]) -> Vec<Complex32> {
    let d = (h.len() - 1) / 2;
    let mut y = vec![Complex32::new(0.0, 0.0); s.len()];

    for n in 0..s.len() {
        for i in 0..s.len() {
            if i > n + d {
                break;
            }
            if n + d < h.len() + i {
                y[n] += s[i] * h[n + d - i];
            }
        }
    }
    y
}

/// Full correlation of `s1` against the conjugated, time-reversed `s2`;
/// output length is `s1.len() + s2.len() - 1`.
pub fn correlate(s1: &[Complex32], s2: &[Complex32]) -> Vec<Complex32> {
    let len = s1.len() + s2.len() - 1;
    let mut y = vec![Complex32::new(0.0, 0.0); len];

    for n in 0..len {
        for i in 0..s1.len() {
            if i > n {
                break;
            }
            if n < s2.len() + i {
                y[n] += s1[i] * s2[s2.len() - 1 + i - n].conj();
            }
        }
    }
    y
}

/// Centered correlation; output length equals `s1.len()`.
pub fn correlate_nodelay(s1: &[Complex32], s2: &[Complex32]) -> Vec<Complex32> {
    let d = (s2.len() - 1) / 2;
    let mut y = vec![Complex32::new(0.0, 0.0); s1.len()];

    for n in 0..s1.len() {
        for i in 0..s1.len() {
            if i > n + d {
                break;
            }
            if n + d < s2.len() + i {
                y[n] += s1[i] * s2[s2.len() - 1 + i - n - d].conj();
            }
        }
    }
    y
}

/// Delay `v` in place by a fractional number of samples.  Positive `toa`
/// moves the signal later in time; the guard period is assumed to absorb
/// whatever falls off the end.
pub fn delay(v: &mut [Complex32], toa: f32) {
    let ids = toa.floor() as i64;
    let fds = toa - ids as f32;

    // fractional part via a shifted-sinc filter, when it matters
    let filtered = if fds >= 0.01 {
        let center = ((COMMON_FILTER_LEN - 1) / 2) as f32;
        let h: Vec<Complex32> = (0..COMMON_FILTER_LEN)
            .map(|i| Complex32::new(sinc(PI * (i as f32 - center - fds)), 0.0))
            .collect();
        Some(convolve_nodelay(v, &h))
    } else {
        None
    };

    // integer part
    let v_len = v.len() as i64;
    match &filtered {
        Some(u) => {
            if ids < 0 {
                let shift = ((-ids) as usize).min(v.len());
                let keep = (v_len + ids).max(0) as usize;
                for i in 0..keep {
                    v[i] = u[i + shift];
                }
                for c in v[keep..].iter_mut() {
                    *c = Complex32::new(0.0, 0.0);
                }
            } else {
                let shift = (ids as usize).min(v.len());
                for i in (shift..v.len()).rev() {
                    v[i] = u[i - shift];
                }
                for c in v[..shift].iter_mut() {
                    *c = Complex32::new(0.0, 0.0);
                }
            }
        }
        None => {
            if ids < 0 {
                let shift = ((-ids) as usize).min(v.len());
                let keep = (v_len + ids).max(0) as usize;
                v.copy_within(shift.., 0);
                for c in v[keep..].iter_mut() {
                    *c = Complex32::new(0.0, 0.0);
                }
            } else if ids > 0 {
                let shift = (ids as usize).min(v.len());
                let keep = v.len() - shift;
                v.copy_within(..keep, shift);
                for c in v[..shift].iter_mut() {
                    *c = Complex32::new(0.0, 0.0);
                }
            }
        }
    }
}

/// Polyphase rational resampling: interpolate by `l`, decimate by `m`,
/// filtering with the centered prototype `h`.
pub fn polyphase_resample(
    s: &[Complex32],
    l: usize,
    m: usize,
    h: &[Complex32],
) -> Vec<Complex32> {
    let v_len = (s.len() as f64 * l as f64 / m as f64).ceil() as usize;
    let d = (h.len() - 1) / 2;
    let mut v = vec![Complex32::new(0.0, 0.0); v_len];

    for i in 0..v_len {
        for j in 0..s.len() {
            if l * j > m * i + d {
                break;
            }
            if m * i + d < h.len() + l * j {
                v[i] += s[j] * h[m * i + d - l * j];
            }
        }
    }
    v
}
