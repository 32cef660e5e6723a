//! Bandlimited interpolation and peak estimation.

use num_complex::Complex32;
use std::f32::consts::PI;

/// Half-width of the windowed-sinc interpolation kernel (21 taps).
pub const COMMON_FILTER_LEN: usize = 21;

/// sin(x)/x with the removable singularity patched.
pub fn sinc(x: f32) -> f32 {
    if x <= -0.0001 || 0.0001 <= x {
        x.sin() / x
    } else {
        1.0
    }
}

/// Interpolate `s` at the fractional index `s_i` with a 21-tap sinc kernel,
/// clamped to the valid index range at the edges.
pub fn interpolate_point(s: &[Complex32], s_i: f32) -> Complex32 {
    let d = (COMMON_FILTER_LEN - 1) as i64 / 2;
    let mut start = s_i.floor() as i64 - d;
    let mut end = s_i.floor() as i64 + d + 1;
    if start < 0 {
        start = 0;
    }
    if end > s.len() as i64 - 1 {
        end = s.len() as i64 - 1;
    }

    let mut point = Complex32::new(0.0, 0.0);
    for i in start..=end {
        point += s[i as usize] * sinc(PI * (i as f32 - s_i));
    }
    point
}

/// Result of a fractional peak search.
#[derive(Debug, Clone, Copy)]
pub struct Peak {
    /// Fractional index of the maximum.
    pub index: f32,
    /// Interpolated sample at the maximum.
    pub value: Complex32,
    /// Average power of the remaining samples.
    pub avg_power: f32,
}

/// Locate the peak of `|s|^2` to sub-sample resolution.
///
/// The integer maximum seeds a bisection on the interpolated signal: an
/// early and a late probe two samples apart straddle the peak and move
/// toward it in halving steps until the step is below 1/1024.
pub fn peak_detect(s: &[Complex32]) -> Peak {
    let mut max = -1.0f32;
    let mut max_i = -1.0f32;
    let mut sum_power = 0.0f32;

    for (i, c) in s.iter().enumerate() {
        let sample_power = c.norm_sqr();
        sum_power += sample_power;
        if sample_power > max {
            max = sample_power;
            max_i = i as f32;
        }
    }

    let mut early_i = if max_i >= 1.0 { max_i - 1.0 } else { 0.0 };
    let mut late_i = if max_i + 1.0 < s.len() as f32 {
        max_i + 1.0
    } else {
        (s.len() - 1) as f32
    };

    let mut incr = 0.5f32;
    while incr > 1.0 / 1024.0 {
        let early_p = interpolate_point(s, early_i);
        let late_p = interpolate_point(s, late_i);
        if early_p.norm_sqr() < late_p.norm_sqr() {
            early_i += incr;
        } else if early_p.norm_sqr() > late_p.norm_sqr() {
            early_i -= incr;
        } else {
            break;
        }
        incr /= 2.0;
        late_i = early_i + 2.0;
    }

    let mut peak_i = early_i + 1.0;
    if peak_i < 0.0 {
        peak_i = 0.0;
    }
    if peak_i > (s.len() - 1) as f32 {
        peak_i = (s.len() - 1) as f32;
    }
    let value = interpolate_point(s, peak_i);

    Peak {
        index: peak_i,
        value,
        avg_power: (sum_power - value.norm_sqr()) / (s.len() - 1) as f32,
    }
}

/// Estimate SNR as peak over the rms of the correlation samples just
/// outside the peak's shoulder.
///
/// There should be almost no match in the correlation of an offset training
/// sequence, so any strength near the peak is noise.  Fails when fewer than
/// two valley samples fall inside the buffer.
pub fn peak2mean(
    c: &[Complex32],
    peak: Complex32,
    peak_i: usize,
    width: usize,
) -> Option<f32> {
    let mut valley = 0.0f32;
    let mut valley_count = 0usize;

    // these constants aren't the best for all burst types
    for i in 2..2 + width {
        if i <= peak_i {
            valley += c[peak_i - i].norm_sqr();
            valley_count += 1;
        }
        if peak_i + i < c.len() {
            valley += c[peak_i + i].norm_sqr();
            valley_count += 1;
        }
    }

    if valley_count < 2 {
        log::error!("peak2mean: bad valley_count");
        return None;
    }
    let valley = (valley / valley_count as f32).sqrt() + 0.00001;

    Some(peak.norm() / valley)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn sinc_basics() {
        assert_eq!(sinc(0.0), 1.0);
        assert!(sinc(5e-5) == 1.0);
        for k in 1..=4 {
            assert!(sinc(k as f32 * PI).abs() < 1e-5, "sinc({}pi) not ~0", k);
        }
        assert!((sinc(PI / 2.0) - 2.0 / PI).abs() < 1e-6);
    }

    #[test]
    fn interpolation_is_exact_at_integer_indices() {
        let s: Vec<Complex32> = (0..64)
            .map(|i| {
                let ph = 2.0 * PI * 0.037 * i as f32;
                Complex32::new(ph.cos(), ph.sin())
            })
            .collect();
        for i in 10..54 {
            let p = interpolate_point(&s, i as f32);
            let err = (p - s[i]).norm() / s[i].norm();
            assert!(err < 1e-5, "index {}: err {}", i, err);
        }
    }

    #[test]
    fn peak_detect_finds_fractional_maximum() {
        // A sinc pulse centered between samples
        let center = 31.3f32;
        let s: Vec<Complex32> = (0..64)
            .map(|i| Complex32::new(sinc(PI * (i as f32 - center)), 0.0))
            .collect();
        let peak = peak_detect(&s);
        assert!(
            (peak.index - center).abs() < 0.05,
            "peak at {}, expected {}",
            peak.index,
            center
        );
        assert!((peak.value.norm() - 1.0).abs() < 0.05);
    }

    #[test]
    fn peak2mean_separates_tone_from_noise_floor() {
        let mut s = vec![Complex32::new(0.1, 0.0); 64];
        s[30] = Complex32::new(10.0, 0.0);
        let peak = peak_detect(&s);
        let snr = peak2mean(&s, peak.value, 30, 4).unwrap();
        assert!(snr > 50.0, "snr {}", snr);
    }

    #[test]
    fn peak2mean_needs_two_valley_samples() {
        let s = vec![Complex32::new(1.0, 0.0); 2];
        assert!(peak2mean(&s, s[0], 0, 1).is_none());
    }
}
