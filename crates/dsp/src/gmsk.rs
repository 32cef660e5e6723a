//! GMSK modulation and bit slicing.

use num_complex::Complex32;
use std::sync::OnceLock;

use crate::fir::convolve_nodelay;
use crate::rotator::gmsk_rotate;
use crate::vectornorm2;

static GAUSSIAN_PULSE: OnceLock<Vec<Complex32>> = OnceLock::new();

/// Gaussian pulse for BT = 0.3, normalized to unit energy per symbol.
pub fn generate_gaussian_pulse(sps: f32) -> Vec<Complex32> {
    let num_samples = (2.0 * sps + 1.0).ceil() as usize;
    let center = ((num_samples - 1) / 2) as f32;

    let mut pulse: Vec<Complex32> = (0..num_samples)
        .map(|i| {
            let arg = (i as f32 - center) / sps;
            let v = 0.96 * (-1.1380 * arg * arg - 0.527 * arg.powi(4)).exp();
            Complex32::new(v, 0.0)
        })
        .collect();

    let avg_abs_val = (vectornorm2(&pulse) / sps).sqrt();
    for c in &mut pulse {
        *c /= avg_abs_val;
    }
    pulse
}

/// The cached symbol-spaced pulse shared by every `modulate` call.
fn gaussian_pulse() -> &'static [Complex32] {
    GAUSSIAN_PULSE.get_or_init(|| generate_gaussian_pulse(1.0))
}

/// GMSK-modulate a bit vector: polarize to +-1, expand to an impulse train
/// at `sps` samples per symbol, pi/2-rotate, and shape with the Gaussian
/// pulse.  `guard_len` extra bit periods are appended so the pulse tail has
/// room.
pub fn modulate(bits: &[u8], guard_len: usize, sps: f32) -> Result<Vec<Complex32>, String> {
    let len = (sps * (bits.len() + guard_len) as f32).ceil() as usize;
    let stride = sps.floor() as usize;

    let mut v = vec![Complex32::new(0.0, 0.0); len];
    for (k, &b) in bits.iter().enumerate() {
        v[stride * k] = Complex32::new(1.0 - 2.0 * b as f32, 0.0);
    }

    gmsk_rotate(&mut v, 0)?;

    Ok(convolve_nodelay(&v, gaussian_pulse()))
}

/// Soft slice: map symbol values to [0, 1] where 0 means a strong 1 bit.
/// GSM polarity: bit b is transmitted as 1 - 2b.
pub fn slice_soft(v: &[Complex32]) -> Vec<f32> {
    v.iter()
        .map(|c| ((1.0 - c.re) / 2.0).clamp(0.0, 1.0))
        .collect()
}

/// Hard slice of soft values in [0, 1].
pub fn slice_bits(s: &[f32]) -> Vec<u8> {
    s.iter().map(|&v| (v > 0.5) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotator::gmsk_rrotate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn pulse_has_odd_length_and_unit_energy_per_symbol() {
        for sps in [1.0f32, 2.0, 4.0] {
            let p = generate_gaussian_pulse(sps);
            assert_eq!(p.len(), (2.0 * sps + 1.0).ceil() as usize);
            let energy = vectornorm2(&p) / sps;
            assert!((energy - 1.0).abs() < 1e-5, "sps {}: energy {}", sps, energy);
            // symmetric around the center
            let c = (p.len() - 1) / 2;
            assert!((p[c - 1].re - p[c + 1].re).abs() < 1e-6);
        }
    }

    #[test]
    fn modulate_roundtrip_random_bits() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..20 {
            let bits: Vec<u8> = (0..64).map(|_| rng.gen_range(0..2u8)).collect();
            let mut m = modulate(&bits, 4, 1.0).unwrap();
            gmsk_rrotate(&mut m).unwrap();
            let sliced = slice_bits(&slice_soft(&m));
            // skip the pulse transient at either edge
            assert_eq!(&sliced[1..63], &bits[1..63]);
        }
    }

    #[test]
    fn fcch_bits_modulate_to_pure_tone() {
        // All-zero bits rotate through +1, +j, -1, -j: a tone at fs/4.
        let bits = vec![0u8; 64];
        let m = modulate(&bits, 0, 1.0).unwrap();
        let expect_period = 4;
        for i in 8..56 {
            let a = m[i];
            let b = m[i + expect_period];
            assert!((a - b).norm() < 1e-4, "tone not periodic at {}", i);
        }
        // phase advances by about pi/2 per sample
        let dphi = (m[21] * m[20].conj()).arg();
        assert!((dphi - std::f32::consts::FRAC_PI_2).abs() < 0.05);
    }

    #[test]
    fn soft_slice_clamps_and_maps_polarity() {
        let v = [
            Complex32::new(1.0, 0.3),
            Complex32::new(-1.0, -0.2),
            Complex32::new(3.0, 0.0),
            Complex32::new(-3.0, 0.0),
        ];
        let s = slice_soft(&v);
        assert!((s[0] - 0.0).abs() < 1e-6);
        assert!((s[1] - 1.0).abs() < 1e-6);
        assert_eq!(s[2], 0.0);
        assert_eq!(s[3], 1.0);
        assert_eq!(slice_bits(&s), vec![0, 1, 0, 1]);
    }
}
