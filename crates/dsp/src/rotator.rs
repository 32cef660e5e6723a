//! Cached pi/2 rotator tables.
//!
//! GMSK transmit rotates symbol k by exp(j*pi/2*k); receive undoes it.  The
//! tables are process-wide, initialized once and never mutated.

use num_complex::Complex32;
use std::f32::consts::FRAC_PI_2;
use std::sync::OnceLock;

pub const ROTATOR_LEN: usize = 1024;

static ROTATOR: OnceLock<Vec<Complex32>> = OnceLock::new();
static RROTATOR: OnceLock<Vec<Complex32>> = OnceLock::new();

/// Forward rotator table: exp(+j * pi/2 * (n mod 4)).
pub fn rotator() -> &'static [Complex32] {
    ROTATOR.get_or_init(|| {
        (0..ROTATOR_LEN)
            .map(|i| Complex32::from_polar(1.0, FRAC_PI_2 * (i % 4) as f32))
            .collect()
    })
}

/// Reverse rotator table: exp(-j * pi/2 * (n mod 4)).
pub fn rrotator() -> &'static [Complex32] {
    RROTATOR.get_or_init(|| {
        (0..ROTATOR_LEN)
            .map(|i| Complex32::from_polar(1.0, -FRAC_PI_2 * (i % 4) as f32))
            .collect()
    })
}

/// Rotate `v` in place, starting at table position `offset`.
pub fn gmsk_rotate(v: &mut [Complex32], offset: usize) -> Result<(), String> {
    if offset + v.len() > ROTATOR_LEN {
        return Err(format!(
            "gmsk_rotate: {} samples at offset {} exceed rotator table",
            v.len(),
            offset
        ));
    }
    for (c, r) in v.iter_mut().zip(&rotator()[offset..]) {
        *c *= r;
    }
    Ok(())
}

/// Reverse-rotate `v` in place.
pub fn gmsk_rrotate(v: &mut [Complex32]) -> Result<(), String> {
    if v.len() > ROTATOR_LEN {
        return Err(format!(
            "gmsk_rrotate: {} samples exceed rotator table",
            v.len()
        ));
    }
    for (c, r) in v.iter_mut().zip(rrotator()) {
        *c *= r;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_cycle_every_four() {
        let rot = rotator();
        assert_eq!(rot.len(), ROTATOR_LEN);
        assert!((rot[0] - Complex32::new(1.0, 0.0)).norm() < 1e-6);
        assert!((rot[1] - Complex32::new(0.0, 1.0)).norm() < 1e-6);
        assert!((rot[2] - Complex32::new(-1.0, 0.0)).norm() < 1e-6);
        assert!((rot[3] - Complex32::new(0.0, -1.0)).norm() < 1e-6);
        for i in 0..ROTATOR_LEN {
            assert!((rot[i] - rot[i % 4]).norm() < 1e-6);
        }
    }

    #[test]
    fn rotate_then_rrotate_is_identity() {
        let orig: Vec<Complex32> = (0..ROTATOR_LEN)
            .map(|i| Complex32::new(i as f32 * 0.5, -(i as f32)))
            .collect();
        let mut v = orig.clone();
        gmsk_rotate(&mut v, 0).unwrap();
        gmsk_rrotate(&mut v).unwrap();
        for (a, b) in v.iter().zip(orig.iter()) {
            assert!((a - b).norm() < 1e-3);
        }
    }

    #[test]
    fn oversized_buffers_are_rejected() {
        let mut v = vec![Complex32::new(1.0, 0.0); ROTATOR_LEN + 1];
        assert!(gmsk_rotate(&mut v, 0).is_err());
        assert!(gmsk_rrotate(&mut v).is_err());
        let mut w = vec![Complex32::new(1.0, 0.0); 16];
        assert!(gmsk_rotate(&mut w, ROTATOR_LEN - 8).is_err());
    }
}
