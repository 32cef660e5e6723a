pub mod burst;
pub mod dfe;
pub mod fcch;
pub mod fir;
pub mod gmsk;
pub mod interp;
pub mod rotator;

pub use burst::{demod_burst, ModulatedTsc};
pub use dfe::{design_dfe, equalize, generate_channel_response, DfeFilter};
pub use fcch::FcchDetector;

use num_complex::Complex32;

/// Total energy of a sample vector.
pub fn vectornorm2(v: &[Complex32]) -> f32 {
    v.iter().map(|c| c.norm_sqr()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectornorm2_sums_power() {
        let v = [Complex32::new(3.0, 4.0), Complex32::new(0.0, 2.0)];
        assert!((vectornorm2(&v) - 29.0).abs() < 1e-6);
        assert_eq!(vectornorm2(&[]), 0.0);
    }
}
