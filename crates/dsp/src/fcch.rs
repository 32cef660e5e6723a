//! Frequency-correction burst detector.
//!
//! Based on the adaptive-filter algorithm of Varma, Sahu and Prabhu Charan,
//! "Robust Frequency Burst Detection Algorithm for GSM / GPRS": a linear
//! predictor tracks the input, and its normalized prediction error drops in
//! the neighborhood of a pure tone.  Each sufficiently long low-error run
//! is confirmed by an FFT peak-to-mean test before it counts as a
//! detection.

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use cs_protocol::{DATA_LEN, GSM_RATE};
use cs_sdr::CircularBuffer;

use crate::interp::peak_detect;
use crate::vectornorm2;

const FFT_SIZE: usize = 1024;
const FILTER_DELAY: usize = 8;
const INPUT_CB_LEN: usize = 1024;

/// Minimum FFT peak-to-mean ratio accepted as a pure tone.
/// XXX arbitrary, depends on decimation.
const MIN_PM: f32 = 50.0;

/// Outcome of a bulk scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanResult {
    /// Detected tone frequency in Hz relative to the center, when found.
    pub offset: Option<f64>,
    /// Samples consumed through the end of the frequency burst, or the
    /// whole buffer when nothing was found.
    pub consumed: usize,
}

/// Detects low-to-high transitions of a thresholded sequence, reporting the
/// length of each low run as it ends.
struct LowToHigh {
    count: usize,
    sign: i32,
    threshold: f64,
}

impl LowToHigh {
    fn new(threshold: f64) -> Self {
        Self {
            count: 0,
            sign: 1,
            threshold,
        }
    }

    fn step(&mut self, s: f64) -> usize {
        let mut r = 0;
        if s >= self.threshold {
            if self.sign == -1 {
                r = self.count;
                self.sign = 1;
                self.count = 0;
            }
            self.count += 1;
        } else {
            if self.sign == 1 {
                self.sign = -1;
                self.count = 0;
            }
            self.count += 1;
        }
        r
    }

    /// Length of the still-open low run, if any.
    fn open_low_run(&self) -> Option<usize> {
        (self.sign == -1).then_some(self.count)
    }
}

pub struct FcchDetector {
    sample_rate: f64,
    fcch_burst_len: usize,

    /// Prediction horizon: the filter predicts x[n + d].
    d: usize,
    /// Forgetting factor of the leaky error average.
    p: f32,
    /// Normalized-LMS step size, re-bounded from the input energy.
    g: f32,
    /// Leaky average of |e|^2.
    e_avg: f32,
    /// Predictor taps.
    w: Vec<Complex32>,
    /// Pending input samples.
    x: CircularBuffer,

    fft: Arc<dyn Fft<f32>>,
    fft_scratch: Vec<Complex32>,
}

impl FcchDetector {
    /// Default horizon of 12: a 148-bit frequency burst at one sample per
    /// symbol yields a low-error run of about 148 - (w_len - 1) - D
    /// samples, which must stay above the 100-sample minimum.
    pub fn new(sample_rate: f64) -> Self {
        Self::with_params(sample_rate, 12, 1.0 / 32.0, 1.0 / 12.5)
    }

    pub fn with_params(sample_rate: f64, d: usize, p: f32, g: f32) -> Self {
        let w_len = 2 * FILTER_DELAY + 1;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let scratch_len = fft.get_inplace_scratch_len();

        Self {
            sample_rate,
            fcch_burst_len: (DATA_LEN as f64 * (sample_rate / GSM_RATE)) as usize,
            d,
            p,
            g,
            e_avg: 0.0,
            w: vec![Complex32::new(0.0, 0.0); w_len],
            x: CircularBuffer::new(INPUT_CB_LEN),
            fft,
            fft_scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
        }
    }

    pub fn filter_len(&self) -> usize {
        self.w.len()
    }

    /// Lag of the error sequence behind the input: the first error is a
    /// function of x[0] .. x[w_len - 1 + D].
    pub fn delay(&self) -> usize {
        self.w.len() - 1 + self.d
    }

    /// Feed one sample; returns the normalized prediction error once the
    /// predictor has enough history.
    pub fn feed(&mut self, sample: Complex32) -> Option<f32> {
        self.x.write(&[sample]);
        self.next_norm_error()
    }

    /// One predictor update over the buffered input.
    fn next_norm_error(&mut self) -> Option<f32> {
        let w_len = self.w.len();
        let n = w_len - 1;

        let x = self.x.peek();
        if n + self.d >= x.len() {
            return None;
        }

        let e_total = vectornorm2(&x[..w_len]);
        if self.g >= 2.0 / e_total {
            self.g = 1.0 / e_total;
        }

        let mut y = Complex32::new(0.0, 0.0);
        for i in 0..w_len {
            y += self.w[i].conj() * x[n - i];
        }

        let e = x[n + self.d] - y;

        for i in 0..w_len {
            self.w[i] += self.g * e.conj() * x[n - i];
        }

        self.e_avg = (1.0 - self.p) * self.e_avg + self.p * e.norm_sqr();
        let err = self.e_avg / (e_total / w_len as f32);

        self.x.purge(1);
        Some(err)
    }

    /// FFT peak search over a slice: zero-pad, transform, center the
    /// spectrum, and locate the fractional peak bin.  Returns the peak
    /// frequency in Hz and the peak-to-mean power ratio.
    pub fn freq_detect(&mut self, s: &[Complex32]) -> (f64, f32) {
        let mut buf = vec![Complex32::new(0.0, 0.0); FFT_SIZE];
        let len = s.len().min(FFT_SIZE);
        buf[..len].copy_from_slice(&s[..len]);

        self.fft.process_with_scratch(&mut buf, &mut self.fft_scratch);

        // center DC for correct peak detection
        buf.rotate_left(FFT_SIZE / 2);

        let peak = peak_detect(&buf);
        let pm = peak.value.norm_sqr() / peak.avg_power;
        let freq = peak.index as f64 * (self.sample_rate / FFT_SIZE as f64)
            - self.sample_rate / 2.0;
        (freq, pm)
    }

    /// Scan a buffer for a frequency burst.
    ///
    /// 1. drive every sample through the predictor
    /// 2. find neighborhoods with error below 0.7x the buffer average that
    ///    satisfy the minimum burst length
    /// 3. confirm each candidate by FFT peak-to-mean
    ///
    /// On success `consumed` reaches the end of the frequency burst,
    /// accounting for the predictor delay; otherwise the entire buffer has
    /// been consumed.  Bit-equivalent to driving `feed` sample by sample.
    pub fn scan(&mut self, s: &[Complex32]) -> ScanResult {
        let sps = self.sample_rate / GSM_RATE;
        let min_fb_len = (100.0 * sps) as usize;

        self.x.flush();

        let mut errors = Vec::with_capacity(s.len());
        let mut sum = 0.0f64;
        for &sample in s {
            if let Some(e) = self.feed(sample) {
                errors.push(e);
                sum += e as f64;
            }
        }

        let avg = sum / errors.len() as f64;
        let limit = 0.7 * avg;

        let mut lth = LowToHigh::new(limit);
        let check = |y_offset: usize, l_count: usize, this: &mut Self| {
            let y_len = l_count.min(this.fcch_burst_len);
            let (freq, pm) = this.freq_detect(&s[y_offset..y_offset + y_len]);
            (pm > MIN_PM).then(|| ScanResult {
                offset: Some(freq),
                consumed: y_offset + y_len + this.delay(),
            })
        };

        for i in 0..errors.len() {
            let l_count = lth.step(errors[i] as f64);
            if l_count >= min_fb_len {
                if let Some(found) = check(i - l_count, l_count, self) {
                    return found;
                }
            }
        }

        // A burst running into the end of the buffer never sees its
        // low-to-high edge; evaluate the open run too.
        if let Some(l_count) = lth.open_low_run() {
            if l_count >= min_fb_len {
                if let Some(found) = check(errors.len() - l_count, l_count, self) {
                    return found;
                }
            }
        }

        ScanResult {
            offset: None,
            consumed: s.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_protocol::FCCH_FREQ;
    use std::f64::consts::PI;

    fn tone(freq: f64, sample_rate: f64, len: usize, amplitude: f32) -> Vec<Complex32> {
        (0..len)
            .map(|i| {
                let ph = 2.0 * PI * freq * i as f64 / sample_rate;
                Complex32::new(
                    amplitude * ph.cos() as f32,
                    amplitude * ph.sin() as f32,
                )
            })
            .collect()
    }

    #[test]
    fn freq_detect_recovers_tone_frequency() {
        let mut det = FcchDetector::new(GSM_RATE);
        let resolution = GSM_RATE / FFT_SIZE as f64;
        for f in [-60e3, -10e3, 5e3, FCCH_FREQ, 90e3] {
            let s = tone(f, GSM_RATE, 600, 1.0);
            let (got, pm) = det.freq_detect(&s);
            assert!(
                (got - f).abs() < resolution,
                "freq {}: got {} (err {})",
                f,
                got,
                got - f
            );
            assert!(pm > MIN_PM, "freq {}: pm {}", f, pm);
        }
    }

    #[test]
    fn scan_detects_one_second_tone() {
        let mut det = FcchDetector::new(GSM_RATE);
        let s = tone(FCCH_FREQ, GSM_RATE, GSM_RATE as usize, 10000.0);
        let result = det.scan(&s);
        let offset = result.offset.expect("tone not detected");
        assert!(
            (offset - FCCH_FREQ).abs() < 50.0,
            "offset {} (err {})",
            offset,
            offset - FCCH_FREQ
        );
        assert!(result.consumed <= s.len() + det.delay());
    }

    #[test]
    fn scan_of_silence_consumes_everything() {
        let mut det = FcchDetector::new(GSM_RATE);
        let frame_samples = (12.0 * cs_protocol::FRAME_LEN) as usize;
        let s = vec![Complex32::new(0.0, 0.0); frame_samples];
        let result = det.scan(&s);
        assert!(result.offset.is_none());
        assert_eq!(result.consumed, s.len());
    }

    #[test]
    fn scan_of_noise_finds_nothing() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;
        use rand_distr::{Distribution, Normal};

        let mut rng = StdRng::seed_from_u64(5);
        let normal = Normal::new(0.0f32, 1000.0).unwrap();
        let s: Vec<Complex32> = (0..20000)
            .map(|_| Complex32::new(normal.sample(&mut rng), normal.sample(&mut rng)))
            .collect();

        let mut det = FcchDetector::new(GSM_RATE);
        let result = det.scan(&s);
        assert!(result.offset.is_none());
        assert_eq!(result.consumed, s.len());
    }

    #[test]
    fn tone_embedded_in_noise_is_found_with_matching_consumed() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;
        use rand_distr::{Distribution, Normal};

        let mut rng = StdRng::seed_from_u64(11);
        let normal = Normal::new(0.0f32, 30.0).unwrap();
        let mut s: Vec<Complex32> = (0..12000)
            .map(|_| Complex32::new(normal.sample(&mut rng), normal.sample(&mut rng)))
            .collect();
        let burst_start = 4000;
        let burst_len = 148;
        let burst = tone(FCCH_FREQ, GSM_RATE, burst_len, 10000.0);
        for (i, &b) in burst.iter().enumerate() {
            s[burst_start + i] += b;
        }

        let mut det = FcchDetector::new(GSM_RATE);
        let result = det.scan(&s);
        let offset = result.offset.expect("burst not detected");
        assert!((offset - FCCH_FREQ).abs() < 2000.0, "offset {}", offset);
        // consumed lands at the end of the burst plus the predictor lag
        assert!(
            result.consumed >= burst_start + 100
                && result.consumed <= burst_start + burst_len + 2 * det.delay(),
            "consumed {}",
            result.consumed
        );
    }

    #[test]
    fn feed_emits_one_error_per_sample_after_the_lag() {
        let s = tone(FCCH_FREQ, GSM_RATE, 500, 100.0);
        let mut det = FcchDetector::new(GSM_RATE);
        let lag = det.delay();

        let mut produced = 0usize;
        for (i, &sample) in s.iter().enumerate() {
            match det.feed(sample) {
                Some(_) => {
                    assert!(i >= lag, "error emitted at {} before lag {}", i, lag);
                    produced += 1;
                }
                None => assert!(i < lag, "no error at {} past lag {}", i, lag),
            }
        }
        assert_eq!(produced, s.len() - lag);
    }
}
