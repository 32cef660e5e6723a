use num_complex::Complex32;

use crate::{Antenna, CircularBuffer, SampleSource, SAMPLE_SCALE};

/// Replays a pre-built sample vector through the source contract.  Input
/// samples are unit range and scaled into the int16-range contract on fill.
///
/// Used by the pipeline tests; a flush drops buffered samples but never
/// skips un-replayed ones, so a deterministic stream stays deterministic.
pub struct MemorySource {
    samples: Vec<Complex32>,
    pos: usize,
    sample_rate: f64,
    cb: CircularBuffer,
}

impl MemorySource {
    pub fn new(samples: Vec<Complex32>, sample_rate: f64) -> Self {
        Self {
            samples,
            pos: 0,
            sample_rate,
            cb: CircularBuffer::new(1 << 21),
        }
    }

    /// Samples not yet moved into the buffer.
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.pos
    }
}

impl SampleSource for MemorySource {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn buffer(&mut self) -> &mut CircularBuffer {
        &mut self.cb
    }

    fn fill(&mut self, num_samples: usize) -> Result<u32, String> {
        while self.cb.data_available() < num_samples {
            if self.cb.space_available() == 0 {
                return Ok(1);
            }
            if self.pos >= self.samples.len() {
                return Err("end of stream".to_string());
            }
            let n = (self.samples.len() - self.pos).min(self.cb.space_available()).min(8192);
            let scaled: Vec<Complex32> = self.samples[self.pos..self.pos + n]
                .iter()
                .map(|&c| c * SAMPLE_SCALE)
                .collect();
            let wrote = self.cb.write(&scaled);
            self.pos += wrote;
        }
        Ok(0)
    }

    fn flush(&mut self) {
        self.cb.flush();
    }

    fn start(&mut self) {}
    fn stop(&mut self) {}

    fn tune(&mut self, _freq: f64) -> Result<(), String> {
        Ok(())
    }

    fn set_gain(&mut self, _gain: f64) -> Result<(), String> {
        Ok(())
    }

    fn set_antenna(&mut self, _antenna: &Antenna) -> Result<(), String> {
        Ok(())
    }

    fn set_subdev(&mut self, _side: u8) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_scales_and_advances() {
        let samples = vec![Complex32::new(1.0, 0.0); 100];
        let mut src = MemorySource::new(samples, 1e6);

        src.fill(50).unwrap();
        assert!(src.buffer().data_available() >= 50);
        assert!((src.buffer().peek()[0].re - SAMPLE_SCALE).abs() < 1e-3);
    }

    #[test]
    fn exhausted_stream_errors() {
        let mut src = MemorySource::new(vec![Complex32::new(0.0, 0.0); 10], 1e6);
        assert!(src.fill(20).is_err());
    }

    #[test]
    fn read_copies_and_purges() {
        let samples: Vec<Complex32> =
            (0..64).map(|i| Complex32::new(i as f32 / 64.0, 0.0)).collect();
        let mut src = MemorySource::new(samples, 1e6);

        let mut out = vec![Complex32::default(); 16];
        let n = src.read(&mut out).unwrap();
        assert_eq!(n, 16);
        assert!((out[1].re - SAMPLE_SCALE / 64.0).abs() < 1e-2);

        let mut out2 = vec![Complex32::default(); 16];
        src.read(&mut out2).unwrap();
        assert!((out2[0].re - 16.0 * SAMPLE_SCALE / 64.0).abs() < 1e-2);
    }
}
