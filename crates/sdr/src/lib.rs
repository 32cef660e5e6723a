pub mod buffer;
pub mod file;
pub mod memory;

#[cfg(feature = "usrp")]
pub mod usrp;

use num_complex::Complex32;

pub use buffer::CircularBuffer;

/// Received samples are scaled to int16 full range before buffering; the
/// detection thresholds downstream are calibrated against this.
pub const SAMPLE_SCALE: f32 = 32767.0;

/// A block of complex baseband samples handed from a producer thread to the
/// consumer side of a source, with the number of hardware overrun events
/// observed while producing it.
pub struct SampleBlock {
    pub samples: Vec<Complex32>,
    pub overruns: u32,
}

/// Antenna selection, by port name or index.
#[derive(Debug, Clone)]
pub enum Antenna {
    Index(usize),
    Name(String),
}

/// Pull-based contract for a stream of complex baseband samples.
///
/// Samples obtained from successive `peek`s are contiguous iff no overrun
/// was reported between them.  After an overrun the caller must `flush` and
/// restart whatever detection was in flight.
pub trait SampleSource {
    /// Sample rate in Hz.
    fn sample_rate(&self) -> f64;

    /// The buffer samples are filled into; the caller peeks and purges it.
    fn buffer(&mut self) -> &mut CircularBuffer;

    /// Block until at least `num_samples` samples are available in the
    /// buffer, or until the buffer is full.  Returns the number of overrun
    /// events seen since the last call.
    fn fill(&mut self, num_samples: usize) -> Result<u32, String>;

    /// Drain anything pending upstream and empty the buffer.
    fn flush(&mut self);

    fn start(&mut self);
    fn stop(&mut self);

    /// Tune to `freq` Hz.  Fails when the device cannot reach the requested
    /// frequency to within 1 Hz.
    fn tune(&mut self, freq: f64) -> Result<(), String>;

    /// Gain as a fraction 0..1 of the device range.
    fn set_gain(&mut self, gain: f64) -> Result<(), String>;

    fn set_antenna(&mut self, antenna: &Antenna) -> Result<(), String>;

    /// Daughterboard side: 0 = A, 1 = B.
    fn set_subdev(&mut self, side: u8) -> Result<(), String>;

    /// Convenience: fill, copy out `buf.len()` samples and purge them.
    /// Returns the number of samples actually copied.
    fn read(&mut self, buf: &mut [Complex32]) -> Result<usize, String> {
        self.fill(buf.len())?;
        let cb = self.buffer();
        let avail = cb.peek();
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        cb.purge(n);
        Ok(n)
    }
}
