use num_complex::Complex32;

/// Fixed-capacity sample buffer with contiguous peek.
///
/// Single producer, single consumer, both on the pipeline's control thread.
/// `data_available() + space_available() == capacity()` holds at all times.
pub struct CircularBuffer {
    data: Vec<Complex32>,
    start: usize,
    capacity: usize,
}

impl CircularBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            start: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn data_available(&self) -> usize {
        self.data.len() - self.start
    }

    pub fn space_available(&self) -> usize {
        self.capacity - self.data_available()
    }

    /// Append up to `samples.len()` samples; returns how many fit.
    pub fn write(&mut self, samples: &[Complex32]) -> usize {
        let n = samples.len().min(self.space_available());
        if n == 0 {
            return 0;
        }
        // Compact consumed head space before appending past the allocation.
        if self.data.len() + n > self.capacity && self.start > 0 {
            self.data.drain(..self.start);
            self.start = 0;
        }
        self.data.extend_from_slice(&samples[..n]);
        n
    }

    /// All currently buffered samples, oldest first, contiguous.
    pub fn peek(&self) -> &[Complex32] {
        &self.data[self.start..]
    }

    /// Discard the oldest `n` samples.
    pub fn purge(&mut self, n: usize) {
        self.start = (self.start + n).min(self.data.len());
        if self.start == self.data.len() {
            self.data.clear();
            self.start = 0;
        }
    }

    pub fn flush(&mut self) {
        self.data.clear();
        self.start = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<Complex32> {
        (0..n).map(|i| Complex32::new(i as f32, -(i as f32))).collect()
    }

    #[test]
    fn write_peek_purge() {
        let mut cb = CircularBuffer::new(16);
        assert_eq!(cb.write(&samples(10)), 10);
        assert_eq!(cb.data_available(), 10);
        assert_eq!(cb.peek()[3].re, 3.0);

        cb.purge(4);
        assert_eq!(cb.data_available(), 6);
        assert_eq!(cb.peek()[0].re, 4.0);
    }

    #[test]
    fn capacity_invariant_holds() {
        let mut cb = CircularBuffer::new(8);
        for step in 0..50 {
            let w = cb.write(&samples(3));
            assert!(w <= 3);
            cb.purge(if step % 2 == 0 { 2 } else { 3 });
            assert_eq!(
                cb.data_available() + cb.space_available(),
                cb.capacity(),
                "invariant broken at step {}",
                step
            );
        }
    }

    #[test]
    fn write_truncates_at_capacity() {
        let mut cb = CircularBuffer::new(8);
        assert_eq!(cb.write(&samples(12)), 8);
        assert_eq!(cb.space_available(), 0);
        assert_eq!(cb.write(&samples(1)), 0);
    }

    #[test]
    fn compaction_preserves_order() {
        let mut cb = CircularBuffer::new(8);
        cb.write(&samples(8));
        cb.purge(5);
        // Appending now forces the consumed head to be reclaimed.
        let more: Vec<Complex32> = (100..104).map(|i| Complex32::new(i as f32, 0.0)).collect();
        assert_eq!(cb.write(&more), 4);
        let got: Vec<f32> = cb.peek().iter().map(|c| c.re).collect();
        assert_eq!(got, vec![5.0, 6.0, 7.0, 100.0, 101.0, 102.0, 103.0]);
    }

    #[test]
    fn flush_empties() {
        let mut cb = CircularBuffer::new(8);
        cb.write(&samples(5));
        cb.flush();
        assert_eq!(cb.data_available(), 0);
        assert_eq!(cb.space_available(), 8);
        assert!(cb.peek().is_empty());
    }
}
