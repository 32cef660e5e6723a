use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};
use num_complex::Complex32;

use crate::{Antenna, CircularBuffer, SampleBlock, SampleSource, SAMPLE_SCALE};

/// IQ sample format for file input.
#[derive(Debug, Clone, Copy)]
pub enum SampleFormat {
    /// Complex int8: pairs of i8.
    Ci8,
    /// Complex int16: pairs of i16, little-endian.
    Ci16,
    /// Complex float32: pairs of f32, little-endian, full scale 1.0.
    Cf32,
}

impl SampleFormat {
    fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Ci8 => 2,
            SampleFormat::Ci16 => 4,
            SampleFormat::Cf32 => 8,
        }
    }
}

const BLOCK_SAMPLES: usize = 65536;
const CHANNEL_DEPTH: usize = 64;

/// Replays a recorded IQ capture through the pull-based source contract.
///
/// A reader thread converts file blocks into scaled samples and hands them
/// over a bounded channel; `fill` drains the channel into the circular
/// buffer.  File replay never reports hardware overruns, but a full buffer
/// still counts as a local overrun, same as a live source.
pub struct FileSource {
    path: PathBuf,
    format: SampleFormat,
    sample_rate: f64,
    cb: CircularBuffer,
    rx: Option<Receiver<SampleBlock>>,
    reader: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, format: SampleFormat, sample_rate: f64) -> Self {
        Self {
            path: path.into(),
            format,
            sample_rate,
            cb: CircularBuffer::new(1 << 20),
            rx: None,
            reader: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn convert(format: SampleFormat, bytes: &[u8]) -> Vec<Complex32> {
        let bps = format.bytes_per_sample();
        let n = bytes.len() / bps;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let b = &bytes[i * bps..];
            let c = match format {
                SampleFormat::Ci8 => Complex32::new(
                    (b[0] as i8 as f32) * 256.0,
                    (b[1] as i8 as f32) * 256.0,
                ),
                SampleFormat::Ci16 => Complex32::new(
                    i16::from_le_bytes([b[0], b[1]]) as f32,
                    i16::from_le_bytes([b[2], b[3]]) as f32,
                ),
                SampleFormat::Cf32 => Complex32::new(
                    f32::from_le_bytes([b[0], b[1], b[2], b[3]]) * SAMPLE_SCALE,
                    f32::from_le_bytes([b[4], b[5], b[6], b[7]]) * SAMPLE_SCALE,
                ),
            };
            out.push(c);
        }
        out
    }

    fn reader_loop(
        path: PathBuf,
        format: SampleFormat,
        tx: Sender<SampleBlock>,
        stop: Arc<AtomicBool>,
    ) {
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                log::error!("failed to open {}: {}", path.display(), e);
                return;
            }
        };
        let mut reader = BufReader::with_capacity(1 << 20, file);
        let mut buf = vec![0u8; BLOCK_SAMPLES * format.bytes_per_sample()];

        while !stop.load(Ordering::SeqCst) {
            let n = match reader.read(&mut buf) {
                Ok(0) => {
                    log::info!("end of file: {}", path.display());
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    log::error!("read error on {}: {}", path.display(), e);
                    break;
                }
            };
            let samples = Self::convert(format, &buf[..n]);
            if tx
                .send(SampleBlock {
                    samples,
                    overruns: 0,
                })
                .is_err()
            {
                break; // consumer dropped
            }
        }
    }
}

impl SampleSource for FileSource {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn buffer(&mut self) -> &mut CircularBuffer {
        &mut self.cb
    }

    fn fill(&mut self, num_samples: usize) -> Result<u32, String> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| "source not started".to_string())?;

        let mut overruns = 0u32;
        while self.cb.data_available() < num_samples {
            if self.cb.space_available() == 0 {
                log::warn!("local overrun");
                overruns += 1;
                break;
            }
            let block = match rx.recv() {
                Ok(b) => b,
                Err(_) => {
                    if self.cb.data_available() < num_samples {
                        return Err("end of stream".to_string());
                    }
                    break;
                }
            };
            overruns += block.overruns;
            let wrote = self.cb.write(&block.samples);
            if wrote < block.samples.len() {
                overruns += 1;
            }
        }
        Ok(overruns)
    }

    fn flush(&mut self) {
        if let Some(rx) = &self.rx {
            loop {
                match rx.try_recv() {
                    Ok(_) => {}
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        }
        self.cb.flush();
    }

    fn start(&mut self) {
        if self.reader.is_some() {
            return;
        }
        self.stop.store(false, Ordering::SeqCst);
        let (tx, rx) = bounded(CHANNEL_DEPTH);
        let path = self.path.clone();
        let format = self.format;
        let stop = self.stop.clone();
        self.reader = Some(std::thread::spawn(move || {
            Self::reader_loop(path, format, tx, stop)
        }));
        self.rx = Some(rx);
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.rx = None; // disconnect so a blocked send returns
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }

    fn tune(&mut self, freq: f64) -> Result<(), String> {
        log::debug!("file source: ignoring tune to {:.0} Hz", freq);
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

impl Drop for FileSource {
    fn drop(&mut self) {
        self.stop();
    }
}
