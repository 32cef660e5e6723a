//! Acquisition pipeline: frequency-burst search, synchronization-burst
//! capture and frequency-offset statistics.

use std::sync::atomic::{AtomicBool, Ordering};

use num_complex::Complex32;

use cs_dsp::burst::{DEFAULT_CR_LEN, DEFAULT_DFE_TAPS};
use cs_dsp::{demod_burst, vectornorm2, FcchDetector, ModulatedTsc};
use cs_protocol::arfcn::{arfcn_to_freq, Band};
use cs_protocol::bursts::{SB_ETSC, SB_ETS_OS};
use cs_protocol::sch::decode_sch_soft;
use cs_protocol::{BURST_LEN, FCCH_FREQ, FRAME_LEN, GSM_RATE};
use cs_sdr::SampleSource;

/// Scan attempts before giving up on finding a frequency burst.
const MAX_SEARCH: usize = 20;
/// Offset measurements collected by `offset_detect`.
const AVG_COUNT: usize = 100;
/// Outliers trimmed from each end before averaging.
const AVG_THRESHOLD: usize = AVG_COUNT / 10;
/// Offsets beyond this are rejected as misdetections.
const OFFSET_MAX: f64 = 40e3;
/// Consecutive failed scans tolerated before aborting.
const NOTFOUND_MAX: usize = 10;

/// Everything recovered by a full acquisition.
#[derive(Debug, Clone, Copy)]
pub struct Acquisition {
    /// Estimated carrier offset in Hz (detected tone minus FCCH_FREQ).
    pub freq_offset: f64,
    /// Samples consumed during the frequency-burst search.
    pub consumed: usize,
    /// Decoded frame number, when the synchronization burst decoded.
    pub fn_: Option<u32>,
    /// Decoded base station identity code.
    pub bsic: Option<u8>,
}

/// A captured window expected to contain the synchronization burst.
pub struct SchCapture {
    pub window: Vec<Complex32>,
    /// Frequency of the detected FCCH tone, in Hz.
    pub tone_freq: f64,
    /// Samples consumed locating it.
    pub consumed: usize,
}

/// Summary statistics over the trimmed offset measurements.
#[derive(Debug, Clone, Copy)]
pub struct OffsetStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

fn mean_stddev(v: &[f64]) -> (f64, f64) {
    let mean = v.iter().sum::<f64>() / v.len() as f64;
    let var = v.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / v.len() as f64;
    (mean, var.sqrt())
}

/// Fill until `num_samples` contiguous samples are buffered, flushing and
/// refilling whenever an overrun breaks contiguity.
fn fill_contiguous(u: &mut dyn SampleSource, num_samples: usize) -> Result<(), String> {
    loop {
        let overruns = u.fill(num_samples)?;
        if overruns == 0 {
            return Ok(());
        }
        u.flush();
    }
}

/// Capture a buffer window containing the next synchronization burst.
///
/// The sync burst sits one frame after the frequency burst in TN 0.  The
/// scan consumes through the end of the frequency-burst data, so one more
/// frame of samples puts the sync burst in the buffer; a burst of slack on
/// either side covers how far the scan may overshoot.
///
/// Returns Ok(None) when no frequency burst was found in `MAX_SEARCH`
/// windows of 12 frames each.
pub fn get_burst_sch(u: &mut dyn SampleSource) -> Result<Option<SchCapture>, String> {
    let sps = u.sample_rate() / GSM_RATE;
    let fb_mframe_len = ((12.0 * FRAME_LEN + BURST_LEN) * sps).ceil() as usize;
    let frame_len = (FRAME_LEN * sps).ceil() as usize;
    let burst_len = (BURST_LEN * sps).ceil() as usize;

    let mut detector = FcchDetector::new(u.sample_rate());

    u.flush();

    let mut tone_freq = None;
    let mut consumed_total = 0usize;
    for _ in 0..MAX_SEARCH {
        fill_contiguous(u, fb_mframe_len)?;

        let result = detector.scan(u.buffer().peek());
        u.buffer().purge(result.consumed);
        consumed_total += result.consumed;

        if result.offset.is_some() {
            tone_freq = result.offset;
            break;
        }
    }

    let tone_freq = match tone_freq {
        Some(f) => f,
        None => return Ok(None),
    };

    // An overrun between the frequency burst and the next frame breaks the
    // timing relation; the capture is useless.
    let overruns = u.fill(frame_len + burst_len)?;
    if overruns != 0 {
        return Ok(None);
    }

    u.buffer().purge(frame_len - 2 * burst_len);

    Ok(Some(SchCapture {
        window: u.buffer().peek().to_vec(),
        tone_freq,
        consumed: consumed_total,
    }))
}

/// Full acquisition: find the frequency burst, demodulate the following
/// synchronization burst and decode frame number and BSIC.
pub fn acquire(u: &mut dyn SampleSource) -> Result<Option<Acquisition>, String> {
    let sps = (u.sample_rate() / GSM_RATE) as f32;

    let capture = match get_burst_sch(u)? {
        Some(c) => c,
        None => return Ok(None),
    };
    log::info!(
        "frequency burst found, offset {:+.1} Hz, {} samples in",
        capture.tone_freq - FCCH_FREQ,
        capture.consumed
    );

    let mtsc = ModulatedTsc::generate(sps, &SB_ETSC, SB_ETS_OS)?;
    let mut dfe = None;
    let info = demod_burst(
        sps,
        &capture.window,
        &mtsc,
        &mut dfe,
        DEFAULT_CR_LEN,
        DEFAULT_DFE_TAPS,
    )
    .and_then(|soft| decode_sch_soft(&soft));

    Ok(Some(Acquisition {
        freq_offset: capture.tone_freq - FCCH_FREQ,
        consumed: capture.consumed,
        fn_: info.map(|i| i.fn_),
        bsic: info.map(|i| i.bsic),
    }))
}

fn offset_detect_with(
    u: &mut dyn SampleSource,
    detector: &mut FcchDetector,
) -> Result<Option<OffsetStats>, String> {
    let sps = u.sample_rate() / GSM_RATE;
    // 12 frames and a burst guarantee at least one FCCH burst in the window
    let s_len = ((12.0 * FRAME_LEN + BURST_LEN) * sps).ceil() as usize;

    let mut offsets: Vec<f64> = Vec::with_capacity(AVG_COUNT);
    let mut notfound = 0usize;

    while offsets.len() < AVG_COUNT {
        u.flush();
        fill_contiguous(u, s_len)?;

        let result = detector.scan(u.buffer().peek());
        match result.offset {
            Some(f) => {
                let offset = f - FCCH_FREQ;
                if offset.abs() < OFFSET_MAX {
                    offsets.push(offset);
                    notfound = 0;
                } else {
                    notfound += 1;
                }
            }
            None => notfound += 1,
        }
        u.buffer().purge(result.consumed);

        if notfound >= NOTFOUND_MAX {
            return Ok(None);
        }
    }

    offsets.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let trimmed = &offsets[AVG_THRESHOLD..AVG_COUNT - AVG_THRESHOLD];
    let (avg, stddev) = mean_stddev(trimmed);

    Ok(Some(OffsetStats {
        avg,
        min: trimmed[0],
        max: trimmed[trimmed.len() - 1],
        stddev,
    }))
}

/// Measure the receiver's frequency offset against the FCCH tone: collect
/// `AVG_COUNT` detections, drop the top and bottom tenth and report the
/// stats of the rest.
pub fn offset_detect(u: &mut dyn SampleSource) -> Result<Option<OffsetStats>, String> {
    let mut detector = FcchDetector::new(u.sample_rate());
    offset_detect_with(u, &mut detector)
}

fn format_offset(offset: f64) -> String {
    if offset.abs() >= 1000.0 {
        format!("{:+.3}kHz", offset / 1000.0)
    } else {
        format!("{:+.0}Hz", offset)
    }
}

/// Scan a band for C0 carriers: measure per-channel power, keep channels
/// above the average of the quietest 60%, and look for an FCCH burst on
/// each.  With `strict`, every hit is re-measured with `offset_detect`.
pub fn c0_detect(
    u: &mut dyn SampleSource,
    band: Band,
    strict: bool,
    running: &AtomicBool,
) -> Result<(), String> {
    let sps = u.sample_rate() / GSM_RATE;
    let frames_len = ((12.0 * FRAME_LEN + BURST_LEN) * sps).ceil() as usize;

    let mut detector = FcchDetector::new(u.sample_rate());
    let chans: Vec<u16> = band.chans().collect();

    u.start();
    u.flush();

    // power per channel
    // XXX should filter to 200kHz
    let mut power: Vec<f64> = Vec::with_capacity(chans.len());
    for &chan in &chans {
        if !running.load(Ordering::SeqCst) {
            u.stop();
            return Ok(());
        }
        let freq = arfcn_to_freq(chan, band).expect("chan iterator yields in-band arfcns");
        u.tune(freq)?;
        u.flush();
        fill_contiguous(u, frames_len)?;

        let b = u.buffer().peek();
        let n = frames_len.min(b.len());
        power.push((vectornorm2(&b[..n]) as f64).sqrt());
    }

    // Some channels in the band can be extremely noisy (CDMA traffic in
    // GSM-850), so the noisiest 40% stay out of the average.
    let mut spower = power.clone();
    spower.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let keep = spower.len() - 4 * spower.len() / 10;
    let (avg_power, _) = mean_stddev(&spower[..keep]);

    println!("{}:", band);

    let mut idx = 0usize;
    let mut notfound = 0usize;
    while idx < chans.len() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if power[idx] <= avg_power {
            idx += 1;
            continue;
        }

        let chan = chans[idx];
        let freq = arfcn_to_freq(chan, band).expect("in-band arfcn");
        u.tune(freq)?;
        u.flush();
        fill_contiguous(u, frames_len)?;

        let result = detector.scan(u.buffer().peek());
        let offset = result
            .offset
            .map(|f| f - FCCH_FREQ)
            .filter(|o| o.abs() < OFFSET_MAX);

        match offset {
            Some(offset) => {
                if strict {
                    if let Some(stats) = offset_detect_with(u, &mut detector)? {
                        println!(
                            "\tchan: {} ({:.1}MHz {})\tpower: {:6.2}\t[min, max]: [{:.0}, {:.0}]\tstddev: {:.1}",
                            chan,
                            freq / 1e6,
                            format_offset(stats.avg),
                            power[idx],
                            stats.min,
                            stats.max,
                            stats.stddev,
                        );
                    }
                } else {
                    println!(
                        "\tchan: {} ({:.1}MHz {})\tpower: {:6.2}",
                        chan,
                        freq / 1e6,
                        format_offset(offset),
                        power[idx],
                    );
                }
                notfound = 0;
                idx += 1;
            }
            None => {
                notfound += 1;
                if notfound >= NOTFOUND_MAX {
                    notfound = 0;
                    idx += 1;
                }
            }
        }
    }

    u.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_dsp::gmsk::modulate;
    use cs_protocol::bursts::FC_FB_TB;
    use cs_protocol::sch;
    use cs_protocol::DATA_LEN;
    use cs_sdr::memory::MemorySource;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    /// Synthesize a downlink stream: noise floor, one frequency burst, and
    /// the synchronization burst exactly one frame later.
    fn synthesize_stream(
        t1: u32,
        t2: u32,
        t3p: u32,
        bsic: u8,
        fcch_at: usize,
        total: usize,
    ) -> Vec<Complex32> {
        let amplitude = 0.3f32;
        let mut rng = StdRng::seed_from_u64(77);
        let normal = Normal::new(0.0f32, 0.003).unwrap();
        let mut s: Vec<Complex32> = (0..total)
            .map(|_| Complex32::new(normal.sample(&mut rng), normal.sample(&mut rng)))
            .collect();

        // frequency correction burst: all zero bits modulate to a tone
        let fcch = modulate(&FC_FB_TB, 8, 1.0).unwrap();
        for (i, &c) in fcch.iter().enumerate() {
            s[fcch_at + i] += c * amplitude;
        }

        // synchronization burst, one frame later
        let info = sch::pack_fields(t1, t2, t3p, bsic);
        let coded = sch::encode_sch_data(&info);
        let mut bits = vec![0u8; DATA_LEN];
        bits[3..42].copy_from_slice(&coded[..39]);
        bits[SB_ETS_OS..SB_ETS_OS + 64].copy_from_slice(&SB_ETSC);
        bits[106..145].copy_from_slice(&coded[39..]);
        let sync = modulate(&bits, 8, 1.0).unwrap();
        let sch_at = fcch_at + FRAME_LEN as usize;
        for (i, &c) in sync.iter().enumerate() {
            s[sch_at + i] += c * amplitude;
        }

        s
    }

    #[test]
    fn replayed_stream_recovers_frame_number_and_bsic() {
        let (t1, t2, t3p, bsic) = (413, 9, 2, 0o61);
        let stream = synthesize_stream(t1, t2, t3p, bsic, 3000, 20000);
        let mut source = MemorySource::new(stream, GSM_RATE);
        source.start();

        let result = acquire(&mut source)
            .expect("source failed")
            .expect("no frequency burst found");

        // tone detected at FCCH_FREQ to FFT resolution
        assert!(
            result.freq_offset.abs() < GSM_RATE / 1024.0,
            "freq offset {}",
            result.freq_offset
        );

        // T3 = 21, tt = (21 - 9) mod 26 = 12
        let expected_fn = 51 * 26 * t1 + 51 * 12 + 21;
        assert_eq!(result.fn_, Some(expected_fn));
        assert_eq!(result.bsic, Some(bsic));
    }

    #[test]
    fn capture_window_contains_the_sync_burst() {
        let stream = synthesize_stream(1, 1, 0, 7, 2500, 20000);
        let mut source = MemorySource::new(stream, GSM_RATE);
        source.start();

        let capture = get_burst_sch(&mut source)
            .expect("source failed")
            .expect("no frequency burst");

        // scan consumed through the end of the frequency burst
        assert!(
            capture.consumed >= 2500 && capture.consumed <= 2500 + 400,
            "consumed {}",
            capture.consumed
        );
        // the window still covers the sync burst one frame after the FCCH
        let sch_start_in_stream = 2500 + FRAME_LEN as usize;
        let window_start = capture.consumed + (FRAME_LEN - 2.0 * BURST_LEN).ceil() as usize;
        assert!(
            window_start < sch_start_in_stream,
            "window starts at {} past the sync burst at {}",
            window_start,
            sch_start_in_stream
        );
        assert!(capture.window.len() >= (sch_start_in_stream - window_start) + 160);
    }

    #[test]
    fn silent_replay_exhausts_the_source() {
        // A stream with no tone: every scan consumes its whole window and
        // the replay runs dry.
        let stream = vec![Complex32::new(0.0, 0.0); 40000];
        let mut source = MemorySource::new(stream, GSM_RATE);
        source.start();

        assert!(get_burst_sch(&mut source).is_err());
    }

    #[test]
    fn offset_stats_trim_and_average() {
        let mut v: Vec<f64> = (0..10).map(|i| i as f64).collect();
        v.push(1e6); // outlier that trimming must remove
        v.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let trimmed = &v[1..v.len() - 1];
        let (mean, stddev) = mean_stddev(trimmed);
        assert!((mean - 5.0).abs() < 1e-9);
        assert!(stddev < 3.0);
    }
}
