mod pipeline;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use cs_protocol::arfcn::{arfcn_to_freq, freq_to_arfcn, Band};
use cs_protocol::GSM_RATE;
use cs_sdr::file::{FileSource, SampleFormat};
use cs_sdr::{Antenna, SampleSource};

#[derive(Parser, Debug)]
#[command(name = "cellsync")]
#[command(about = "GSM downlink cell synchronization (FCCH/SCH) over an SDR")]
struct Cli {
    /// UHD device address
    #[arg(short = 'a')]
    address: Option<String>,

    /// Frequency of a nearby GSM base station, Hz
    #[arg(short = 'f')]
    freq: Option<f64>,

    /// Channel (ARFCN) of a nearby GSM base station
    #[arg(short = 'c', conflicts_with = "freq")]
    chan: Option<u16>,

    /// Band indicator (GSM850, GSM900, EGSM, DCS, PCS)
    #[arg(short = 'b')]
    band: Option<Band>,

    /// Gain as a fraction of the device range (0..1, or 0..100 as percent)
    #[arg(short = 'g', default_value = "0.45")]
    gain: f64,

    /// Daughterboard side: A (0) or B (1)
    #[arg(short = 'R')]
    side: Option<String>,

    /// Antenna: TX/RX (0), RX2 (1), or an index
    #[arg(short = 'A')]
    antenna: Option<String>,

    /// FPGA master clock frequency, Hz (values below 1000 are MHz)
    #[arg(short = 'F')]
    fpga_clock: Option<f64>,

    /// USRP2-series device
    #[arg(short = '2')]
    usrp2: bool,

    /// Use the external reference clock
    #[arg(short = 'x')]
    external_ref: bool,

    /// Measure the receiver frequency offset instead of decoding the SCH
    #[arg(long)]
    offset: bool,

    /// Re-measure every C0 candidate with full offset statistics
    #[arg(long)]
    strict: bool,

    /// Replay a recorded IQ capture instead of a live device
    #[arg(long)]
    iq_file: Option<PathBuf>,

    /// Sample format of the IQ capture: ci8, ci16, cf32
    #[arg(long, default_value = "ci16")]
    format: String,
}

fn fatal(msg: &str) -> ! {
    eprintln!("error: {}", msg);
    std::process::exit(1);
}

fn parse_gain(gain: f64) -> f64 {
    let gain = if gain > 1.0 && gain <= 100.0 {
        gain / 100.0
    } else {
        gain
    };
    if !(0.0..=1.0).contains(&gain) {
        fatal(&format!("bad gain: {}", gain));
    }
    gain
}

fn parse_side(s: &str) -> u8 {
    match s.to_ascii_uppercase().as_str() {
        "A" | "0" => 0,
        "B" | "1" => 1,
        other => fatal(&format!("bad side: ``{}''", other)),
    }
}

fn parse_antenna(s: &str) -> Antenna {
    match s {
        "TX/RX" => Antenna::Name("TX/RX".to_string()),
        "RX2" => Antenna::Name("RX2".to_string()),
        other => match other.parse::<usize>() {
            Ok(idx) => Antenna::Index(idx),
            Err(_) => fatal(&format!("bad antenna: ``{}''", other)),
        },
    }
}

fn parse_fpga_clock(hz: f64) -> f64 {
    // was the answer in MHz?
    if hz < 1000.0 {
        hz * 1e6
    } else {
        hz
    }
}

/// Resolve the tuning frequency and its ARFCN from -f / -c / -b.
fn resolve_freq(cli: &Cli) -> Option<(f64, u16, Band)> {
    match (cli.freq, cli.chan) {
        (Some(freq), _) => match freq_to_arfcn(freq, cli.band) {
            Some((chan, band)) => Some((freq, chan, band)),
            None => fatal(&format!("not a GSM downlink frequency: {}", freq)),
        },
        (None, Some(chan)) => {
            let band = cli.band.unwrap_or_else(|| {
                // try to infer the band from the channel number
                for b in [Band::Gsm850, Band::EGsm, Band::Dcs1800] {
                    if b.contains(chan) {
                        return b;
                    }
                }
                fatal(&format!("cannot infer band for channel {}", chan))
            });
            match arfcn_to_freq(chan, band) {
                Some(freq) => Some((freq, chan, band)),
                None => fatal(&format!("channel {} not in {}", chan, band)),
            }
        }
        (None, None) => None,
    }
}

fn open_source(cli: &Cli) -> Box<dyn SampleSource> {
    if let Some(path) = &cli.iq_file {
        let format = match cli.format.as_str() {
            "ci8" => SampleFormat::Ci8,
            "ci16" => SampleFormat::Ci16,
            "cf32" => SampleFormat::Cf32,
            other => fatal(&format!("unknown sample format: {}", other)),
        };
        return Box::new(FileSource::new(path, format, GSM_RATE));
    }

    #[cfg(feature = "usrp")]
    {
        let mut source = match cs_sdr::usrp::UsrpSource::open(
            cli.address.as_deref(),
            GSM_RATE,
            cli.fpga_clock.map(parse_fpga_clock),
            cli.external_ref && cli.usrp2,
        ) {
            Ok(s) => s,
            Err(e) => fatal(&e),
        };
        if let Some(side) = &cli.side {
            if let Err(e) = source.set_subdev(parse_side(side)) {
                fatal(&e);
            }
        }
        if let Some(ant) = &cli.antenna {
            if let Err(e) = source.set_antenna(&parse_antenna(ant)) {
                fatal(&e);
            }
        }
        if let Err(e) = source.set_gain(parse_gain(cli.gain)) {
            fatal(&e);
        }
        return Box::new(source);
    }

    #[cfg(not(feature = "usrp"))]
    {
        // keep the config parsers exercised even without hardware support
        let _ = (
            parse_gain(cli.gain),
            cli.side.as_deref().map(parse_side),
            cli.antenna.as_deref().map(parse_antenna),
            cli.fpga_clock.map(parse_fpga_clock),
        );
        fatal("built without USRP support; use --iq-file to replay a capture");
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let running = Arc::new(AtomicBool::new(true));
    {
        let r = running.clone();
        ctrlc::set_handler(move || {
            eprintln!("\ninterrupted, stopping...");
            r.store(false, Ordering::SeqCst);
        })
        .unwrap_or_else(|_| fatal("failed to set interrupt handler"));
    }

    let tuned = resolve_freq(&cli);

    // band scan mode: a band with no explicit frequency or channel
    if tuned.is_none() {
        let band = match cli.band {
            Some(b) => b,
            None => fatal("must enter band, channel or frequency"),
        };
        let mut source = open_source(&cli);
        if let Err(e) = pipeline::c0_detect(source.as_mut(), band, cli.strict, &running) {
            fatal(&e);
        }
        return;
    }

    let (freq, chan, band) = tuned.unwrap();
    let mut source = open_source(&cli);

    if let Err(e) = source.tune(freq) {
        fatal(&e);
    }
    eprintln!("using {} channel {} ({:.1}MHz)", band, chan, freq / 1e6);

    source.start();

    if cli.offset {
        match pipeline::offset_detect(source.as_mut()) {
            Ok(Some(stats)) => {
                println!(
                    "average\t\t[min, max]\t(range, stddev)\n{:+.0}Hz\t\t[{:.0}, {:.0}]\t({:.0}, {:.1})",
                    stats.avg,
                    stats.min,
                    stats.max,
                    stats.max - stats.min,
                    stats.stddev,
                );
            }
            Ok(None) => {
                source.stop();
                fatal("no FCCH bursts detected");
            }
            Err(e) => {
                source.stop();
                fatal(&e);
            }
        }
    } else {
        match pipeline::acquire(source.as_mut()) {
            Ok(Some(result)) => {
                println!("frequency offset: {:+.1} Hz", result.freq_offset);
                match (result.fn_, result.bsic) {
                    (Some(fn_), Some(bsic)) => {
                        println!(
                            "FN: {}\tBSIC: 0x{:02x} (bcc: {}, ncc: {})",
                            fn_,
                            bsic,
                            bsic & 7,
                            (bsic >> 3) & 7,
                        );
                    }
                    _ => println!("SCH: no decode"),
                }
            }
            Ok(None) => {
                source.stop();
                fatal("no frequency burst found");
            }
            Err(e) => {
                source.stop();
                fatal(&e);
            }
        }
    }

    source.stop();
}
