//! Example: decode SoundWire frames from a DSLogic capture
//!
//! Prints one table row per decoded frame in the classic exporter layout.
//!
//! Usage:
//!   cargo run --release --example decode_capture -- \
//!       --file capture.dsl --clock 0 --data 1 -n 100
//!
//! With a known frame shape (skips the full shape search):
//!   cargo run --release --example decode_capture -- \
//!       --file capture.dsl --clock 0 --data 1 --rows 48 --cols 2

use clap::Parser;
use soundwire::{
    CancelToken, CaptureFile, DecoderConfig, DuplicatePingFilter, Frame, FrameEmitter, FrameShape,
    OpCode, ResultsSink,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the .dsl capture file
    #[arg(short, long)]
    file: String,

    /// Probe number of the SoundWire clock
    #[arg(long)]
    clock: usize,

    /// Probe number of the SoundWire data line
    #[arg(long)]
    data: usize,

    /// Known row count (0 = search all candidates)
    #[arg(long, default_value = "0")]
    rows: u32,

    /// Known column count (0 = search all candidates)
    #[arg(long, default_value = "0")]
    cols: u32,

    /// Hide PING frames that repeat the previous bus status
    #[arg(long)]
    suppress_duplicate_pings: bool,

    /// Number of frames to print (0 = unlimited)
    #[arg(short, long, default_value = "0")]
    n: usize,
}

/// Sink that renders frames as table rows and stops after a limit.
struct TablePrinter {
    filter: DuplicatePingFilter,
    samplerate_hz: f64,
    printed: usize,
    max_frames: usize,
    cancel: CancelToken,
}

impl TablePrinter {
    fn new(suppress: bool, samplerate_hz: f64, max_frames: usize, cancel: CancelToken) -> Self {
        println!(
            "{:>14}  {:<14} {:<6} {:<5} {:<6} {:<4} {:>3} {:>3} {:>4} {:>5}  flags",
            "Time(s)", "Control Word", "Op", "DevId", "Reg", "Data", "ACK", "NAK", "PREQ", "Dsync"
        );
        Self {
            filter: DuplicatePingFilter::new(suppress),
            samplerate_hz,
            printed: 0,
            max_frames,
            cancel,
        }
    }
}

impl ResultsSink for TablePrinter {
    fn add_frame(&mut self, frame: Frame) {
        if !self.filter.should_report(&frame) {
            return;
        }

        let word = frame.control_word;
        let time = frame.start_sample as f64 / self.samplerate_hz;

        let (dev, reg, data) = match word.op_code() {
            OpCode::Read | OpCode::Write => (
                format!("{}", word.device_address()),
                format!("0x{:04x}", word.register_address()),
                format!("0x{:02x}", word.data_value()),
            ),
            _ => (String::new(), String::new(), String::new()),
        };

        let mut flags = String::new();
        if frame.sync_lost() {
            flags.push_str("SYNC-LOST ");
        }
        if frame.parity_bad() {
            flags.push_str("PAR-BAD");
        }

        println!(
            "{:>14.9}  0x{:012x} {:<6} {:<5} {:<6} {:<4} {:>3} {:>3} {:>4} {:>5}  {}",
            time,
            word.value(),
            word.op_code().to_string(),
            dev,
            reg,
            data,
            u8::from(word.ack()),
            u8::from(word.nak()),
            u8::from(word.preq()),
            format!("0x{:x}", word.dynamic_sync()),
            flags
        );

        self.printed += 1;
        if self.max_frames > 0 && self.printed >= self.max_frames {
            self.cancel.cancel();
        }
    }

    fn bus_reset(&mut self, start_sample: u64, end_sample: u64) {
        let time = start_sample as f64 / self.samplerate_hz;
        println!(
            "{:>14.9}  BUS RESET (samples {}..{})",
            time, start_sample, end_sample
        );
    }

    fn shape_change(&mut self, sample: u64, shape: FrameShape) {
        info!("frame shape {} from sample {}", shape, sample);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let capture = CaptureFile::open(&args.file)?;
    let header = capture.header();
    info!(
        "{}: {} probes, {} samples at {}",
        args.file, header.total_probes, header.total_samples, header.samplerate
    );

    let clock = capture.channel(args.clock)?;
    let data = capture.channel(args.data)?;

    let config = DecoderConfig {
        hint_rows: (args.rows != 0).then_some(args.rows),
        hint_columns: (args.cols != 0).then_some(args.cols),
        suppress_duplicate_pings: args.suppress_duplicate_pings,
    };

    let cancel = CancelToken::new();
    let mut sink = TablePrinter::new(
        config.suppress_duplicate_pings,
        capture.header().samplerate_hz,
        args.n,
        cancel.clone(),
    );

    let mut emitter = FrameEmitter::new(clock, data, config);
    emitter.run(&mut sink, &cancel)?;

    info!("{} frames printed", sink.printed);
    Ok(())
}
