use clap::{Arg, ArgAction, Command, value_parser};
use log::error;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{EncoderSettings, RecorderConfig, VideoMode};

pub mod capture;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod recorder;

fn main() {
    tracing_subscriber::fmt::init();

    let matches = Command::new("camrec")
        .version(config::version())
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("device")
                .short('d')
                .long("device")
                .value_name("PATH")
                .help("Capture device node.")
                .default_value("/dev/video0"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Output file receiving the raw H.264 stream.")
                .default_value("test.h264"),
        )
        .arg(
            Arg::new("filters")
                .short('f')
                .long("filters")
                .value_name("DESC")
                .help("Comma separated filter chain: null, vflip, gray.")
                .default_value("null"),
        )
        .arg(
            Arg::new("frames")
                .short('n')
                .long("frames")
                .value_name("COUNT")
                .help("Number of frames to record (0 flushes an empty stream).")
                .value_parser(value_parser!(u64))
                .default_value("100"),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .value_parser(value_parser!(u32))
                .default_value("1280"),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .value_parser(value_parser!(u32))
                .default_value("720"),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .value_name("RATE")
                .help("Target frame rate; also the playback rate of the output.")
                .value_parser(value_parser!(u32))
                .default_value("10"),
        )
        .arg(
            Arg::new("bitrate")
                .short('b')
                .long("bitrate")
                .value_name("BPS")
                .help("Encoder bit rate in bits per second.")
                .value_parser(value_parser!(u64))
                .default_value("800000"),
        )
        .arg(
            Arg::new("test-pattern")
                .long("test-pattern")
                .help("Capture from the synthetic pattern source instead of a device.")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let cfg = RecorderConfig {
        device: PathBuf::from(matches.get_one::<String>("device").unwrap()),
        output: PathBuf::from(matches.get_one::<String>("output").unwrap()),
        filters: matches.get_one::<String>("filters").unwrap().clone(),
        frame_count: *matches.get_one::<u64>("frames").unwrap(),
        fps: *matches.get_one::<u32>("fps").unwrap(),
        mode: VideoMode {
            width: *matches.get_one::<u32>("width").unwrap(),
            height: *matches.get_one::<u32>("height").unwrap(),
        },
        encoder: EncoderSettings {
            bit_rate: *matches.get_one::<u64>("bitrate").unwrap(),
            ..Default::default()
        },
        test_pattern: matches.get_flag("test-pattern"),
    };

    // finish the current frame, then flush and close the output cleanly
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        })
        .expect("Error setting Ctrl-C handler");
    }

    if let Err(err) = recorder::record(&cfg, stop) {
        error!("{err:#}");
        process::exit(1);
    }
}
