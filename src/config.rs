//! Immutable session configuration.
//!
//! All knobs the reference hardware setup hardcodes are carried here as
//! explicit values so the CLI (or a test) can override any of them. The
//! defaults reproduce that setup: 1280x720 YUYV at 10 fps, 100 frames,
//! libx264 at 800 kbps with a 10-frame GOP and one B-frame.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::CaptureError;

/// Number of driver-side buffers requested from the capture device.
pub const BUFFER_REQUEST_COUNT: u32 = 4;

/// Minimum buffer count that still allows double-buffered capture.
pub const MIN_BUFFER_COUNT: usize = 2;

/// How long the capture worker waits for device readiness per cycle.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(1);

/// Fixed capture mode negotiated with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
}

impl VideoMode {
    /// Byte length of one packed YUYV422 frame (two bytes per pixel).
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 2
    }

    /// Both the packed source (two pixels per macropixel) and 4:2:0 output
    /// (chroma halved on each axis) need nonzero, even dimensions.
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(CaptureError::Configuration(format!(
                "unsupported capture mode {}x{}, dimensions must be nonzero and even",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

impl Default for VideoMode {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Encoder session parameters, applied once at stage construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// FFmpeg codec name.
    pub codec: String,
    /// Target bit rate in bits per second.
    pub bit_rate: u64,
    /// Frames per GOP (keyframe interval).
    pub gop_size: u32,
    /// Maximum consecutive B-frames the encoder may reorder.
    pub max_b_frames: u32,
    /// Speed/quality preset, applied to H.264 encoders only.
    pub preset: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            codec: String::from("libx264"),
            bit_rate: 800_000,
            gop_size: 10,
            max_b_frames: 1,
            preset: String::from("slow"),
        }
    }
}

/// Everything a recording session needs, resolved before startup.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Capture device path.
    pub device: PathBuf,
    /// Output file receiving the raw elementary stream.
    pub output: PathBuf,
    /// Textual filter description, "null" for plain format conversion.
    pub filters: String,
    /// Number of frames to record; zero means flush-only.
    pub frame_count: u64,
    /// Target frames per second; also the encoder time base denominator.
    pub fps: u32,
    pub mode: VideoMode,
    pub encoder: EncoderSettings,
    /// Use the synthetic test-pattern source instead of a real device.
    pub test_pattern: bool,
}

impl RecorderConfig {
    /// Target interval between captured frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video0"),
            output: PathBuf::from("test.h264"),
            filters: String::from("null"),
            frame_count: 100,
            fps: 10,
            mode: VideoMode::default(),
            encoder: EncoderSettings::default(),
            test_pattern: false,
        }
    }
}

/// Returns the version as specified in Cargo.toml.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
