//! Error taxonomy for the capture and encode halves of the recorder.
//!
//! Transient conditions (no frame ready yet, encoder still buffering) are not
//! errors at all: the affected APIs return `Ok(false)` or `Ok(None)` and the
//! caller retries on the next cycle. Only configuration and resource
//! negotiation failures during startup abort a session.

use thiserror::Error;

/// Errors raised by the capture device and the capture worker.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device rejected or silently altered the requested mode.
    #[error("device configuration rejected: {0}")]
    Configuration(String),

    /// The driver granted fewer buffers than double-buffering requires.
    #[error("only {granted} capture buffer(s) granted, need at least {needed}")]
    InsufficientBuffers { granted: usize, needed: usize },

    /// Unexpected device failure while streaming.
    #[error("streaming error: {0}")]
    Streaming(#[from] std::io::Error),

    /// The worker thread terminated abnormally.
    #[error("capture worker failed: {0}")]
    Worker(String),
}

/// Errors raised by the filter and encode stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The filter description could not be turned into a processing chain.
    #[error("filter graph construction failed: {0}")]
    GraphConstruction(String),

    /// The requested codec is not compiled into the local FFmpeg build.
    #[error("codec '{0}' unavailable")]
    CodecUnavailable(String),

    /// The codec exists but the session could not be opened.
    #[error("could not open encoder: {0}")]
    OpenFailed(String),

    /// A frame was pushed into a stage that has already been flushed.
    #[error("stage is terminal after flush")]
    Flushed,

    /// Error reported by the underlying codec or filter service.
    #[error(transparent)]
    Codec(#[from] ac_ffmpeg::Error),

    /// The output sink rejected a write.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
