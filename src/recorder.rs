//! Session wiring: capture worker on one side, pipeline on the other.
//!
//! The consumer loop here is the only place the two halves meet. It takes the
//! newest captured frame from the mailbox, runs it through the pipeline and
//! recycles the buffer, until the configured frame count is reached, a stop is
//! requested, or either half fails. Presentation timestamps are the consumer
//! iteration index, so the output plays back at the configured rate with no
//! gaps even when capture skipped frames.

use anyhow::Context;
use log::{debug, error, info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::capture::v4l2::{V4l2Device, open_device};
use crate::capture::{CaptureLoop, FrameBufferPool, FrameMailbox, TestPatternDevice};
use crate::config::{BUFFER_REQUEST_COUNT, READINESS_TIMEOUT, RecorderConfig};
use crate::pipeline::{PipelineSession, SessionSummary};

/// Record `cfg.frame_count` frames to `cfg.output`.
///
/// `stop` is checked between frames; setting it ends the session early with a
/// clean flush. Returns the session counters on success.
pub fn record(cfg: &RecorderConfig, stop: Arc<AtomicBool>) -> anyhow::Result<SessionSummary> {
    cfg.mode.validate()?;
    let file = File::create(&cfg.output)
        .with_context(|| format!("create output file {}", cfg.output.display()))?;
    let mut session =
        PipelineSession::new(cfg, BufWriter::new(file)).context("pipeline construction")?;

    let pool = Arc::new(FrameBufferPool::new(
        BUFFER_REQUEST_COUNT as usize,
        cfg.mode.frame_len(),
    )?);
    let mailbox = Arc::new(FrameMailbox::new());
    let interval = cfg.frame_interval();

    let mut capture = if cfg.test_pattern {
        let mode = cfg.mode;
        info!("using synthetic test pattern source");
        CaptureLoop::start(
            Arc::clone(&pool),
            Arc::clone(&mailbox),
            interval,
            move |worker| {
                let mut device = TestPatternDevice::new(mode, BUFFER_REQUEST_COUNT as usize)?;
                worker.run(&mut device);
                Ok(())
            },
        )
    } else {
        let path = cfg.device.clone();
        let mode = cfg.mode;
        CaptureLoop::start(
            Arc::clone(&pool),
            Arc::clone(&mailbox),
            interval,
            move |worker| {
                // The device handle stays on the worker thread; only owned
                // frame copies ever leave it.
                let (device, frame_len) = open_device(&path, &mode)?;
                if frame_len != mode.frame_len() {
                    warn!(
                        "driver reports {frame_len} bytes/frame, expected {}",
                        mode.frame_len()
                    );
                }
                let mut backend = V4l2Device::new(&device)?;
                worker.run(&mut backend);
                Ok(())
            },
        )
    }
    .context("capture startup")?;

    // Generous enough to cover one readiness wait plus pacing; a miss here
    // only re-checks the stop flag.
    let take_timeout = READINESS_TIMEOUT + interval + Duration::from_secs(1);

    let mut delivered: u64 = 0;
    let mut pipeline_err = None;
    while delivered < cfg.frame_count {
        if stop.load(Ordering::Relaxed) {
            info!("stop requested after {delivered} frame(s)");
            break;
        }
        let Some(frame) = mailbox.take(take_timeout) else {
            if mailbox.is_closed() {
                warn!("capture ended early after {delivered} frame(s)");
                break;
            }
            continue;
        };
        debug!("frame {delivered} (capture sequence {})", frame.sequence);
        let result = session.process(frame.data(), delivered as i64);
        pool.give_back(frame.buffer);
        if let Err(err) = result {
            error!("processing frame {delivered} failed: {err}");
            pipeline_err = Some(err);
            break;
        }
        delivered += 1;
    }

    capture.stop();

    match pipeline_err {
        Some(err) => {
            // Salvage what the encoder still holds before reporting.
            if let Err(teardown) = session.finish() {
                warn!("teardown after failure: {teardown}");
            }
            Err(err).context("encoding aborted")
        }
        None => {
            let summary = session.finish().context("pipeline teardown")?;
            info!(
                "recorded {} frame(s), {} packet(s), {} byte(s) to {}",
                summary.frames_processed,
                summary.packets_written,
                summary.bytes_written,
                cfg.output.display()
            );
            Ok(summary)
        }
    }
}
