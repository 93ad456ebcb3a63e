//! Recording session: raw YUYV payloads in, encoded stream out.
//!
//! The session owns the filter and encode stages and enforces the shutdown
//! contract between them: frames are accepted only while recording, and
//! teardown drains the filter completely before the encoder is told the
//! stream ended. Presentation timestamps are the capture iteration index in
//! a `1/fps` time base, so playback runs at the configured rate regardless
//! of how long capture actually took.

use ac_ffmpeg::codec::video::frame::{PixelFormat, get_pixel_format};
use ac_ffmpeg::codec::video::{VideoFrame, VideoFrameMut};
use ac_ffmpeg::time::{TimeBase, Timestamp};
use log::{debug, warn};
use std::io::Write;

use crate::config::RecorderConfig;
use crate::error::PipelineError;
use crate::pipeline::encode::EncodeStage;
use crate::pipeline::filter::FilterStage;

/// Session lifecycle. Transitions only move forward; a closed session cannot
/// accept frames again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Accepting captured frames.
    Recording,
    /// Filter sealed, residual frames moving into the encoder.
    FilterFlushing,
    /// Encoder draining its reordering backlog.
    EncodeFlushing,
    /// Everything flushed, sink finalized.
    Closed,
}

impl SessionPhase {
    pub fn can_transition_to(&self, target: &SessionPhase) -> bool {
        use SessionPhase::*;

        match (self, target) {
            (Recording, FilterFlushing) => true,
            (FilterFlushing, EncodeFlushing) => true,
            (EncodeFlushing, Closed) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Recording => "Recording",
            SessionPhase::FilterFlushing => "FilterFlushing",
            SessionPhase::EncodeFlushing => "EncodeFlushing",
            SessionPhase::Closed => "Closed",
        };
        write!(f, "{name}")
    }
}

/// Counters reported once the session has been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames_processed: u64,
    pub packets_written: u64,
    pub bytes_written: u64,
}

pub struct PipelineSession<W: Write> {
    filter: FilterStage,
    encode: EncodeStage<W>,
    /// The one raw frame in flight, recycled between iterations.
    spare: Option<VideoFrame>,
    pixel_format: PixelFormat,
    time_base: TimeBase,
    width: usize,
    height: usize,
    phase: SessionPhase,
    frames_in: u64,
}

impl<W: Write> PipelineSession<W> {
    pub fn new(cfg: &RecorderConfig, sink: W) -> Result<Self, PipelineError> {
        let time_base = TimeBase::new(1, cfg.fps.max(1) as i32);
        let filter = FilterStage::new(&cfg.mode, &cfg.filters)?;
        let encode = EncodeStage::new(&cfg.encoder, &cfg.mode, time_base, sink)?;
        let width = cfg.mode.width as usize;
        let height = cfg.mode.height as usize;
        let pixel_format = get_pixel_format("yuyv422");
        let spare = VideoFrameMut::black(pixel_format, width, height)
            .with_time_base(time_base)
            .freeze();

        Ok(Self {
            filter,
            encode,
            spare: Some(spare),
            pixel_format,
            time_base,
            width,
            height,
            phase: SessionPhase::Recording,
            frames_in: 0,
        })
    }

    /// Run one captured payload through filter and encoder. `pts` is the
    /// caller's iteration index in the `1/fps` time base.
    pub fn process(&mut self, data: &[u8], pts: i64) -> Result<(), PipelineError> {
        if self.phase != SessionPhase::Recording {
            return Err(PipelineError::Flushed);
        }

        let mut frame = self.writable_frame();
        self.copy_payload(&mut frame, data);
        let frame = frame
            .with_pts(Timestamp::new(pts, self.time_base))
            .freeze();

        self.filter.push(&frame)?;
        self.spare = Some(frame);
        while let Some(converted) = self.filter.take() {
            self.encode.push(converted)?;
        }

        self.frames_in += 1;
        Ok(())
    }

    /// Tear the session down: seal the filter, move anything it still holds
    /// into the encoder, then drain the encoder backlog and finalize the
    /// sink. Teardown keeps going past individual stage failures so the sink
    /// gets as much recoverable data as possible; the first failure is still
    /// reported to the caller.
    pub fn finish(mut self) -> Result<SessionSummary, PipelineError> {
        let mut first_err = None;

        self.advance(SessionPhase::FilterFlushing);
        if let Err(e) = self.filter.flush() {
            warn!("filter flush failed: {e}");
            first_err.get_or_insert(e);
        }
        while let Some(frame) = self.filter.take() {
            if let Err(e) = self.encode.push(frame) {
                warn!("encoder rejected residual frame: {e}");
                first_err.get_or_insert(e);
                break;
            }
        }

        self.advance(SessionPhase::EncodeFlushing);
        if let Err(e) = self.encode.flush() {
            warn!("encoder flush failed: {e}");
            first_err.get_or_insert(e);
        }

        self.advance(SessionPhase::Closed);
        match first_err {
            Some(e) => Err(e),
            None => Ok(SessionSummary {
                frames_processed: self.frames_in,
                packets_written: self.encode.packets_written(),
                bytes_written: self.encode.bytes_written(),
            }),
        }
    }

    /// Timestamps the encoder has accepted so far, in push order.
    #[cfg(test)]
    pub(crate) fn encoder_pts(&self) -> &[i64] {
        self.encode.pushed_pts()
    }

    /// Reuse the spare frame; the scaler copies out of it during `push`, so
    /// by the next iteration it is no longer shared and unwraps writable.
    fn writable_frame(&mut self) -> VideoFrameMut {
        match self.spare.take().map(VideoFrame::try_into_mut) {
            Some(Ok(frame)) => frame,
            _ => VideoFrameMut::black(self.pixel_format, self.width, self.height)
                .with_time_base(self.time_base),
        }
    }

    fn advance(&mut self, target: SessionPhase) {
        debug_assert!(self.phase.can_transition_to(&target));
        debug!("session phase {} -> {}", self.phase, target);
        self.phase = target;
    }

    /// Copy a packed YUYV payload into the frame's single plane, honouring
    /// the plane stride when the allocator padded rows.
    fn copy_payload(&self, frame: &mut VideoFrameMut, data: &[u8]) {
        let src_line = self.width * 2;
        let mut planes = frame.planes_mut();
        let dst = planes[0].data_mut();
        let dst_line = dst.len() / self.height;

        if dst_line == src_line {
            let len = data.len().min(dst.len());
            dst[..len].copy_from_slice(&data[..len]);
            return;
        }

        let line = src_line.min(dst_line);
        for row in 0..self.height {
            let src_start = row * src_line;
            let dst_start = row * dst_line;
            if src_start + line > data.len() || dst_start + line > dst.len() {
                break;
            }
            dst[dst_start..dst_start + line].copy_from_slice(&data[src_start..src_start + line]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoMode;

    fn small_cfg() -> RecorderConfig {
        RecorderConfig {
            mode: VideoMode {
                width: 64,
                height: 32,
            },
            fps: 10,
            ..Default::default()
        }
    }

    /// Build a session writing to memory, or `None` when the codec is not
    /// compiled into the local FFmpeg build.
    fn try_session(cfg: &RecorderConfig) -> Option<PipelineSession<Vec<u8>>> {
        match PipelineSession::new(cfg, Vec::new()) {
            Ok(session) => Some(session),
            Err(PipelineError::CodecUnavailable(_)) => None,
            Err(e) => panic!("session construction failed: {e}"),
        }
    }

    #[test]
    fn phases_only_move_forward() {
        use SessionPhase::*;

        assert!(Recording.can_transition_to(&FilterFlushing));
        assert!(FilterFlushing.can_transition_to(&EncodeFlushing));
        assert!(EncodeFlushing.can_transition_to(&Closed));
        assert!(Recording.can_transition_to(&Recording));

        assert!(!FilterFlushing.can_transition_to(&Recording));
        assert!(!Closed.can_transition_to(&Recording));
        assert!(!Recording.can_transition_to(&EncodeFlushing));
        assert!(!Recording.can_transition_to(&Closed));
    }

    #[test]
    fn flush_only_session_produces_empty_output() {
        let cfg = small_cfg();
        let Some(session) = try_session(&cfg) else {
            return;
        };
        let summary = session.finish().unwrap();
        assert_eq!(summary.frames_processed, 0);
        assert_eq!(summary.bytes_written, 0);
    }

    #[test]
    fn frames_in_produce_packets_out() {
        let cfg = small_cfg();
        let Some(mut session) = try_session(&cfg) else {
            return;
        };
        let payload = vec![0x80u8; cfg.mode.frame_len()];
        for pts in 0..8 {
            session.process(&payload, pts).unwrap();
        }
        // The encoder must see the exact index sequence, one tick per frame.
        assert_eq!(session.encoder_pts(), (0..8).collect::<Vec<i64>>());
        let summary = session.finish().unwrap();
        assert_eq!(summary.frames_processed, 8);
        assert!(summary.packets_written >= 1);
        assert!(summary.bytes_written > 0);
    }

    #[test]
    fn short_payload_does_not_panic() {
        let cfg = small_cfg();
        let Some(mut session) = try_session(&cfg) else {
            return;
        };
        session.process(&[0u8; 16], 0).unwrap();
    }
}
