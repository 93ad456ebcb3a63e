//! Filter stage: YUYV422 in, YUV420P out.
//!
//! The stage is built from a textual filter description. A "null" (or
//! "passthrough") description still performs the pixel format conversion the
//! encoder requires; additional named transforms run on the converted frame.
//! Output is buffered in an internal queue and drained with [`FilterStage::take`]
//! in a loop, so a single push may surface zero or more frames to the caller.

use ac_ffmpeg::codec::video::frame::get_pixel_format;
use ac_ffmpeg::codec::video::scaler::VideoFrameScaler;
use ac_ffmpeg::codec::video::VideoFrame;
use std::collections::VecDeque;

use crate::config::VideoMode;
use crate::error::PipelineError;

/// One named transform in the chain, applied after format conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterStep {
    /// Mirror the frame vertically.
    VerticalFlip,
    /// Neutralize the chroma planes.
    Grayscale,
}

fn parse_steps(description: &str) -> Result<Vec<FilterStep>, PipelineError> {
    let mut steps = Vec::new();
    for name in description.split(',').map(str::trim) {
        match name {
            "" | "null" | "passthrough" | "pass-through" => {}
            "vflip" => steps.push(FilterStep::VerticalFlip),
            "gray" | "grayscale" => steps.push(FilterStep::Grayscale),
            other => {
                return Err(PipelineError::GraphConstruction(format!(
                    "unknown filter '{other}'"
                )));
            }
        }
    }
    Ok(steps)
}

pub struct FilterStage {
    scaler: VideoFrameScaler,
    steps: Vec<FilterStep>,
    queue: VecDeque<VideoFrame>,
    height: usize,
    flushed: bool,
}

impl std::fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterStage")
            .field("steps", &self.steps)
            .field("queued", &self.queue.len())
            .field("height", &self.height)
            .field("flushed", &self.flushed)
            .finish_non_exhaustive()
    }
}

impl FilterStage {
    /// Build the conversion chain for the fixed capture mode.
    pub fn new(mode: &VideoMode, description: &str) -> Result<Self, PipelineError> {
        let steps = parse_steps(description)?;
        let width = mode.width as usize;
        let height = mode.height as usize;
        let scaler = VideoFrameScaler::builder()
            .source_pixel_format(get_pixel_format("yuyv422"))
            .source_width(width)
            .source_height(height)
            .target_pixel_format(get_pixel_format("yuv420p"))
            .target_width(width)
            .target_height(height)
            .build()
            .map_err(|e| PipelineError::GraphConstruction(e.to_string()))?;

        Ok(Self {
            scaler,
            steps,
            queue: VecDeque::new(),
            height,
            flushed: false,
        })
    }

    /// Convert one raw frame and queue the result(s) for draining.
    pub fn push(&mut self, frame: &VideoFrame) -> Result<(), PipelineError> {
        if self.flushed {
            return Err(PipelineError::Flushed);
        }
        let converted = self.scaler.scale(frame)?;
        let converted = self.apply_steps(converted)?;
        self.queue.push_back(converted);
        Ok(())
    }

    /// Next converted frame, or `None` when the graph has nothing to emit.
    pub fn take(&mut self) -> Option<VideoFrame> {
        self.queue.pop_front()
    }

    /// Terminal drain. The chain holds no delayed frames of its own, so a
    /// flush only seals the stage; anything still queued stays takeable.
    /// A repeated flush is a no-op.
    pub fn flush(&mut self) -> Result<(), PipelineError> {
        self.flushed = true;
        Ok(())
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    fn apply_steps(&self, frame: VideoFrame) -> Result<VideoFrame, PipelineError> {
        if self.steps.is_empty() {
            return Ok(frame);
        }

        let pts = frame.pts();
        let line_sizes: Vec<usize> = frame.planes().iter().map(|p| p.line_size()).collect();
        let mut frame = frame.try_into_mut().map_err(|_| {
            PipelineError::GraphConstruction(String::from(
                "converted frame unexpectedly shared",
            ))
        })?;

        for step in &self.steps {
            match step {
                FilterStep::VerticalFlip => {
                    let mut planes = frame.planes_mut();
                    for (i, plane) in planes.iter_mut().enumerate() {
                        let rows = if i == 0 { self.height } else { self.height / 2 };
                        flip_rows(plane.data_mut(), line_sizes[i], rows);
                    }
                }
                FilterStep::Grayscale => {
                    let mut planes = frame.planes_mut();
                    for plane in planes.iter_mut().skip(1) {
                        plane.data_mut().fill(0x80);
                    }
                }
            }
        }

        Ok(frame.with_pts(pts).freeze())
    }
}

/// Reverse the row order of a packed plane in place.
fn flip_rows(data: &mut [u8], stride: usize, rows: usize) {
    if stride == 0 || rows < 2 {
        return;
    }
    let mut top = 0;
    let mut bottom = rows - 1;
    let mut scratch = vec![0u8; stride];
    while top < bottom {
        let (t, b) = (top * stride, bottom * stride);
        if b + stride > data.len() {
            break;
        }
        scratch.copy_from_slice(&data[t..t + stride]);
        data.copy_within(b..b + stride, t);
        data[b..b + stride].copy_from_slice(&scratch);
        top += 1;
        bottom -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_ffmpeg::codec::video::VideoFrameMut;
    use ac_ffmpeg::time::{TimeBase, Timestamp};

    fn mode() -> VideoMode {
        VideoMode {
            width: 32,
            height: 16,
        }
    }

    fn raw_frame(pts: i64) -> VideoFrame {
        let time_base = TimeBase::new(1, 10);
        VideoFrameMut::black(get_pixel_format("yuyv422"), 32, 16)
            .with_time_base(time_base)
            .with_pts(Timestamp::new(pts, time_base))
            .freeze()
    }

    #[test]
    fn null_description_builds_a_conversion_only_chain() {
        let stage = FilterStage::new(&mode(), "null").unwrap();
        assert!(stage.steps.is_empty());
    }

    #[test]
    fn unknown_filter_is_a_construction_error() {
        let err = FilterStage::new(&mode(), "sharpen").unwrap_err();
        assert!(matches!(err, PipelineError::GraphConstruction(_)));
    }

    #[test]
    fn chained_descriptions_parse_in_order() {
        let stage = FilterStage::new(&mode(), "vflip, grayscale").unwrap();
        assert_eq!(
            stage.steps,
            vec![FilterStep::VerticalFlip, FilterStep::Grayscale]
        );
    }

    #[test]
    fn push_converts_and_preserves_pts() {
        let mut stage = FilterStage::new(&mode(), "null").unwrap();
        for pts in 0..4 {
            stage.push(&raw_frame(pts)).unwrap();
        }
        let mut last = None;
        let mut seen = 0;
        while let Some(frame) = stage.take() {
            let pts = frame.pts().timestamp();
            if let Some(prev) = last {
                assert_eq!(pts, prev + 1, "timestamps advance by exactly one");
            }
            last = Some(pts);
            seen += 1;
        }
        assert_eq!(seen, 4);
    }

    #[test]
    fn push_after_flush_is_rejected_and_second_flush_is_noop() {
        let mut stage = FilterStage::new(&mode(), "null").unwrap();
        stage.push(&raw_frame(0)).unwrap();
        stage.flush().unwrap();
        assert!(stage.is_flushed());
        assert!(stage.take().is_some());
        assert!(stage.take().is_none());

        assert!(matches!(
            stage.push(&raw_frame(1)),
            Err(PipelineError::Flushed)
        ));
        stage.flush().unwrap();
        assert!(stage.take().is_none(), "second flush drains nothing");
    }

    #[test]
    fn grayscale_neutralizes_chroma() {
        let mut stage = FilterStage::new(&mode(), "gray").unwrap();
        stage.push(&raw_frame(0)).unwrap();
        let frame = stage.take().unwrap();
        let planes = frame.planes();
        assert!(planes[1].data().iter().all(|&b| b == 0x80));
        assert!(planes[2].data().iter().all(|&b| b == 0x80));
    }

    #[test]
    fn flip_rows_reverses_row_order() {
        let mut data = vec![1, 1, 2, 2, 3, 3];
        flip_rows(&mut data, 2, 3);
        assert_eq!(data, vec![3, 3, 2, 2, 1, 1]);
    }
}
