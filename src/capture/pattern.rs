//! Synthetic capture source producing a moving YUYV gradient.
//!
//! Used by the CLI's `--test-pattern` mode so the full pipeline can run on
//! machines without a camera, and by tests to exercise the worker protocol,
//! including injected transient "not ready" results.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::capture::device::{CaptureDevice, DeviceFrame};
use crate::config::{MIN_BUFFER_COUNT, VideoMode};
use crate::error::CaptureError;

pub struct TestPatternDevice {
    mode: VideoMode,
    buffers: Vec<Vec<u8>>,
    queued: VecDeque<usize>,
    streaming: bool,
    sequence: u32,
    dequeue_calls: u64,
    fail_every: Option<u64>,
}

impl TestPatternDevice {
    /// Create a pattern source with `count` internal buffers. Like real
    /// drivers, fewer than two buffers is a fatal negotiation failure.
    pub fn new(mode: VideoMode, count: usize) -> Result<Self, CaptureError> {
        if count < MIN_BUFFER_COUNT {
            return Err(CaptureError::InsufficientBuffers {
                granted: count,
                needed: MIN_BUFFER_COUNT,
            });
        }
        Ok(Self {
            mode,
            buffers: vec![vec![0u8; mode.frame_len()]; count],
            queued: VecDeque::new(),
            streaming: false,
            sequence: 0,
            dequeue_calls: 0,
            fail_every: None,
        })
    }

    /// Make every `n`-th dequeue report "not ready yet".
    pub fn fail_dequeue_every(&mut self, n: u64) {
        self.fail_every = Some(n.max(1));
    }

    pub fn frames_rendered(&self) -> u32 {
        self.sequence
    }

    /// Horizontal gradient sliding one luma step per frame, neutral chroma.
    fn render(&mut self, index: usize) {
        let shift = self.sequence as usize;
        for (i, byte) in self.buffers[index].iter_mut().enumerate() {
            *byte = if i % 2 == 0 {
                ((i / 2 + shift) & 0xff) as u8
            } else {
                0x80
            };
        }
        self.sequence += 1;
    }
}

impl CaptureDevice for TestPatternDevice {
    fn stream_on(&mut self) -> Result<(), CaptureError> {
        self.queued = (0..self.buffers.len()).collect();
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<(), CaptureError> {
        self.streaming = false;
        self.queued.clear();
        Ok(())
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<bool, CaptureError> {
        if !self.streaming {
            return Err(CaptureError::Configuration(String::from(
                "wait on a device that is not streaming",
            )));
        }
        if self.queued.is_empty() {
            // Every buffer is checked out; behave like a timeout.
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
            return Ok(false);
        }
        Ok(true)
    }

    fn dequeue(&mut self) -> Result<Option<DeviceFrame<'_>>, CaptureError> {
        self.dequeue_calls += 1;
        if let Some(n) = self.fail_every {
            if self.dequeue_calls % n == 0 {
                return Ok(None);
            }
        }
        let Some(index) = self.queued.pop_front() else {
            return Ok(None);
        };
        self.render(index);
        Ok(Some(DeviceFrame {
            index,
            data: &self.buffers[index],
        }))
    }

    fn requeue(&mut self, index: usize) -> Result<(), CaptureError> {
        if index >= self.buffers.len() || self.queued.contains(&index) {
            return Err(CaptureError::Streaming(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("requeue of invalid buffer index {index}"),
            )));
        }
        self.queued.push_back(index);
        Ok(())
    }
}
