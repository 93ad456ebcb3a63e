//! Background capture worker.
//!
//! The worker owns the device for the lifetime of the session: it waits for
//! readiness, paces captures to the target interval, dequeues a filled
//! buffer, copies it into a pool buffer, re-queues the device buffer and
//! publishes the copy through the mailbox. Copying before re-queue keeps the
//! device memory private to this thread, so the device can overwrite it
//! without racing the consumer.

use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::capture::device::CaptureDevice;
use crate::capture::mailbox::{CapturedFrame, FrameMailbox};
use crate::capture::pool::FrameBufferPool;
use crate::config::READINESS_TIMEOUT;
use crate::error::CaptureError;

/// Capture state values for atomic access across threads.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle = 0,
    Streaming = 1,
    Stopping = 2,
    Stopped = 3,
}

impl CaptureState {
    /// Convert from a raw value. Returns `Stopped` for anything unknown.
    #[inline]
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CaptureState::Idle,
            1 => CaptureState::Streaming,
            2 => CaptureState::Stopping,
            _ => CaptureState::Stopped,
        }
    }
}

/// Handle to a running capture worker thread.
pub struct CaptureLoop {
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureLoop {
    /// Spawn the worker thread and wait for streaming to be up.
    ///
    /// `source` runs on the worker thread. It opens whatever device it needs
    /// (device handles may borrow thread-local resources and never cross the
    /// thread boundary) and hands control to [`CaptureWorker::run`]. Returning
    /// an error before `run` reports the failure to this caller.
    pub fn start<F>(
        pool: Arc<FrameBufferPool>,
        mailbox: Arc<FrameMailbox>,
        interval: Duration,
        source: F,
    ) -> Result<Self, CaptureError>
    where
        F: FnOnce(CaptureWorker) -> Result<(), CaptureError> + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(CaptureState::Idle as u8));
        let (started_tx, started_rx) = mpsc::channel();

        let worker = CaptureWorker {
            pool,
            mailbox: Arc::clone(&mailbox),
            interval,
            state: Arc::clone(&state),
            started: started_tx.clone(),
        };

        let handle = thread::Builder::new()
            .name(String::from("capture"))
            .spawn(move || {
                if let Err(err) = source(worker) {
                    let _ = started_tx.send(Err(err));
                }
                // Waking the consumer is the last duty of this thread,
                // whether the loop ended normally or the device never opened.
                mailbox.close();
            })
            .map_err(|e| CaptureError::Worker(e.to_string()))?;

        match started_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                state,
                handle: Some(handle),
            }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::Worker(String::from(
                    "capture thread exited before startup completed",
                )))
            }
        }
    }

    pub fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == CaptureState::Streaming
    }

    /// Request a cooperative stop and join the worker. The worker notices the
    /// flag within one readiness-timeout window at the latest.
    pub fn stop(&mut self) {
        let _ = self.state.compare_exchange(
            CaptureState::Streaming as u8,
            CaptureState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("capture worker panicked");
            }
        }
        self.state
            .store(CaptureState::Stopped as u8, Ordering::Release);
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

/// Worker-side context handed to the device-opening closure.
pub struct CaptureWorker {
    pool: Arc<FrameBufferPool>,
    mailbox: Arc<FrameMailbox>,
    interval: Duration,
    state: Arc<AtomicU8>,
    started: mpsc::Sender<Result<(), CaptureError>>,
}

impl CaptureWorker {
    /// Drive the capture cycle until stopped or a streaming error occurs.
    pub fn run(self, device: &mut dyn CaptureDevice) {
        if let Err(err) = device.stream_on() {
            let _ = self.started.send(Err(err));
            return;
        }
        self.state
            .store(CaptureState::Streaming as u8, Ordering::Release);
        let _ = self.started.send(Ok(()));
        info!("capture streaming started");

        let mut sequence = 0u64;
        let mut dropped = 0u64;
        let mut last_capture: Option<Instant> = None;

        while self.streaming() {
            match device.wait_ready(READINESS_TIMEOUT) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    error!("device readiness wait failed: {err}");
                    break;
                }
            }

            // Pace to the target interval so timestamps advance at a steady
            // cadence regardless of sensor jitter. Best effort only.
            if let Some(last) = last_capture {
                let elapsed = last.elapsed();
                if elapsed < self.interval {
                    thread::sleep(self.interval - elapsed);
                }
            }

            let published = match device.dequeue() {
                Ok(None) => continue,
                Err(err) => {
                    error!("dequeue failed: {err}");
                    break;
                }
                Ok(Some(frame)) => {
                    let index = frame.index;
                    let filled = self.pool.checkout().map(|mut buffer| {
                        let len = buffer.fill(frame.data);
                        (buffer, len)
                    });
                    if let Err(err) = device.requeue(index) {
                        error!("requeue of buffer {index} failed: {err}");
                        break;
                    }
                    filled
                }
            };
            last_capture = Some(Instant::now());

            match published {
                Some((buffer, len)) => {
                    let frame = CapturedFrame {
                        buffer,
                        len,
                        sequence,
                    };
                    sequence += 1;
                    if let Some(stale) = self.mailbox.publish(frame) {
                        // Consumer never took the previous frame; recycle it.
                        self.pool.give_back(stale.buffer);
                    }
                }
                None => {
                    dropped += 1;
                    if dropped % 32 == 1 {
                        warn!("frame dropped, no free pool buffer ({dropped} total)");
                    }
                }
            }
        }

        if let Err(err) = device.stream_off() {
            // Teardown is best effort; the session still flushes downstream.
            warn!("stream off failed: {err}");
        }
        self.state
            .store(CaptureState::Stopped as u8, Ordering::Release);
        info!("capture streaming stopped after {sequence} frame(s), {dropped} dropped");
    }

    #[inline]
    fn streaming(&self) -> bool {
        CaptureState::from_u8(self.state.load(Ordering::Acquire)) == CaptureState::Streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pattern::TestPatternDevice;
    use crate::config::VideoMode;

    fn small_mode() -> VideoMode {
        VideoMode {
            width: 16,
            height: 8,
        }
    }

    fn start_pattern_loop(
        pool: &Arc<FrameBufferPool>,
        mailbox: &Arc<FrameMailbox>,
        transient_every: Option<u64>,
    ) -> CaptureLoop {
        let mode = small_mode();
        CaptureLoop::start(
            Arc::clone(pool),
            Arc::clone(mailbox),
            Duration::from_millis(2),
            move |worker| {
                let mut device = TestPatternDevice::new(mode, 4)?;
                if let Some(n) = transient_every {
                    device.fail_dequeue_every(n);
                }
                worker.run(&mut device);
                Ok(())
            },
        )
        .unwrap()
    }

    #[test]
    fn delivers_frames_with_increasing_sequences() {
        let mode = small_mode();
        let pool = Arc::new(FrameBufferPool::new(4, mode.frame_len()).unwrap());
        let mailbox = Arc::new(FrameMailbox::new());
        let mut capture = start_pattern_loop(&pool, &mailbox, None);
        assert!(capture.is_streaming());

        let mut last_sequence = None;
        for _ in 0..10 {
            let frame = mailbox.take(Duration::from_secs(1)).expect("frame");
            if let Some(last) = last_sequence {
                assert!(frame.sequence > last, "sequence must advance");
            }
            last_sequence = Some(frame.sequence);
            assert_eq!(frame.len, mode.frame_len());
            pool.give_back(frame.buffer);
        }
        capture.stop();
        assert_eq!(capture.state(), CaptureState::Stopped);
    }

    #[test]
    fn transient_dequeue_misses_are_retried_not_fatal() {
        let mode = small_mode();
        let pool = Arc::new(FrameBufferPool::new(4, mode.frame_len()).unwrap());
        let mailbox = Arc::new(FrameMailbox::new());
        // Every third dequeue reports "not ready"; delivery must continue.
        let mut capture = start_pattern_loop(&pool, &mailbox, Some(3));

        for _ in 0..9 {
            let frame = mailbox.take(Duration::from_secs(1)).expect("frame");
            pool.give_back(frame.buffer);
        }
        capture.stop();
    }

    #[test]
    fn startup_failure_is_reported_to_caller() {
        let mode = small_mode();
        let pool = Arc::new(FrameBufferPool::new(4, mode.frame_len()).unwrap());
        let mailbox = Arc::new(FrameMailbox::new());
        let result = CaptureLoop::start(
            pool,
            Arc::clone(&mailbox),
            Duration::from_millis(2),
            move |_worker| {
                // Single-buffer devices cannot double-buffer.
                let _ = TestPatternDevice::new(mode, 1)?;
                unreachable!("construction must fail");
            },
        );
        assert!(matches!(
            result,
            Err(CaptureError::InsufficientBuffers { granted: 1, .. })
        ));
        assert!(mailbox.is_closed());
    }

    #[test]
    fn stop_closes_the_mailbox() {
        let mode = small_mode();
        let pool = Arc::new(FrameBufferPool::new(4, mode.frame_len()).unwrap());
        let mailbox = Arc::new(FrameMailbox::new());
        let mut capture = start_pattern_loop(&pool, &mailbox, None);
        capture.stop();
        assert!(mailbox.is_closed());
    }
}
