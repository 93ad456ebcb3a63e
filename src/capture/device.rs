//! Contract between the capture worker and a frame source.
//!
//! The trait mirrors the queue/dequeue/stream-on/stream-off protocol of a
//! memory-mapped capture driver. "Nothing ready yet" is modeled as `Ok(false)`
//! (readiness wait) or `Ok(None)` (dequeue) and is never an error.

use std::time::Duration;

use crate::error::CaptureError;

/// A filled device buffer, borrowed until it is re-queued.
///
/// The capture worker must copy the bytes out before calling
/// [`CaptureDevice::requeue`]; after re-queue the underlying memory may be
/// overwritten by the device at any time.
#[derive(Debug)]
pub struct DeviceFrame<'a> {
    /// Index identifying the buffer for re-queueing.
    pub index: usize,
    /// Valid frame bytes.
    pub data: &'a [u8],
}

/// A capture device that owns a fixed set of frame buffers.
pub trait CaptureDevice {
    /// Queue all buffers and enable streaming.
    fn stream_on(&mut self) -> Result<(), CaptureError>;

    /// Disable streaming, using the same buffer type as `stream_on`.
    fn stream_off(&mut self) -> Result<(), CaptureError>;

    /// Wait up to `timeout` for a filled buffer. `Ok(false)` on timeout or an
    /// interrupted wait; the caller re-checks its stop flag and retries.
    fn wait_ready(&mut self, timeout: Duration) -> Result<bool, CaptureError>;

    /// Dequeue a filled buffer without blocking. `Ok(None)` when no buffer is
    /// ready after all (the readiness wait can race the driver).
    fn dequeue(&mut self) -> Result<Option<DeviceFrame<'_>>, CaptureError>;

    /// Hand the buffer back to the device for refilling.
    fn requeue(&mut self, index: usize) -> Result<(), CaptureError>;
}
