//! V4L2 capture backend.
//!
//! The driver owns the memory-mapped buffers; this wrapper adapts the mmap
//! stream to the [`CaptureDevice`] protocol. Readiness is checked with
//! `poll(2)` on the device descriptor so the worker can re-check its stop
//! flag once per timeout window even when the sensor stalls.
//!
//! Re-queue note: the mmap stream hands buffer N back to the driver on the
//! *next* dequeue, so `requeue` here only retires our bookkeeping. The
//! ordering guarantee is preserved: the driver cannot overwrite a dequeued
//! buffer before the worker asks for the following frame.

use log::{debug, info};
use std::io;
use std::os::fd::RawFd;
use std::path::Path;
use std::time::Duration;

use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::{CaptureStream, Stream as StreamTrait};
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::capture::device::{CaptureDevice, DeviceFrame};
use crate::config::{BUFFER_REQUEST_COUNT, VideoMode};
use crate::error::CaptureError;

const PIXEL_FORMAT: &[u8; 4] = b"YUYV";

/// Open the device and negotiate the fixed capture mode.
///
/// Returns the device plus the driver-reported frame size in bytes. Drivers
/// may quietly substitute another mode; anything other than the requested one
/// is a fatal configuration error here.
pub fn open_device(path: &Path, mode: &VideoMode) -> Result<(Device, usize), CaptureError> {
    let device = Device::with_path(path)
        .map_err(|e| CaptureError::Configuration(format!("open {}: {e}", path.display())))?;

    let requested = Format::new(mode.width, mode.height, FourCC::new(PIXEL_FORMAT));
    let granted = device
        .set_format(&requested)
        .map_err(|e| CaptureError::Configuration(format!("set format: {e}")))?;

    if granted.fourcc != requested.fourcc
        || granted.width != mode.width
        || granted.height != mode.height
    {
        return Err(CaptureError::Configuration(format!(
            "requested {}x{} YUYV, device insists on {}x{} {}",
            mode.width, mode.height, granted.width, granted.height, granted.fourcc
        )));
    }

    info!(
        "opened {} at {}x{} {} ({} bytes/frame)",
        path.display(),
        granted.width,
        granted.height,
        granted.fourcc,
        granted.size
    );
    Ok((device, granted.size as usize))
}

/// Capture device backed by the driver's mmap buffer queue.
pub struct V4l2Device<'a> {
    stream: MmapStream<'a>,
    fd: RawFd,
    /// Bookkeeping index of the frame delivered but not yet retired.
    pending: Option<usize>,
    delivered: usize,
}

impl<'a> V4l2Device<'a> {
    /// Request driver buffers and map them. Creation failing here means the
    /// driver could not satisfy even the minimum buffer negotiation.
    pub fn new(device: &'a Device) -> Result<Self, CaptureError> {
        let fd = device.handle().fd();
        let stream = MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_REQUEST_COUNT)
            .map_err(|e| CaptureError::Configuration(format!("buffer negotiation: {e}")))?;
        debug!("mapped {BUFFER_REQUEST_COUNT} driver buffers");
        Ok(Self {
            stream,
            fd,
            pending: None,
            delivered: 0,
        })
    }
}

impl CaptureDevice for V4l2Device<'_> {
    fn stream_on(&mut self) -> Result<(), CaptureError> {
        self.stream.start().map_err(CaptureError::Streaming)
    }

    fn stream_off(&mut self) -> Result<(), CaptureError> {
        // Same buffer type as stream-on; the stream handle guarantees it.
        self.stream.stop().map_err(CaptureError::Streaming)
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<bool, CaptureError> {
        let mut pollfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        let ret = unsafe { libc::poll(&mut pollfd, 1, millis) };
        match ret {
            0 => Ok(false),
            n if n > 0 => Ok(true),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    // Same treatment as a timeout: the caller re-checks its
                    // stop flag and waits again.
                    Ok(false)
                } else {
                    Err(CaptureError::Streaming(err))
                }
            }
        }
    }

    fn dequeue(&mut self) -> Result<Option<DeviceFrame<'_>>, CaptureError> {
        let index = self.delivered;
        match self.stream.next() {
            Ok((data, meta)) => {
                let bytesused = meta.bytesused as usize;
                let len = if bytesused == 0 || bytesused > data.len() {
                    data.len()
                } else {
                    bytesused
                };
                self.delivered += 1;
                self.pending = Some(index);
                Ok(Some(DeviceFrame {
                    index,
                    data: &data[..len],
                }))
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(CaptureError::Streaming(err)),
        }
    }

    fn requeue(&mut self, index: usize) -> Result<(), CaptureError> {
        match self.pending.take() {
            Some(pending) if pending == index => Ok(()),
            other => Err(CaptureError::Streaming(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("requeue of {index} but {other:?} was outstanding"),
            ))),
        }
    }
}
