//! Fixed-size arena of frame buffers shared between the capture worker and
//! the consumer.
//!
//! A buffer's byte storage travels with the checkout: `checkout` moves a
//! [`FrameBuffer`] out of the free list, the worker fills it and publishes it
//! through the mailbox, and the consumer hands it back with `give_back` once
//! the bytes have been copied into the pipeline. Holding the storage by value
//! makes use-after-return unrepresentable.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::config::MIN_BUFFER_COUNT;
use crate::error::CaptureError;

/// One indexed frame buffer, owned by the pool while free and by exactly one
/// thread while checked out.
#[derive(Debug)]
pub struct FrameBuffer {
    index: usize,
    data: Vec<u8>,
}

impl FrameBuffer {
    /// Stable index of this buffer within its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Copy `src` into the buffer, truncating to the buffer capacity.
    /// Returns the number of bytes stored.
    pub fn fill(&mut self, src: &[u8]) -> usize {
        let len = src.len().min(self.data.len());
        self.data[..len].copy_from_slice(&src[..len]);
        len
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Pool of preallocated, equally sized frame buffers.
#[derive(Debug)]
pub struct FrameBufferPool {
    free: Mutex<VecDeque<FrameBuffer>>,
    buffer_count: usize,
}

impl FrameBufferPool {
    /// Allocate `count` buffers of `buffer_len` bytes each.
    ///
    /// Fewer than two buffers cannot double-buffer capture, so such a request
    /// fails with [`CaptureError::InsufficientBuffers`].
    pub fn new(count: usize, buffer_len: usize) -> Result<Self, CaptureError> {
        if count < MIN_BUFFER_COUNT {
            return Err(CaptureError::InsufficientBuffers {
                granted: count,
                needed: MIN_BUFFER_COUNT,
            });
        }

        let free = (0..count)
            .map(|index| FrameBuffer {
                index,
                data: vec![0u8; buffer_len],
            })
            .collect();

        Ok(Self {
            free: Mutex::new(free),
            buffer_count: count,
        })
    }

    /// Take a free buffer, or `None` when every buffer is in flight.
    pub fn checkout(&self) -> Option<FrameBuffer> {
        self.free.lock().unwrap().pop_front()
    }

    /// Return a buffer to the free list after its contents were consumed.
    pub fn give_back(&self, buffer: FrameBuffer) {
        debug_assert!(buffer.index < self.buffer_count);
        self.free.lock().unwrap().push_back(buffer);
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Number of buffers currently available for checkout.
    pub fn free_buffers(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}
