//! Single-slot handoff between the capture worker and the consumer.
//!
//! The mailbox holds at most one [`CapturedFrame`]. Publishing into an
//! occupied slot replaces the stale frame and hands it back to the publisher
//! so its buffer can be recycled (drop-oldest backpressure, at most one frame
//! of latency). The consumer blocks on `take` until a frame arrives or the
//! worker closes the mailbox.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::capture::pool::FrameBuffer;

/// A frame delivered by the capture worker: an owned copy of the device bytes
/// plus the logical sequence index assigned at capture time.
#[derive(Debug)]
pub struct CapturedFrame {
    pub buffer: FrameBuffer,
    /// Valid byte length within `buffer`.
    pub len: usize,
    /// Monotone index of this frame within the session.
    pub sequence: u64,
}

impl CapturedFrame {
    pub fn data(&self) -> &[u8] {
        &self.buffer.data()[..self.len]
    }
}

#[derive(Debug, Default)]
struct Slot {
    frame: Option<CapturedFrame>,
    closed: bool,
}

/// Capacity-1 mailbox with explicit close semantics.
#[derive(Debug, Default)]
pub struct FrameMailbox {
    slot: Mutex<Slot>,
    available: Condvar,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a frame, waking one waiting consumer.
    ///
    /// Returns the displaced frame when the previous publish was never taken,
    /// so the caller can return its buffer to the pool.
    pub fn publish(&self, frame: CapturedFrame) -> Option<CapturedFrame> {
        let mut slot = self.slot.lock().unwrap();
        let stale = slot.frame.replace(frame);
        self.available.notify_one();
        stale
    }

    /// Block until a frame is available, the mailbox is closed, or `timeout`
    /// elapses. `None` means no frame was delivered within the window.
    pub fn take(&self, timeout: Duration) -> Option<CapturedFrame> {
        let mut slot = self.slot.lock().unwrap();
        loop {
            if let Some(frame) = slot.frame.take() {
                return Some(frame);
            }
            if slot.closed {
                return None;
            }
            let (guard, result) = self.available.wait_timeout(slot, timeout).unwrap();
            slot = guard;
            if result.timed_out() {
                return slot.frame.take();
            }
        }
    }

    /// Mark the mailbox closed and wake all waiters. Publishing after close is
    /// a programming error; the frame would never be delivered.
    pub fn close(&self) {
        let mut slot = self.slot.lock().unwrap();
        slot.closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().unwrap().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pool::FrameBufferPool;
    use std::sync::Arc;
    use std::thread;

    fn frame(pool: &FrameBufferPool, sequence: u64, byte: u8) -> CapturedFrame {
        let mut buffer = pool.checkout().unwrap();
        let len = buffer.fill(&[byte; 4]);
        CapturedFrame {
            buffer,
            len,
            sequence,
        }
    }

    #[test]
    fn take_returns_published_frame() {
        let pool = FrameBufferPool::new(2, 4).unwrap();
        let mailbox = FrameMailbox::new();
        assert!(mailbox.publish(frame(&pool, 7, 0xab)).is_none());

        let got = mailbox.take(Duration::from_millis(10)).unwrap();
        assert_eq!(got.sequence, 7);
        assert_eq!(got.data(), &[0xab; 4]);
    }

    #[test]
    fn slow_consumer_sees_only_newest_frame() {
        let pool = FrameBufferPool::new(4, 4).unwrap();
        let mailbox = FrameMailbox::new();

        for sequence in 0..4 {
            if let Some(stale) = mailbox.publish(frame(&pool, sequence, sequence as u8)) {
                assert_eq!(stale.sequence, sequence - 1);
                pool.give_back(stale.buffer);
            }
        }

        let got = mailbox.take(Duration::from_millis(10)).unwrap();
        assert_eq!(got.sequence, 3);
        assert!(mailbox.take(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn take_times_out_on_empty_slot() {
        let mailbox = FrameMailbox::new();
        assert!(mailbox.take(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let mailbox = Arc::new(FrameMailbox::new());
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || mailbox.take(Duration::from_secs(5)))
        };
        // give the waiter time to block
        thread::sleep(Duration::from_millis(20));
        mailbox.close();
        assert!(waiter.join().unwrap().is_none());
        assert!(mailbox.is_closed());
    }

    #[test]
    fn frame_published_before_close_is_still_delivered() {
        let pool = FrameBufferPool::new(2, 4).unwrap();
        let mailbox = FrameMailbox::new();
        mailbox.publish(frame(&pool, 1, 1));
        mailbox.close();
        assert!(mailbox.take(Duration::from_millis(5)).is_some());
        assert!(mailbox.take(Duration::from_millis(5)).is_none());
    }
}
