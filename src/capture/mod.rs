//! Camera capture: buffer pool, single-slot mailbox, worker thread and the
//! device backends feeding it.

pub mod device;
pub mod mailbox;
pub mod pattern;
pub mod pool;
pub mod v4l2;
pub mod worker;

pub use device::{CaptureDevice, DeviceFrame};
pub use mailbox::{CapturedFrame, FrameMailbox};
pub use pattern::TestPatternDevice;
pub use pool::{FrameBuffer, FrameBufferPool};
pub use worker::{CaptureLoop, CaptureState, CaptureWorker};
