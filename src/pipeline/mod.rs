//! Processing pipeline: filter stage, encode stage and the session that
//! orchestrates them.

pub mod encode;
pub mod filter;
pub mod session;

pub use encode::EncodeStage;
pub use filter::FilterStage;
pub use session::{PipelineSession, SessionPhase, SessionSummary};
