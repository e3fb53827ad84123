//! Stage workers, visibility heartbeats and pipeline counters

mod stats;
mod visibility;
mod worker;

pub use stats::{PipelineSnapshot, PipelineStats, StageCounters, StageSnapshot};
pub use visibility::VisibilityHeartbeat;
pub use worker::{PipelineStage, StageWorker};
