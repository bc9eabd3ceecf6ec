//! 后台任务

mod sweeper;

pub use sweeper::{ScheduledDispatchSweeper, SweepReport};
