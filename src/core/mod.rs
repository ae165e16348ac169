//! 核心层：错误分类与调用调度

pub mod error;
pub mod task_scheduler;

pub use error::{AgentError, ArgumentError, PolicyError, ToolError};
pub use task_scheduler::TaskScheduler;
