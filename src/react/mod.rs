//! 执行层：多轮推理 / 调用循环、调用路由、过程事件

pub mod events;
pub mod loop_;
pub mod router;

pub use events::AgentEvent;
pub use loop_::run_loop;
pub use router::{CallRouter, CallTable, Outcome, Route, Routed};
