//! 状态层：类型化字段、读写事件、策略管线与后台通道

mod background;
pub mod event;
pub mod field;
pub mod policies;
pub mod policy;
pub mod sqlite;
pub mod store;

pub use event::{Event, EventKind};
pub use field::{Access, FieldType, StateField, StateSchema};
pub use policies::{HistoryEntry, HistoryPolicy, NotifyPolicy, TransformPolicy, ValidatePolicy};
pub use policy::{Policy, PolicyResult};
pub use sqlite::SqlitePolicy;
pub use store::{PromptTemplates, StateStore};
