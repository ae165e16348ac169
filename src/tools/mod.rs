//! 工具层：Tool trait、注册表、参数编译、闭包工具与状态访问器

pub mod accessor;
pub mod function;
pub mod params;
pub mod registry;

pub use accessor::{AccessorMode, StateAccessorTool};
pub use function::{Condition, FnTool};
pub use params::{compile_args, object_schema, params_from_schema, ParamKind, ParamSpec, ToolArgs};
pub use registry::{describe, Tool, ToolRegistry};
