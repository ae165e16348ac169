//! LLM 层：Provider 抽象、请求 / 响应类型与 Mock 实现

pub mod mock;
pub mod traits;
pub mod types;

pub use mock::{MockProvider, MockReply, RecordedRequest};
pub use traits::{GenerateRequest, LlmError, Provider};
pub use types::{LlmResponse, ProviderInfo, ToolCall, ToolDescriptor, Usage};
