//! LLM Provider 抽象
//!
//! 具体后端（OpenAI 兼容等）在 crate 之外实现 Provider：给定消息、可调用描述与可选的结构化输出格式，
//! 返回文本 / 结构化结果 / 调用请求之一。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::llm::{LlmResponse, ProviderInfo, ToolDescriptor};
use crate::memory::Message;

/// Provider 调用失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

/// 单次推理请求；tools 为空表示不允许调用
#[derive(Clone, Copy, Debug)]
pub struct GenerateRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolDescriptor],
    pub response_format: Option<&'a Value>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn info(&self) -> ProviderInfo;

    fn supports_tool_calls(&self) -> bool {
        true
    }

    fn supports_structured_output(&self) -> bool {
        true
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<LlmResponse, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
