//! 错误类型
//!
//! 按可恢复性分层：
//! - `AgentError`：定义 / 构造期错误与编程错误（如访问未声明字段），直接返回给调用方；
//! - `ArgumentError` / `ToolError`：工具参数编译与执行失败，由路由器转成自然语言结果交回模型；
//! - `PolicyError`：策略钩子失败，记录日志后跳过该策略，不中断读写。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 级错误（致命或构造期）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 访问了状态结构中未声明的字段（在任何策略运行前抛出）
    #[error("Field `{0}` is not declared in the agent state")]
    FieldNotFound(String),

    #[error("Field `{field}` expects {expected}, got {found}")]
    StateTypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// 状态引用路径无法在 Agent 引用树中解析
    #[error("State reference `{0}` could not be resolved")]
    InvalidStateRef(String),

    #[error("Invalid agent definition: {0}")]
    InvalidDefinition(String),

    /// Provider 能力与 Agent 定义不匹配（如缺少工具调用支持）
    #[error("Invalid agent setup: {0}")]
    InvalidSetup(String),

    #[error("Provider error: {0}")]
    Provider(#[from] LlmError),
}

/// 工具参数编译失败：工具体不会被调用
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArgumentError {
    #[error("arguments are not a JSON object: {0}")]
    Malformed(String),

    #[error("missing required parameter `{0}`")]
    Missing(String),

    #[error("parameter `{param}` expects {expected}")]
    TypeMismatch { param: String, expected: String },

    #[error("parameter `{param}` must be one of {allowed}")]
    NotAllowed { param: String, allowed: String },
}

/// 工具执行失败
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    State(#[from] AgentError),

    /// 工具作者可直接 `?` 任意错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// 策略钩子失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Failed(String),
}
