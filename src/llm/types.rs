//! Provider 请求 / 响应数据结构

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 模型发起的一次调用；arguments 为原始 JSON 文本
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// 暴露给模型的可调用描述（工具或关联 Agent）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// 参数 JSON Schema（object）
    pub parameters: Value,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// 一次推理的结果
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: Option<String>,
    /// 结构化输出（配置了 response_format 时）
    pub parsed: Option<Value>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            finish_reason: Some("stop".into()),
            ..Self::default()
        }
    }

    pub fn parsed(value: Value) -> Self {
        Self {
            text: Some(value.to_string()),
            parsed: Some(value),
            finish_reason: Some("stop".into()),
            ..Self::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            finish_reason: Some("tool_calls".into()),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Provider 元信息，随 AgentResponse 返回
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
}
