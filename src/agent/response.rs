//! 运行结果记录

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ProviderInfo;

/// 一次工具调用的记录（含未知调用与参数无效的调用）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolResponse {
    pub name: String,
    pub call_id: String,
    pub raw_arguments: String,
    /// 编译后的参数；编译失败时为 null
    pub arguments: Value,
    pub call_depth: usize,
    pub output: String,
    pub succeeded: bool,
}

/// 一次关联 Agent 调用的记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentCallResponse {
    pub name: String,
    pub call_id: String,
    pub raw_arguments: String,
    pub call_depth: usize,
    pub output: String,
    pub succeeded: bool,
    /// 子 Agent 的完整结果；参数无效或子 Agent 失败时为空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Box<AgentResponse>>,
}

/// `Agent::run` 的结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentResponse {
    pub agent: String,
    /// 结构化输出（配置了 response_format）或文本
    pub final_output: Value,
    /// 运行结束时的状态快照
    pub state: Value,
    pub provider: ProviderInfo,
    /// 仅当 Agent 声明了工具时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_responses: Option<Vec<ToolResponse>>,
    /// 仅当 Agent 声明了关联 Agent 时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_responses: Option<Vec<AgentCallResponse>>,
    /// Provider 失败时的错误信息（降级结果）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    /// final_output 的文本形式
    pub fn output_text(&self) -> String {
        crate::memory::template::value_to_text(&self.final_output)
    }
}
