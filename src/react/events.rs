//! 运行过程事件：推理、工具调用、失败与完成，供 UI / 日志流式展示

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 正在调用 Provider（第几轮）
    Generating { agent: String, round: usize },
    /// 正在执行工具
    ToolProcessing {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具参数无效或执行失败
    ToolError { tool: String, reason: String },
    /// 调用关联 Agent
    AgentCall { agent: String, input: String },
    /// 本次运行完成
    Succeeded { agent: String },
    /// Provider 失败
    Error { text: String },
}

pub(crate) fn send_event(tx: Option<&UnboundedSender<AgentEvent>>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
