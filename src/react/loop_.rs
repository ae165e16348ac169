//! 执行循环
//!
//! 推理 -> 分派调用 -> 再推理，直到模型给出最终答案或轮数耗尽：
//! 每轮用最新的引用树重新解析可调用描述；同一次运行中重复的调用只执行一次；
//! 轮数耗尽后再做一次不带工具的推理拿到最终答案。Provider 失败时返回降级结果而非错误。

use std::collections::HashSet;

use futures_util::future::join_all;
use serde_json::{json, Value};

use crate::agent::{Agent, AgentCallResponse, AgentResponse, ToolResponse};
use crate::core::AgentError;
use crate::llm::{GenerateRequest, LlmError, LlmResponse, ToolCall, ToolDescriptor};
use crate::memory::Message;
use crate::observability::{attributes, SpanGuard, SpanKind, TraceScope};
use crate::react::events::{send_event, AgentEvent};
use crate::react::router::{CallRouter, CallTable, Outcome, Routed};

/// Provider 失败时写入历史的 assistant 消息
const DEGRADED_MESSAGE: &str = "Failed to generate a response";

/// 一次运行中累积的调用记录
#[derive(Debug, Default)]
struct RunRecord {
    tools: Vec<ToolResponse>,
    agents: Vec<AgentCallResponse>,
}

impl RunRecord {
    fn push(&mut self, routed: Routed) {
        match routed.outcome {
            Outcome::Tool(r) => self.tools.push(r),
            Outcome::Agent(r) => self.agents.push(r),
        }
    }
}

/// 去重键：优先用调用 id；Provider 未给 id 时用名称 + 规范化参数
fn dedup_key(call: &ToolCall) -> String {
    if !call.id.is_empty() {
        return call.id.clone();
    }
    let canonical = serde_json::from_str::<Value>(&call.arguments)
        .map(|v| v.to_string())
        .unwrap_or_else(|_| call.arguments.trim().to_string());
    format!("anon:{}:{}", call.name, canonical)
}

/// 运行一次 Agent
pub async fn run_loop(agent: &Agent, input: &str, scope: TraceScope) -> Result<AgentResponse, AgentError> {
    let settings = agent.settings();
    let scope = scope.or_tracer(agent.tracer());
    let span = scope.start(
        &format!("{}.run", agent.name()),
        SpanKind::Agent,
        attributes([
            ("input", json!(input)),
            ("model", json!(agent.provider_info().model)),
            ("max_call_depth", json!(settings.max_call_depth)),
        ]),
    );
    let inner = span.scope();
    let state = agent.state();
    let emitter = agent.emitter();

    state.add_user_message(input);

    let mut record = RunRecord::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut depth = 0usize;
    let mut final_output: Option<Value> = None;

    while depth < settings.max_call_depth {
        let reference = agent.agent_reference();
        let table = CallTable::build(agent, &reference);

        let response = match infer(agent, &inner, depth, &table.descriptors).await {
            Ok(r) => r,
            Err(e) => return Ok(degraded(agent, &span, record, e)),
        };

        if response.tool_calls.is_empty() {
            final_output = Some(finish(agent, response));
            break;
        }

        let calls: Vec<ToolCall> = response
            .tool_calls
            .into_iter()
            .filter(|call| {
                let fresh = seen.insert(dedup_key(call));
                if !fresh {
                    tracing::debug!(agent = %agent.name(), call = %call.name, id = %call.id, "duplicate call skipped");
                }
                fresh
            })
            .collect();

        let router = CallRouter::new(agent, &table, inner.clone(), depth);
        if agent.scheduler().is_concurrent() && calls.len() > 1 {
            let router = &router;
            let scheduler = agent.scheduler();
            let results = join_all(calls.iter().map(|call| async move {
                let _permit = scheduler.acquire_call().await;
                router.execute(call).await
            }))
            .await;
            for routed in results {
                router.record(&routed);
                record.push(routed);
            }
        } else {
            for call in &calls {
                let routed = router.dispatch(call).await;
                record.push(routed);
            }
        }

        depth += 1;
    }

    let final_output = match final_output {
        Some(output) => output,
        None => match infer(agent, &inner, depth, &[]).await {
            Ok(response) => finish(agent, response),
            Err(e) => return Ok(degraded(agent, &span, record, e)),
        },
    };

    send_event(
        emitter,
        AgentEvent::Succeeded {
            agent: agent.name().to_string(),
        },
    );
    span.set_attribute("output", final_output.clone());
    Ok(assemble(agent, final_output, record, None))
}

/// 一次推理，包在 Inference span 中
async fn infer(
    agent: &Agent,
    scope: &TraceScope,
    round: usize,
    tools: &[ToolDescriptor],
) -> Result<LlmResponse, LlmError> {
    send_event(
        agent.emitter(),
        AgentEvent::Generating {
            agent: agent.name().to_string(),
            round,
        },
    );
    let span = scope.start(
        "inference",
        SpanKind::Inference,
        attributes([("round", json!(round)), ("tool_count", json!(tools.len()))]),
    );
    let messages = agent.state().messages();
    let request = GenerateRequest {
        messages: &messages,
        tools,
        response_format: agent.definition().response_format(),
    };
    match agent.provider().generate(request).await {
        Ok(response) => {
            if let Some(usage) = response.usage {
                span.set_attributes(attributes([
                    ("prompt_tokens", json!(usage.prompt_tokens)),
                    ("completion_tokens", json!(usage.completion_tokens)),
                    ("total_tokens", json!(usage.total_tokens)),
                ]));
            }
            span.set_attribute("tool_calls", json!(response.tool_calls.len()));
            Ok(response)
        }
        Err(e) => {
            span.record_exception(&e.to_string());
            Err(e)
        }
    }
}

/// 最终答案：结构化结果优先，否则为文本；同时写入 assistant 消息
fn finish(agent: &Agent, response: LlmResponse) -> Value {
    let text = response.text.unwrap_or_default();
    agent.state().push_message(Message::assistant(text.clone()));
    response.parsed.unwrap_or(Value::String(text))
}

fn degraded(agent: &Agent, span: &SpanGuard, record: RunRecord, error: LlmError) -> AgentResponse {
    tracing::error!(agent = %agent.name(), error = %error, "provider failed to generate a response");
    send_event(
        agent.emitter(),
        AgentEvent::Error {
            text: error.to_string(),
        },
    );
    span.record_exception(&error.to_string());
    agent.state().push_message(Message::assistant(DEGRADED_MESSAGE));
    let output = Value::String(format!("The LLM failed to generate a response: {error}"));
    assemble(agent, output, record, Some(error.to_string()))
}

fn assemble(agent: &Agent, final_output: Value, record: RunRecord, error: Option<String>) -> AgentResponse {
    let def = agent.definition();
    AgentResponse {
        agent: agent.name().to_string(),
        final_output,
        state: agent.state().snapshot(),
        provider: agent.provider_info(),
        tool_responses: def.declares_tools().then_some(record.tools),
        agent_responses: def.declares_links().then_some(record.agents),
        error,
    }
}
