//! 调用路由
//!
//! 模型每发起一次调用，按名称分派到工具、关联 Agent 或"未知调用"三条路径之一。
//! 参数编译失败、工具报错、超时与 panic 都被转成自然语言结果交回模型，不会中断循环。
//! 每次调用恰好向历史追加两条消息：调用记录在前，结果在后。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio::time::timeout;

use crate::agent::{Agent, AgentCallResponse, BoundLink, LinkSpec, ToolResponse};
use crate::llm::{ToolCall, ToolDescriptor};
use crate::memory::Message;
use crate::observability::{attributes, SpanKind, TraceScope};
use crate::react::events::{send_event, AgentEvent};
use crate::tools::{compile_args, describe, ParamSpec, Tool};

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 一轮推理使用的调用表：暴露给模型的描述 + 按名解析好的参数
#[derive(Clone, Debug, Default)]
pub struct CallTable {
    pub descriptors: Vec<ToolDescriptor>,
    params: HashMap<String, Vec<ParamSpec>>,
}

impl CallTable {
    /// 用引用树解析所有参数；只有本轮可用的工具 / 关联进入 descriptors
    pub fn build(agent: &Agent, reference: &Value) -> Self {
        let state = agent.state();
        let mut table = CallTable::default();
        for tool in agent.definition().tools().iter() {
            let (descriptor, resolved) = describe(tool.name(), tool.description(), &tool.parameters(), reference);
            if tool.is_available(state) {
                table.descriptors.push(descriptor);
            }
            table.params.insert(tool.name().to_string(), resolved);
        }
        for link in agent.links() {
            let (descriptor, resolved) = describe(&link.spec.name, &link.description(), &LinkSpec::params(), reference);
            if link.spec.is_available(state) {
                table.descriptors.push(descriptor);
            }
            table.params.insert(link.spec.name.clone(), resolved);
        }
        table
    }

    pub fn params(&self, name: &str) -> &[ParamSpec] {
        self.params.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// 路由结果
pub enum Route<'a> {
    Tool(Arc<dyn Tool>),
    Link(&'a BoundLink),
    Unknown,
}

/// 一次调用的记录
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Tool(ToolResponse),
    Agent(AgentCallResponse),
}

/// 已执行（尚未写入历史）的调用
#[derive(Clone, Debug)]
pub struct Routed {
    pub call: ToolCall,
    pub output: String,
    pub outcome: Outcome,
}

pub struct CallRouter<'a> {
    agent: &'a Agent,
    table: &'a CallTable,
    scope: TraceScope,
    depth: usize,
}

impl<'a> CallRouter<'a> {
    pub fn new(agent: &'a Agent, table: &'a CallTable, scope: TraceScope, depth: usize) -> Self {
        Self {
            agent,
            table,
            scope,
            depth,
        }
    }

    /// 工具优先；其次关联 Agent
    pub fn route(&self, name: &str) -> Route<'a> {
        if let Some(tool) = self.agent.definition().tools().get(name) {
            return Route::Tool(tool);
        }
        match self.agent.link(name) {
            Some(link) => Route::Link(link),
            None => Route::Unknown,
        }
    }

    /// 执行并写入历史
    pub async fn dispatch(&self, call: &ToolCall) -> Routed {
        let routed = self.execute(call).await;
        self.record(&routed);
        routed
    }

    /// 按请求顺序写入历史：调用记录 + 结果
    pub fn record(&self, routed: &Routed) {
        let state = self.agent.state();
        state.push_message(Message::tool_call(routed.call.clone()));
        state.push_message(Message::tool_result(routed.call.id.clone(), routed.output.clone()));
    }

    /// 只执行，不写历史（并发执行时由调用方按序 record）
    pub async fn execute(&self, call: &ToolCall) -> Routed {
        match self.route(&call.name) {
            Route::Tool(tool) => self.run_tool(call, tool).await,
            Route::Link(link) => self.run_link(call, link).await,
            Route::Unknown => self.unknown(call),
        }
    }

    fn unknown(&self, call: &ToolCall) -> Routed {
        let output = format!(
            "Unknown call `{}`: no tool or linked agent with that name.",
            call.name
        );
        tracing::warn!(agent = %self.agent.name(), call = %call.name, "model requested an unknown call");
        send_event(
            self.agent.emitter(),
            AgentEvent::ToolError {
                tool: call.name.clone(),
                reason: output.clone(),
            },
        );
        self.tool_routed(call, Value::Null, output, false)
    }

    async fn run_tool(&self, call: &ToolCall, tool: Arc<dyn Tool>) -> Routed {
        let args = match compile_args(self.table.params(&call.name), &call.arguments) {
            Ok(args) => args,
            Err(e) => {
                let output = format!("Function args were invalid: {e}");
                audit(&call.name, "invalid_args", 0, &call.arguments);
                send_event(
                    self.agent.emitter(),
                    AgentEvent::ToolError {
                        tool: call.name.clone(),
                        reason: output.clone(),
                    },
                );
                return self.tool_routed(call, Value::Null, output, false);
            }
        };
        let arguments = args.clone().into_value();
        send_event(
            self.agent.emitter(),
            AgentEvent::ToolProcessing {
                tool: call.name.clone(),
                args: arguments.clone(),
            },
        );

        let span = self.scope.start(
            &call.name,
            SpanKind::Tool,
            attributes([
                ("call_id", json!(call.id)),
                ("arguments", arguments.clone()),
                ("call_depth", json!(self.depth)),
            ]),
        );
        let limit = self.agent.settings().tool_timeout;
        let started = Instant::now();
        let result = timeout(
            limit,
            AssertUnwindSafe(tool.execute(self.agent.state(), args)).catch_unwind(),
        )
        .await;
        let elapsed = started.elapsed().as_millis() as u64;

        let (succeeded, outcome, output) = match result {
            Ok(Ok(Ok(text))) => (true, "ok", text),
            Ok(Ok(Err(e))) => (false, "error", failure("Tool", &call.name, &e.to_string())),
            Ok(Err(panic)) => (false, "error", failure("Tool", &call.name, &panic_message(panic))),
            Err(_) => (
                false,
                "timeout",
                failure("Tool", &call.name, &format!("timed out after {}ms", limit.as_millis())),
            ),
        };
        audit(&call.name, outcome, elapsed, &call.arguments);

        if succeeded {
            span.set_attribute("output", json!(output));
        } else {
            span.record_exception(&output);
            send_event(
                self.agent.emitter(),
                AgentEvent::ToolError {
                    tool: call.name.clone(),
                    reason: output.clone(),
                },
            );
        }
        self.tool_routed(call, arguments, output, succeeded)
    }

    async fn run_link(&self, call: &ToolCall, link: &BoundLink) -> Routed {
        let compiled = compile_args(self.table.params(&call.name), &call.arguments)
            .map_err(|e| e.to_string())
            .and_then(|args| args.get::<String>("user_input").map_err(|e| e.to_string()));
        let input = match compiled {
            Ok(input) => input,
            Err(e) => {
                let output = format!("Function args were invalid: {e}");
                audit(&call.name, "invalid_args", 0, &call.arguments);
                send_event(
                    self.agent.emitter(),
                    AgentEvent::ToolError {
                        tool: call.name.clone(),
                        reason: output.clone(),
                    },
                );
                return self.agent_routed(call, output, false, None);
            }
        };
        send_event(
            self.agent.emitter(),
            AgentEvent::AgentCall {
                agent: call.name.clone(),
                input: input.clone(),
            },
        );

        let span = self.scope.start(
            &call.name,
            SpanKind::Agent,
            attributes([
                ("call_id", json!(call.id)),
                ("user_input", json!(input)),
                ("call_depth", json!(self.depth)),
            ]),
        );
        let started = Instant::now();
        let result = AssertUnwindSafe(link.agent.run_in_scope(&input, span.scope()))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed().as_millis() as u64;

        let (output, succeeded, response) = match result {
            Ok(Ok(response)) => match &response.error {
                Some(err) => (failure("Agent", &call.name, err), false, Some(Box::new(response))),
                None => (
                    format!("Agent {}: {}", call.name, response.output_text()),
                    true,
                    Some(Box::new(response)),
                ),
            },
            Ok(Err(e)) => (failure("Agent", &call.name, &e.to_string()), false, None),
            Err(panic) => (failure("Agent", &call.name, &panic_message(panic)), false, None),
        };
        audit(&call.name, if succeeded { "ok" } else { "error" }, elapsed, &call.arguments);

        if succeeded {
            span.set_attribute("output", json!(output));
        } else {
            span.record_exception(&output);
            send_event(
                self.agent.emitter(),
                AgentEvent::ToolError {
                    tool: call.name.clone(),
                    reason: output.clone(),
                },
            );
        }
        self.agent_routed(call, output, succeeded, response)
    }

    fn tool_routed(&self, call: &ToolCall, arguments: Value, output: String, succeeded: bool) -> Routed {
        Routed {
            outcome: Outcome::Tool(ToolResponse {
                name: call.name.clone(),
                call_id: call.id.clone(),
                raw_arguments: call.arguments.clone(),
                arguments,
                call_depth: self.depth,
                output: output.clone(),
                succeeded,
            }),
            call: call.clone(),
            output,
        }
    }

    fn agent_routed(
        &self,
        call: &ToolCall,
        output: String,
        succeeded: bool,
        response: Option<Box<crate::agent::AgentResponse>>,
    ) -> Routed {
        Routed {
            outcome: Outcome::Agent(AgentCallResponse {
                name: call.name.clone(),
                call_id: call.id.clone(),
                raw_arguments: call.arguments.clone(),
                call_depth: self.depth,
                output: output.clone(),
                succeeded,
                response,
            }),
            call: call.clone(),
            output,
        }
    }
}

fn failure(kind: &str, name: &str, err: &str) -> String {
    format!(
        "{kind} `{name}` failed: {err}. Please kindly state to the user that it failed, provide state, and ask if they want to try again."
    )
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// 结构化审计日志（JSON）
fn audit(name: &str, outcome: &str, duration_ms: u64, raw_arguments: &str) {
    let audit = json!({
        "event": "tool_audit",
        "tool": name,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": args_preview(raw_arguments),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(raw: &str) -> String {
    if raw.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", raw.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::agent::AgentDefinition;
    use crate::core::ToolError;
    use crate::llm::MockProvider;
    use crate::memory::Role;
    use crate::state::{FieldType, StateField};
    use crate::tools::FnTool;

    fn agent(timeout: Duration) -> Agent {
        let def = AgentDefinition::builder("router")
            .instructions("route things")
            .field(StateField::new("count", FieldType::Integer).default(json!(0)))
            .tool(
                FnTool::new("add", "add to count", |state, args| {
                    let by: i64 = args.get("by")?;
                    let count: i64 = state.get_as("count")?;
                    state.set("count", json!(count + by))?;
                    Ok(format!("count is {}", count + by))
                })
                .param(ParamSpec::integer("by").required()),
            )
            .tool(FnTool::new("boom", "always fails", |_, _| Err::<String, _>(ToolError::failed("disk on fire"))))
            .tool(FnTool::new("panic", "panics", |_, _| -> Result<String, ToolError> { panic!("kaboom") }))
            .tool(FnTool::new_async("slow", "sleeps", |_, _| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ToolError>("done".to_string())
            }))
            .build()
            .unwrap();
        Agent::builder(def, Arc::new(MockProvider::new()))
            .tool_timeout(timeout)
            .build()
            .unwrap()
    }

    async fn run(agent: &Agent, call: ToolCall) -> Routed {
        let table = CallTable::build(agent, &agent.agent_reference());
        let router = CallRouter::new(agent, &table, TraceScope::disabled(), 0);
        router.dispatch(&call).await
    }

    #[tokio::test]
    async fn test_tool_success_appends_two_messages() {
        let agent = agent(Duration::from_secs(1));
        let routed = run(&agent, ToolCall::new("c1", "add", r#"{"by": 2}"#)).await;
        assert_eq!(routed.output, "count is 2");
        assert!(matches!(routed.outcome, Outcome::Tool(ref r) if r.succeeded && r.arguments == json!({"by": 2})));

        let history = agent.state().history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::Assistant);
        assert_eq!(history[0].tool_calls[0].id, "c1");
        assert_eq!(history[1].role, Role::Tool);
        assert_eq!(history[1].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(history[1].content, "count is 2");
    }

    #[tokio::test]
    async fn test_invalid_args_skip_the_tool() {
        let agent = agent(Duration::from_secs(1));
        let routed = run(&agent, ToolCall::new("c1", "add", r#"{"by": "lots"}"#)).await;
        assert!(routed.output.starts_with("Function args were invalid:"));
        assert_eq!(agent.state().get("count").unwrap(), json!(0));
        assert_eq!(agent.state().history_len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_call() {
        let agent = agent(Duration::from_secs(1));
        let routed = run(&agent, ToolCall::new("c1", "ghost", "{}")).await;
        assert_eq!(routed.output, "Unknown call `ghost`: no tool or linked agent with that name.");
        assert!(matches!(routed.outcome, Outcome::Tool(ref r) if !r.succeeded));
        assert_eq!(agent.state().history_len(), 2);
    }

    #[tokio::test]
    async fn test_failures_become_text() {
        let agent = agent(Duration::from_millis(50));

        let failed = run(&agent, ToolCall::new("c1", "boom", "")).await;
        assert!(failed.output.starts_with("Tool `boom` failed: disk on fire."));
        assert!(failed.output.ends_with("ask if they want to try again."));

        let panicked = run(&agent, ToolCall::new("c2", "panic", "")).await;
        assert!(panicked.output.contains("panicked: kaboom"));

        let slow = run(&agent, ToolCall::new("c3", "slow", "")).await;
        assert!(slow.output.contains("timed out"));
        assert_eq!(agent.state().history_len(), 6);
    }

    #[test]
    fn test_args_preview_is_truncated() {
        let long = "x".repeat(500);
        assert_eq!(args_preview(&long).chars().count(), ARGS_PREVIEW_CHARS + 3);
        assert_eq!(args_preview("{}"), "{}");
    }
}
