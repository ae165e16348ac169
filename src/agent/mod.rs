//! Agent：定义 + 状态 + Provider + 关联实例
//!
//! AgentDefinition 描述"是什么"，Agent 是一次可运行的实例：持有自己的 StateStore、
//! Provider、已绑定的关联 Agent、可选的 Tracer 与事件通道。`run` 驱动执行循环
//! （见 `react::run_loop`），返回 AgentResponse；可恢复的失败都以文本形式出现在结果中。

pub mod definition;
pub mod link;
pub mod reference;
pub mod response;

pub use definition::{AgentDefinition, AgentDefinitionBuilder, AgentExtension};
pub use link::{BoundLink, LinkSpec};
pub use reference::{MaybeRef, StateRef};
pub use response::{AgentCallResponse, AgentResponse, ToolResponse};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::core::{AgentError, TaskScheduler};
use crate::llm::{Provider, ProviderInfo, ToolDescriptor};
use crate::observability::{TraceScope, Tracer};
use crate::react::{run_loop, AgentEvent, CallTable};
use crate::state::{PromptTemplates, StateStore};

/// 执行参数（可由配置文件提供）
#[derive(Clone, Debug, PartialEq)]
pub struct AgentSettings {
    /// 允许的工具调用轮数；耗尽后再做一次不带工具的推理
    pub max_call_depth: usize,
    /// 单次工具调用超时
    pub tool_timeout: Duration,
    /// 同一轮内并发执行的调用数上限；1 表示顺序执行
    pub max_concurrent_calls: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_call_depth: 1,
            tool_timeout: Duration::from_secs(30),
            max_concurrent_calls: 1,
        }
    }
}

impl From<&AppConfig> for AgentSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            max_call_depth: cfg.agent.max_call_depth,
            tool_timeout: Duration::from_secs(cfg.agent.tool_timeout_secs),
            max_concurrent_calls: cfg.agent.max_concurrent_calls.max(1),
        }
    }
}

pub struct Agent {
    definition: Arc<AgentDefinition>,
    state: StateStore,
    provider: Arc<dyn Provider>,
    links: Vec<BoundLink>,
    tracer: Option<Arc<dyn Tracer>>,
    emitter: Option<UnboundedSender<AgentEvent>>,
    settings: AgentSettings,
    scheduler: TaskScheduler,
    /// 同一实例的运行串行执行：状态与历史只属于一次运行
    run_lock: Mutex<()>,
}

impl Agent {
    pub fn builder(definition: impl Into<Arc<AgentDefinition>>, provider: Arc<dyn Provider>) -> AgentBuilder {
        AgentBuilder {
            definition: definition.into(),
            provider,
            settings: AgentSettings::default(),
            tracer: None,
            emitter: None,
            bindings: Vec::new(),
            initial: Vec::new(),
        }
    }

    /// 处理一条用户输入
    pub async fn run(&self, input: &str) -> Result<AgentResponse, AgentError> {
        self.run_in_scope(input, TraceScope::disabled()).await
    }

    /// 在给定追踪作用域内运行；关联调用通过它把子 Agent 的 span 挂到父 span 下。
    /// 对同一实例的并发调用排队执行
    pub fn run_in_scope<'a>(
        &'a self,
        input: &'a str,
        scope: TraceScope,
    ) -> BoxFuture<'a, Result<AgentResponse, AgentError>> {
        Box::pin(async move {
            let _turn = self.run_lock.lock().await;
            run_loop(self, input, scope).await
        })
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn provider_info(&self) -> ProviderInfo {
        self.provider.info()
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn links(&self) -> &[BoundLink] {
        &self.links
    }

    pub fn link(&self, name: &str) -> Option<&BoundLink> {
        self.links.iter().find(|l| l.spec.name == name)
    }

    pub(crate) fn tracer(&self) -> Option<Arc<dyn Tracer>> {
        self.tracer.clone()
    }

    pub(crate) fn emitter(&self) -> Option<&UnboundedSender<AgentEvent>> {
        self.emitter.as_ref()
    }

    pub(crate) fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// 引用树：`{"self": 状态快照, "<关联名>": 关联 Agent 的引用树}`
    pub fn agent_reference(&self) -> Value {
        let mut tree = Map::new();
        tree.insert("self".into(), self.state.snapshot());
        for link in &self.links {
            tree.insert(link.spec.name.clone(), link.agent.agent_reference());
        }
        Value::Object(tree)
    }

    /// 按当前状态解析出的、本轮暴露给模型的可调用描述
    pub fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        let reference = self.agent_reference();
        CallTable::build(self, &reference).descriptors
    }

    /// AgentResponse 的 JSON Schema；未声明的部分被移除，final_output 采用结构化输出格式
    pub fn response_schema(&self) -> Value {
        let mut schema = serde_json::to_value(schemars::schema_for!(AgentResponse)).unwrap_or_default();
        if let Some(props) = schema.get_mut("properties").and_then(Value::as_object_mut) {
            if !self.definition.declares_tools() {
                props.remove("tool_responses");
            }
            if !self.definition.declares_links() {
                props.remove("agent_responses");
            }
            if let Some(format) = self.definition.response_format() {
                props.insert("final_output".into(), format.clone());
            }
        }
        schema
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.definition.name())
            .field("provider", &self.provider.info())
            .field("links", &self.links.iter().map(|l| l.spec.name.as_str()).collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish()
    }
}

pub struct AgentBuilder {
    definition: Arc<AgentDefinition>,
    provider: Arc<dyn Provider>,
    settings: AgentSettings,
    tracer: Option<Arc<dyn Tracer>>,
    emitter: Option<UnboundedSender<AgentEvent>>,
    bindings: Vec<(String, Arc<Agent>)>,
    initial: Vec<(String, Value)>,
}

impl AgentBuilder {
    pub fn settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.settings.max_call_depth = depth;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.settings.tool_timeout = timeout;
        self
    }

    pub fn max_concurrent_calls(mut self, n: usize) -> Self {
        self.settings.max_concurrent_calls = n;
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// 运行过程事件发往该通道
    pub fn emitter(mut self, tx: UnboundedSender<AgentEvent>) -> Self {
        self.emitter = Some(tx);
        self
    }

    /// 为定义中声明的关联槽位绑定实例
    pub fn link(mut self, name: impl Into<String>, agent: Arc<Agent>) -> Self {
        self.bindings.push((name.into(), agent));
        self
    }

    /// 覆盖字段初始值（不经过策略）
    pub fn initial(mut self, field: impl Into<String>, value: Value) -> Self {
        self.initial.push((field.into(), value));
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let def = &self.definition;
        let info = self.provider.info();
        let needs_calls = def.declares_tools() || def.declares_links();
        if needs_calls && !self.provider.supports_tool_calls() {
            return Err(AgentError::InvalidSetup(format!(
                "agent `{}` declares tools or linked agents but provider `{}` does not support tool calls",
                def.name(),
                info.name
            )));
        }
        if def.response_format().is_some() && !self.provider.supports_structured_output() {
            return Err(AgentError::InvalidSetup(format!(
                "agent `{}` declares a response format but provider `{}` does not support structured output",
                def.name(),
                info.name
            )));
        }

        let mut bound: HashMap<String, Arc<Agent>> = HashMap::new();
        for (name, agent) in self.bindings {
            if !def.links().iter().any(|l| l.name == name) {
                return Err(AgentError::InvalidSetup(format!(
                    "agent `{}` has no link slot named `{}`",
                    def.name(),
                    name
                )));
            }
            bound.insert(name, agent);
        }
        let links = def
            .links()
            .iter()
            .filter_map(|spec| match bound.remove(&spec.name) {
                Some(agent) => Some(BoundLink {
                    spec: spec.clone(),
                    agent,
                }),
                None => {
                    tracing::debug!(agent = %def.name(), link = %spec.name, "link slot left unbound, skipping");
                    None
                }
            })
            .collect();

        let templates = PromptTemplates {
            instructions: def.instructions().to_string(),
            input: def.input_template().map(str::to_string),
        };
        let state = StateStore::with_values(def.state_schema().clone(), templates, self.initial)?;

        Ok(Agent {
            scheduler: TaskScheduler::new(self.settings.max_concurrent_calls),
            definition: self.definition,
            state,
            provider: self.provider,
            links,
            tracer: self.tracer,
            emitter: self.emitter,
            settings: self.settings,
            run_lock: Mutex::new(()),
        })
    }
}
