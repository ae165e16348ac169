//! 追踪抽象
//!
//! Tracer 只定义 span 生命周期（开始 / 结束 / 属性 / 异常 / 事件），后端自行实现。
//! 执行循环通过 TraceScope 与 SpanGuard 使用它：未配置 Tracer 时全部为空操作，
//! SpanGuard 在 drop 时自动结束 span，提前返回也不会遗漏。

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Agent,
    Tool,
    Inference,
    Step,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

/// span 标识；子 span 共享 trace_id
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

pub trait Tracer: Send + Sync {
    fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        parent: Option<&SpanContext>,
        attributes: Map<String, Value>,
    ) -> SpanContext;

    fn end_span(&self, span: &SpanContext);

    fn set_attributes(&self, span: &SpanContext, attributes: Map<String, Value>);

    /// 记录异常并把 span 标记为 Error
    fn record_exception(&self, span: &SpanContext, message: &str);

    fn add_event(&self, _span: &SpanContext, _name: &str, _attributes: Map<String, Value>) {}
}

/// 由键值对构造属性表
pub fn attributes<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// 追踪作用域：Tracer + 父 span；子 Agent 通过它把 span 挂到同一条 trace 上
#[derive(Clone, Default)]
pub struct TraceScope {
    tracer: Option<Arc<dyn Tracer>>,
    parent: Option<SpanContext>,
}

impl TraceScope {
    pub fn new(tracer: Option<Arc<dyn Tracer>>) -> Self {
        Self { tracer, parent: None }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.tracer.is_some()
    }

    pub fn tracer(&self) -> Option<&Arc<dyn Tracer>> {
        self.tracer.as_ref()
    }

    pub fn parent(&self) -> Option<&SpanContext> {
        self.parent.as_ref()
    }

    /// 作用域没有 Tracer 时使用 fallback（父 span 不变）
    pub fn or_tracer(mut self, fallback: Option<Arc<dyn Tracer>>) -> Self {
        if self.tracer.is_none() {
            self.tracer = fallback;
        }
        self
    }

    pub fn start(&self, name: &str, kind: SpanKind, attributes: Map<String, Value>) -> SpanGuard {
        let span = self
            .tracer
            .as_ref()
            .map(|t| t.start_span(name, kind, self.parent.as_ref(), attributes));
        SpanGuard {
            tracer: self.tracer.clone(),
            span,
        }
    }
}

/// 活动 span；drop 时结束
pub struct SpanGuard {
    tracer: Option<Arc<dyn Tracer>>,
    span: Option<SpanContext>,
}

impl SpanGuard {
    pub fn context(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    pub fn set_attributes(&self, attributes: Map<String, Value>) {
        if let (Some(tracer), Some(span)) = (&self.tracer, &self.span) {
            tracer.set_attributes(span, attributes);
        }
    }

    pub fn set_attribute(&self, key: &str, value: Value) {
        self.set_attributes(attributes([(key, value)]));
    }

    pub fn record_exception(&self, message: &str) {
        if let (Some(tracer), Some(span)) = (&self.tracer, &self.span) {
            tracer.record_exception(span, message);
        }
    }

    pub fn add_event(&self, name: &str, attributes: Map<String, Value>) {
        if let (Some(tracer), Some(span)) = (&self.tracer, &self.span) {
            tracer.add_event(span, name, attributes);
        }
    }

    /// 以本 span 为父的子作用域
    pub fn scope(&self) -> TraceScope {
        TraceScope {
            tracer: self.tracer.clone(),
            parent: self.span.clone(),
        }
    }

    pub fn end(self) {}
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let (Some(tracer), Some(span)) = (&self.tracer, self.span.take()) {
            tracer.end_span(&span);
        }
    }
}
