//! 内存 Tracer：保存所有 span，按 trace 导出为 JSON（测试与本地调试用）

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::observability::{SpanContext, SpanKind, SpanStatus, Tracer};

#[derive(Clone, Debug, Serialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SpanRecord {
    pub name: String,
    pub kind: SpanKind,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub status: SpanStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub attributes: Map<String, Value>,
    pub events: Vec<SpanEvent>,
}

#[derive(Default)]
struct Traces {
    spans: HashMap<String, SpanRecord>,
    /// trace_id -> 按开始顺序的 span_id
    order: HashMap<String, Vec<String>>,
    trace_order: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryTracer {
    inner: Mutex<Traces>,
}

impl InMemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trace_ids(&self) -> Vec<String> {
        self.inner.lock().trace_order.clone()
    }

    /// 某条 trace 的所有 span（按开始顺序）
    pub fn spans(&self, trace_id: &str) -> Vec<SpanRecord> {
        let inner = self.inner.lock();
        inner
            .order
            .get(trace_id)
            .map(|ids| ids.iter().filter_map(|id| inner.spans.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// 导出 trace；reset 为 true 时同时删除
    pub fn export_trace(&self, trace_id: &str, reset: bool) -> Option<Value> {
        let spans = self.spans(trace_id);
        if spans.is_empty() {
            return None;
        }
        if reset {
            let mut inner = self.inner.lock();
            if let Some(ids) = inner.order.remove(trace_id) {
                for id in ids {
                    inner.spans.remove(&id);
                }
            }
            inner.trace_order.retain(|t| t != trace_id);
        }
        Some(json!({ "trace_id": trace_id, "spans": spans }))
    }

    pub fn clear(&self) {
        *self.inner.lock() = Traces::default();
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl Tracer for InMemoryTracer {
    fn start_span(
        &self,
        name: &str,
        kind: SpanKind,
        parent: Option<&SpanContext>,
        attributes: Map<String, Value>,
    ) -> SpanContext {
        let ctx = SpanContext {
            trace_id: parent.map(|p| p.trace_id.clone()).unwrap_or_else(new_id),
            span_id: new_id()[..16].to_string(),
            parent_span_id: parent.map(|p| p.span_id.clone()),
        };
        let record = SpanRecord {
            name: name.to_string(),
            kind,
            trace_id: ctx.trace_id.clone(),
            span_id: ctx.span_id.clone(),
            parent_span_id: ctx.parent_span_id.clone(),
            status: SpanStatus::Unset,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            attributes,
            events: Vec::new(),
        };

        let mut inner = self.inner.lock();
        if !inner.order.contains_key(&ctx.trace_id) {
            inner.trace_order.push(ctx.trace_id.clone());
        }
        inner
            .order
            .entry(ctx.trace_id.clone())
            .or_default()
            .push(ctx.span_id.clone());
        inner.spans.insert(ctx.span_id.clone(), record);
        ctx
    }

    fn end_span(&self, span: &SpanContext) {
        if let Some(record) = self.inner.lock().spans.get_mut(&span.span_id) {
            let end = Utc::now();
            record.duration_ms = Some((end - record.start_time).num_milliseconds());
            record.end_time = Some(end);
            if record.status == SpanStatus::Unset {
                record.status = SpanStatus::Ok;
            }
        }
    }

    fn set_attributes(&self, span: &SpanContext, attributes: Map<String, Value>) {
        if let Some(record) = self.inner.lock().spans.get_mut(&span.span_id) {
            record.attributes.extend(attributes);
        }
    }

    fn record_exception(&self, span: &SpanContext, message: &str) {
        if let Some(record) = self.inner.lock().spans.get_mut(&span.span_id) {
            record.status = SpanStatus::Error;
            record.events.push(SpanEvent {
                name: "exception".into(),
                timestamp: Utc::now(),
                attributes: crate::observability::attributes([("message", json!(message))]),
            });
        }
    }

    fn add_event(&self, span: &SpanContext, name: &str, attributes: Map<String, Value>) {
        if let Some(record) = self.inner.lock().spans.get_mut(&span.span_id) {
            record.events.push(SpanEvent {
                name: name.to_string(),
                timestamp: Utc::now(),
                attributes,
            });
        }
    }
}
