//! 内置策略
//!
//! - `TransformPolicy`：读 / 写时用闭包改写值
//! - `ValidatePolicy`：写入值不满足谓词时回退为旧值
//! - `HistoryPolicy`：后台记录每次写入（有界）
//! - `NotifyPolicy`：后台把事件转发到 channel

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::state::{Event, EventKind, Policy, PolicyResult};

type TransformFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TransformPolicy {
    name: String,
    on_get: Option<TransformFn>,
    on_set: Option<TransformFn>,
}

impl TransformPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn map_get(mut self, f: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static) -> Self {
        self.on_get = Some(Arc::new(f));
        self
    }

    pub fn map_set(mut self, f: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static) -> Self {
        self.on_set = Some(Arc::new(f));
        self
    }
}

#[async_trait]
impl Policy for TransformPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_get(&self, _event: &Event, value: &Value) -> PolicyResult {
        Ok(self.on_get.as_ref().and_then(|f| f(value)))
    }

    fn on_set(&self, _event: &Event, value: &Value) -> PolicyResult {
        Ok(self.on_set.as_ref().and_then(|f| f(value)))
    }
}

type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// 写入校验：不通过时保留旧值
#[derive(Clone)]
pub struct ValidatePolicy {
    message: String,
    predicate: Predicate,
}

impl ValidatePolicy {
    pub fn new(message: impl Into<String>, predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self {
            message: message.into(),
            predicate: Arc::new(predicate),
        }
    }
}

#[async_trait]
impl Policy for ValidatePolicy {
    fn name(&self) -> &str {
        "validate"
    }

    fn on_set(&self, event: &Event, value: &Value) -> PolicyResult {
        if (self.predicate)(value) {
            return Ok(None);
        }
        tracing::warn!(field = %event.name, reason = %self.message, "write vetoed");
        Ok(Some(event.previous.clone().unwrap_or(Value::Null)))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub name: String,
    pub previous: Value,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

/// 记录写入历史，超过 max_len 丢弃最旧的记录
#[derive(Clone)]
pub struct HistoryPolicy {
    max_len: usize,
    entries: Arc<Mutex<VecDeque<HistoryEntry>>>,
}

impl HistoryPolicy {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            entries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl Policy for HistoryPolicy {
    fn name(&self) -> &str {
        "history"
    }

    async fn background_set(&self, event: &Event, _value: &Value) -> PolicyResult {
        let mut entries = self.entries.lock();
        entries.push_back(HistoryEntry {
            name: event.name.clone(),
            previous: event.previous.clone().unwrap_or(Value::Null),
            value: event.value.clone(),
            timestamp: event.timestamp,
        });
        while entries.len() > self.max_len {
            entries.pop_front();
        }
        Ok(None)
    }
}

/// 把事件（value 为链上当前值）发给订阅方
#[derive(Clone)]
pub struct NotifyPolicy {
    tx: mpsc::UnboundedSender<Event>,
    kinds: Vec<EventKind>,
}

impl NotifyPolicy {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            tx,
            kinds: vec![EventKind::Set],
        }
    }

    pub fn include_reads(mut self) -> Self {
        if !self.kinds.contains(&EventKind::Get) {
            self.kinds.push(EventKind::Get);
        }
        self
    }

    fn forward(&self, event: &Event, value: &Value) {
        if self.kinds.contains(&event.kind) {
            let _ = self.tx.send(event.with_value(value.clone()));
        }
    }
}

#[async_trait]
impl Policy for NotifyPolicy {
    fn name(&self) -> &str {
        "notify"
    }

    async fn background_get(&self, event: &Event, value: &Value) -> PolicyResult {
        self.forward(event, value);
        Ok(None)
    }

    async fn background_set(&self, event: &Event, value: &Value) -> PolicyResult {
        self.forward(event, value);
        Ok(None)
    }
}
