//! 状态访问事件：每次字段读写生成一个不可变的 Event，交给策略链处理

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Get,
    Set,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub name: String,
    pub value: Value,
    /// 仅 Set 事件携带写入前的值
    pub previous: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn get(name: impl Into<String>, value: Value) -> Self {
        Self {
            kind: EventKind::Get,
            name: name.into(),
            value,
            previous: None,
            timestamp: Utc::now(),
        }
    }

    pub fn set(name: impl Into<String>, value: Value, previous: Value) -> Self {
        Self {
            kind: EventKind::Set,
            name: name.into(),
            value,
            previous: Some(previous),
            timestamp: Utc::now(),
        }
    }

    /// 派生副本：替换 value，其余字段不变
    pub fn with_value(&self, value: Value) -> Self {
        Self {
            value,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_value_keeps_identity() {
        let ev = Event::set("counter", json!(2), json!(1));
        let derived = ev.with_value(json!(5));
        assert_eq!(derived.value, json!(5));
        assert_eq!(derived.previous, Some(json!(1)));
        assert_eq!(derived.timestamp, ev.timestamp);
        assert_eq!(ev.value, json!(2));
    }
}
