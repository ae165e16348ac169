//! 状态引用
//!
//! 工具参数的描述 / 默认值 / 可选值可以引用 Agent 引用树中的值（如 `self.counter`、
//! `researcher.self.topic`），每轮推理前重新解析，使暴露给模型的描述跟随状态变化。
//! 引用树结构：`{"self": <状态快照>, "<关联名>": <关联 Agent 的引用树>}`。

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::AgentError;
use crate::memory::template::{lookup, value_to_text};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StateRef {
    path: String,
}

impl StateRef {
    /// 点分路径；`ref.` 前缀可省略
    pub fn new(path: impl Into<String>) -> Self {
        let path: String = path.into();
        let path = path.strip_prefix("ref.").map(str::to_string).unwrap_or(path);
        Self { path }
    }

    /// 本 Agent 的字段：`self.<field>`
    pub fn field(name: &str) -> Self {
        Self::new(format!("self.{name}"))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// 第一段（`self` 或关联名）
    pub fn root(&self) -> &str {
        self.path.split('.').next().unwrap_or_default()
    }

    /// 第二段，`self.<field>` 时即字段名
    pub fn field_name(&self) -> Option<&str> {
        self.path.split('.').nth(1)
    }

    pub fn resolve(&self, reference: &Value) -> Result<Value, AgentError> {
        lookup(reference, &self.path)
            .cloned()
            .ok_or_else(|| AgentError::InvalidStateRef(self.path.clone()))
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref.{}", self.path)
    }
}

/// 字面值或状态引用
#[derive(Clone, Debug, PartialEq)]
pub enum MaybeRef<T> {
    Value(T),
    Ref(StateRef),
}

impl<T: Clone + DeserializeOwned> MaybeRef<T> {
    /// 每轮解析：引用缺失、为 null 或类型不符时视为未设置
    pub fn resolve(&self, reference: &Value) -> Option<T> {
        match self {
            MaybeRef::Value(v) => Some(v.clone()),
            MaybeRef::Ref(r) => match lookup(reference, &r.path) {
                None | Some(Value::Null) => {
                    tracing::debug!(state_ref = %r, "state ref is empty this round, treating as unset");
                    None
                }
                Some(value) => serde_json::from_value(value.clone())
                    .map_err(|e| tracing::warn!(state_ref = %r, error = %e, "state ref holds an unexpected type, treating as unset"))
                    .ok(),
            },
        }
    }
}

impl<T> MaybeRef<T> {
    /// 字面值；引用返回 None
    pub fn as_value(&self) -> Option<&T> {
        match self {
            MaybeRef::Value(v) => Some(v),
            MaybeRef::Ref(_) => None,
        }
    }

    pub fn as_state_ref(&self) -> Option<&StateRef> {
        match self {
            MaybeRef::Value(_) => None,
            MaybeRef::Ref(r) => Some(r),
        }
    }
}

impl MaybeRef<String> {
    /// 描述文本：引用到非字符串时使用其 JSON 文本，缺失或为 null 时返回 None
    pub fn resolve_text(&self, reference: &Value) -> Option<String> {
        match self {
            MaybeRef::Value(v) => Some(v.clone()),
            MaybeRef::Ref(r) => match lookup(reference, &r.path) {
                None | Some(Value::Null) => None,
                Some(value) => Some(value_to_text(value)),
            },
        }
    }
}
