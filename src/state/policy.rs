//! 策略 trait 与同步策略链
//!
//! 每个钩子接收 (事件, 当前值)，返回 `Some(新值)` 替换当前值，`None` 保持不变；
//! 返回 Err 时记录告警并跳过该策略，链继续执行。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::PolicyError;
use crate::state::{Event, EventKind};

pub type PolicyResult = Result<Option<Value>, PolicyError>;

/// 字段策略：同步钩子在读写路径内执行，后台钩子在字段的后台通道里执行
#[async_trait]
pub trait Policy: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_get(&self, _event: &Event, _value: &Value) -> PolicyResult {
        Ok(None)
    }

    fn on_set(&self, _event: &Event, _value: &Value) -> PolicyResult {
        Ok(None)
    }

    async fn background_get(&self, _event: &Event, _value: &Value) -> PolicyResult {
        Ok(None)
    }

    async fn background_set(&self, _event: &Event, _value: &Value) -> PolicyResult {
        Ok(None)
    }
}

/// 依声明顺序执行同步钩子，返回最终值
pub fn run_sync_chain(policies: &[Arc<dyn Policy>], event: &Event) -> Value {
    let mut value = event.value.clone();
    for policy in policies {
        let result = match event.kind {
            EventKind::Get => policy.on_get(event, &value),
            EventKind::Set => policy.on_set(event, &value),
        };
        match result {
            Ok(Some(next)) => value = next,
            Ok(None) => {}
            Err(e) => tracing::warn!(
                policy = policy.name(),
                field = %event.name,
                hook = ?event.kind,
                error = %e,
                "sync policy failed, skipped"
            ),
        }
    }
    value
}

/// 依声明顺序执行后台钩子；仅当至少一个策略产出了值时返回 Some(最后的值)
pub async fn run_background_chain(policies: &[Arc<dyn Policy>], event: &Event) -> Option<Value> {
    let mut value = event.value.clone();
    let mut produced = false;
    for policy in policies {
        let result = match event.kind {
            EventKind::Get => policy.background_get(event, &value).await,
            EventKind::Set => policy.background_set(event, &value).await,
        };
        match result {
            Ok(Some(next)) => {
                value = next;
                produced = true;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(
                policy = policy.name(),
                field = %event.name,
                hook = ?event.kind,
                error = %e,
                "background policy failed, skipped"
            ),
        }
    }
    produced.then_some(value)
}
