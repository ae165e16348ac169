//! StateStore：Agent 实例的类型化状态与对话历史
//!
//! 读写流程：
//! - `get`：字段校验 → 同步 GET 链 → 后台 GET 链入队 → 返回同步结果（存储值不变）；
//! - `set`：字段校验 → 同步 SET 链 → 类型检查 → 在一致性锁内提交并将后台 SET 链入队。
//!
//! system 消息不入历史，每次 `messages()` 时用当前状态渲染 instructions 模板。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::memory::{render, Conversation, Message};
use crate::state::background::{BackgroundLanes, SharedValues};
use crate::state::field::describe_value;
use crate::state::policy::run_sync_chain;
use crate::state::{Event, StateField, StateSchema};

/// 提示模板：instructions 渲染为 system 消息，input 包装用户输入（占位符 `{{ user_message }}`）
#[derive(Clone, Debug, Default)]
pub struct PromptTemplates {
    pub instructions: String,
    pub input: Option<String>,
}

struct StateInner {
    schema: StateSchema,
    templates: PromptTemplates,
    values: SharedValues,
    history: Mutex<Conversation>,
    background: BackgroundLanes,
}

/// 状态句柄（clone 共享同一份状态）
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StateInner>,
}

impl StateStore {
    /// 按字段默认值初始化
    pub fn new(schema: StateSchema, templates: PromptTemplates) -> Self {
        let values: HashMap<String, Value> = schema
            .fields()
            .iter()
            .map(|f| (f.name.clone(), f.initial_value()))
            .collect();
        let values: SharedValues = Arc::new(Mutex::new(values));
        Self {
            inner: Arc::new(StateInner {
                schema,
                templates,
                background: BackgroundLanes::new(values.clone()),
                values,
                history: Mutex::new(Conversation::new()),
            }),
        }
    }

    /// 默认值之上覆盖初始值（不经过策略链）
    pub fn with_values(
        schema: StateSchema,
        templates: PromptTemplates,
        initial: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<Self, AgentError> {
        let store = Self::new(schema, templates);
        for (name, value) in initial {
            let field = store.field(&name)?;
            check_type(field, &value)?;
            store.inner.values.lock().insert(name, value);
        }
        Ok(store)
    }

    pub fn schema(&self) -> &StateSchema {
        &self.inner.schema
    }

    fn field(&self, name: &str) -> Result<&StateField, AgentError> {
        self.inner
            .schema
            .field(name)
            .ok_or_else(|| AgentError::FieldNotFound(name.to_string()))
    }

    fn stored(&self, name: &str) -> Value {
        self.inner.values.lock().get(name).cloned().unwrap_or(Value::Null)
    }

    /// 读取字段：返回同步 GET 链的结果，存储值保持不变
    pub fn get(&self, name: &str) -> Result<Value, AgentError> {
        let field = self.field(name)?;
        let event = Event::get(name, self.stored(name));
        let value = run_sync_chain(&field.policies, &event);
        self.inner.background.schedule(field, event);
        Ok(value)
    }

    /// 写入字段：同步 SET 链的最终值被存储；后台 SET 链收到原始事件
    pub fn set(&self, name: &str, value: Value) -> Result<(), AgentError> {
        let field = self.field(name)?;
        let event = Event::set(name, value, self.stored(name));
        let value = run_sync_chain(&field.policies, &event);
        check_type(field, &value)?;

        let mut values = self.inner.values.lock();
        values.insert(name.to_string(), value);
        self.inner.background.schedule(field, event);
        Ok(())
    }

    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, AgentError> {
        let value = self.get(name)?;
        serde_json::from_value(value.clone()).map_err(|_| AgentError::StateTypeMismatch {
            field: name.to_string(),
            expected: std::any::type_name::<T>().to_string(),
            found: describe_value(&value).to_string(),
        })
    }

    pub fn set_as<T: Serialize>(&self, name: &str, value: T) -> Result<(), AgentError> {
        let value = serde_json::to_value(value).map_err(|e| AgentError::StateTypeMismatch {
            field: name.to_string(),
            expected: "a JSON value".to_string(),
            found: e.to_string(),
        })?;
        self.set(name, value)
    }

    /// 原始值快照（不经过策略），用于模板渲染与 Agent 引用
    pub fn snapshot(&self) -> Value {
        let values = self.inner.values.lock();
        let map: Map<String, Value> = self
            .inner
            .schema
            .fields()
            .iter()
            .map(|f| (f.name.clone(), values.get(&f.name).cloned().unwrap_or(Value::Null)))
            .collect();
        Value::Object(map)
    }

    /// 等待已排队的后台策略全部完成
    pub async fn drain(&self) {
        self.inner.background.drain().await;
    }

    pub fn pending_background(&self) -> usize {
        self.inner.background.pending()
    }

    pub fn shutdown(&self) {
        self.inner.background.shutdown();
    }

    /// 用当前状态渲染 system 消息
    pub fn system_message(&self) -> String {
        render(&self.inner.templates.instructions, &self.snapshot())
    }

    /// 追加用户输入；配置了 input 模板时先渲染
    pub fn add_user_message(&self, input: &str) {
        let content = match &self.inner.templates.input {
            Some(template) => {
                let mut data = self.snapshot();
                if let Value::Object(map) = &mut data {
                    map.insert("user_message".into(), Value::String(input.to_string()));
                }
                render(template, &data)
            }
            None => input.to_string(),
        };
        self.push_message(Message::user(content));
    }

    pub fn push_message(&self, message: Message) {
        self.inner.history.lock().push(message);
    }

    pub fn history(&self) -> Vec<Message> {
        self.inner.history.lock().messages().to_vec()
    }

    pub fn history_len(&self) -> usize {
        self.inner.history.lock().len()
    }

    /// Provider 请求用的完整消息列表：最新 system 消息 + 历史
    pub fn messages(&self) -> Vec<Message> {
        let system = Message::system(self.system_message());
        let history = self.inner.history.lock();
        std::iter::once(system)
            .chain(history.messages().iter().cloned())
            .collect()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("values", &self.snapshot())
            .field("history_len", &self.history_len())
            .finish()
    }
}

fn check_type(field: &StateField, value: &Value) -> Result<(), AgentError> {
    if field.kind.accepts(value) {
        Ok(())
    } else {
        Err(AgentError::StateTypeMismatch {
            field: field.name.clone(),
            expected: field.kind.to_string(),
            found: describe_value(value).to_string(),
        })
    }
}
