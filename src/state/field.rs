//! 状态字段声明与状态结构

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::Policy;

/// 字段声明类型；Null 对所有类型都合法（可选语义）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Any,
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            FieldType::Any => true,
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }

    /// JSON Schema 中的 type
    pub fn schema_type(&self) -> Option<&'static str> {
        match self {
            FieldType::Any => None,
            FieldType::String => Some("string"),
            FieldType::Integer => Some("integer"),
            FieldType::Number => Some("number"),
            FieldType::Boolean => Some("boolean"),
            FieldType::Array => Some("array"),
            FieldType::Object => Some("object"),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.schema_type().unwrap_or("any"))
    }
}

/// 描述值的 JSON 类型（用于错误信息）
pub fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 模型可见的访问权限，决定生成哪些访问器工具
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
    ReadWrite,
    #[default]
    Hidden,
}

impl Access {
    pub fn readable(&self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn writable(&self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

pub type DefaultFactory = Arc<dyn Fn() -> Value + Send + Sync>;

#[derive(Clone)]
enum FieldDefault {
    Value(Value),
    Factory(DefaultFactory),
}

/// 单个字段声明：类型、默认值、策略链、访问权限
#[derive(Clone)]
pub struct StateField {
    pub name: String,
    pub kind: FieldType,
    pub description: Option<String>,
    pub access: Access,
    pub policies: Vec<Arc<dyn Policy>>,
    default: FieldDefault,
}

impl StateField {
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            access: Access::default(),
            policies: Vec::new(),
            default: FieldDefault::Value(Value::Null),
        }
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = FieldDefault::Value(value);
        self
    }

    /// 每个实例调用一次工厂生成初始值（可变默认值不共享）
    pub fn default_with(mut self, factory: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default = FieldDefault::Factory(Arc::new(factory));
        self
    }

    pub fn policy(mut self, policy: impl Policy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn shared_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn initial_value(&self) -> Value {
        match &self.default {
            FieldDefault::Value(v) => v.clone(),
            FieldDefault::Factory(f) => f(),
        }
    }
}

impl fmt::Debug for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateField")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("access", &self.access)
            .field("policies", &self.policies.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// 有序字段集合；同名字段后声明者覆盖先声明者（位置保持不变）
#[derive(Clone, Debug, Default)]
pub struct StateSchema {
    fields: Vec<StateField>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: StateField) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    pub fn with(mut self, field: StateField) -> Self {
        self.insert(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&StateField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[StateField] {
        &self.fields
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_acceptance() {
        assert!(FieldType::Integer.accepts(&json!(3)));
        assert!(!FieldType::Integer.accepts(&json!(3.5)));
        assert!(FieldType::Number.accepts(&json!(3)));
        assert!(FieldType::String.accepts(&Value::Null));
        assert!(!FieldType::Object.accepts(&json!([1])));
    }

    #[test]
    fn test_factory_default_is_fresh_per_call() {
        let field = StateField::new("items", FieldType::Array).default_with(|| json!([]));
        assert_eq!(field.initial_value(), json!([]));
        assert_eq!(field.initial_value(), json!([]));
    }

    #[test]
    fn test_schema_override_keeps_position() {
        let mut schema = StateSchema::new()
            .with(StateField::new("a", FieldType::Integer))
            .with(StateField::new("b", FieldType::String));
        schema.insert(StateField::new("a", FieldType::Number).default(json!(1.5)));
        let names: Vec<_> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(schema.field("a").unwrap().kind, FieldType::Number);
    }

    #[test]
    fn test_access_flags() {
        assert!(Access::ReadWrite.readable() && Access::ReadWrite.writable());
        assert!(!Access::Hidden.readable() && !Access::Hidden.writable());
        assert_eq!(Access::default(), Access::Hidden);
    }
}
