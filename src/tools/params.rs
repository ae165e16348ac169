//! 工具参数声明与参数编译
//!
//! ParamSpec 描述一个参数：类型、是否必填、默认值与可选值（后三者与描述都可以是状态引用）。
//! 每轮推理前用 Agent 引用树解析引用，得到的参数表同时用于生成 JSON Schema 和编译模型给出的参数：
//! 类型检查、缺省值填充、必填校验、可选值校验，嵌套对象递归处理，未声明的键被丢弃。

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::agent::{MaybeRef, StateRef};
use crate::core::{ArgumentError, ToolError};
use crate::state::field::describe_value;
use crate::state::FieldType;

#[derive(Clone, Debug, PartialEq)]
pub enum ParamKind {
    Any,
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<ParamKind>),
    Object(Vec<ParamSpec>),
}

impl ParamKind {
    fn label(&self) -> &'static str {
        match self {
            ParamKind::Any => "any value",
            ParamKind::String => "a string",
            ParamKind::Integer => "an integer",
            ParamKind::Number => "a number",
            ParamKind::Boolean => "a boolean",
            ParamKind::Array(_) => "an array",
            ParamKind::Object(_) => "an object",
        }
    }

    fn schema(&self) -> Value {
        match self {
            ParamKind::Any => json!({}),
            ParamKind::String => json!({"type": "string"}),
            ParamKind::Integer => json!({"type": "integer"}),
            ParamKind::Number => json!({"type": "number"}),
            ParamKind::Boolean => json!({"type": "boolean"}),
            ParamKind::Array(items) => json!({"type": "array", "items": items.schema()}),
            ParamKind::Object(fields) => object_schema(fields),
        }
    }
}

impl From<FieldType> for ParamKind {
    fn from(kind: FieldType) -> Self {
        match kind {
            FieldType::String => ParamKind::String,
            FieldType::Integer => ParamKind::Integer,
            FieldType::Number => ParamKind::Number,
            FieldType::Boolean => ParamKind::Boolean,
            FieldType::Array => ParamKind::Array(Box::new(ParamKind::Any)),
            // 开放对象不限定键，交给状态层做类型检查
            FieldType::Object | FieldType::Any => ParamKind::Any,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: Option<MaybeRef<String>>,
    pub required: bool,
    pub default: Option<MaybeRef<Value>>,
    pub values: Option<MaybeRef<Vec<Value>>>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            required: false,
            default: None,
            values: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Boolean)
    }

    pub fn array(name: impl Into<String>, items: ParamKind) -> Self {
        Self::new(name, ParamKind::Array(Box::new(items)))
    }

    pub fn object(name: impl Into<String>, fields: Vec<ParamSpec>) -> Self {
        Self::new(name, ParamKind::Object(fields))
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(MaybeRef::Value(text.into()));
        self
    }

    pub fn describe_ref(mut self, r: StateRef) -> Self {
        self.description = Some(MaybeRef::Ref(r));
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(MaybeRef::Value(value));
        self
    }

    pub fn default_ref(mut self, r: StateRef) -> Self {
        self.default = Some(MaybeRef::Ref(r));
        self
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.values = Some(MaybeRef::Value(values));
        self
    }

    pub fn one_of_ref(mut self, r: StateRef) -> Self {
        self.values = Some(MaybeRef::Ref(r));
        self
    }

    /// 本参数（含嵌套字段）用到的所有状态引用
    pub fn state_refs(&self) -> Vec<&StateRef> {
        let mut refs: Vec<&StateRef> = [
            self.description.as_ref().and_then(MaybeRef::as_state_ref),
            self.default.as_ref().and_then(MaybeRef::as_state_ref),
            self.values.as_ref().and_then(MaybeRef::as_state_ref),
        ]
        .into_iter()
        .flatten()
        .collect();
        if let ParamKind::Object(fields) = &self.kind {
            refs.extend(fields.iter().flat_map(ParamSpec::state_refs));
        }
        refs
    }

    /// 解析所有引用，返回只含字面值的副本；取不到值的引用按未设置处理
    pub fn resolve(&self, reference: &Value) -> ParamSpec {
        let kind = match &self.kind {
            ParamKind::Object(fields) => ParamKind::Object(fields.iter().map(|f| f.resolve(reference)).collect()),
            other => other.clone(),
        };
        ParamSpec {
            name: self.name.clone(),
            kind,
            description: self
                .description
                .as_ref()
                .and_then(|d| d.resolve_text(reference))
                .map(MaybeRef::Value),
            required: self.required,
            default: self.default.as_ref().and_then(|d| d.resolve(reference)).map(MaybeRef::Value),
            values: self.values.as_ref().and_then(|v| v.resolve(reference)).map(MaybeRef::Value),
        }
    }

    /// 单个参数的 JSON Schema（未解析的引用被忽略）
    pub fn to_schema(&self) -> Value {
        let mut schema = self.kind.schema();
        if let Value::Object(map) = &mut schema {
            if let Some(text) = self.description.as_ref().and_then(MaybeRef::as_value) {
                map.insert("description".into(), Value::String(text.clone()));
            }
            if let Some(default) = self.default.as_ref().and_then(MaybeRef::as_value) {
                map.insert("default".into(), default.clone());
            }
            if let Some(values) = self.values.as_ref().and_then(MaybeRef::as_value) {
                map.insert("enum".into(), Value::Array(values.clone()));
            }
        }
        schema
    }
}

/// 参数表对应的 object schema
pub fn object_schema(params: &[ParamSpec]) -> Value {
    let properties: Map<String, Value> = params
        .iter()
        .map(|p| (p.name.clone(), p.to_schema()))
        .collect();
    let required: Vec<&str> = params
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name.as_str())
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// 编译模型给出的原始参数文本（空串视为 `{}`）
pub fn compile_args(params: &[ParamSpec], raw: &str) -> Result<ToolArgs, ArgumentError> {
    let parsed: Value = if raw.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(raw).map_err(|e| ArgumentError::Malformed(e.to_string()))?
    };
    match parsed {
        Value::Object(map) => compile_object(params, &map).map(ToolArgs),
        other => Err(ArgumentError::Malformed(format!(
            "expected an object, got {}",
            describe_value(&other)
        ))),
    }
}

fn compile_object(params: &[ParamSpec], supplied: &Map<String, Value>) -> Result<Map<String, Value>, ArgumentError> {
    let mut out = Map::new();
    for param in params {
        let value = match supplied.get(&param.name).filter(|v| !v.is_null()) {
            Some(v) => compile_value(&param.name, &param.kind, v)?,
            None => match param.default.as_ref().and_then(MaybeRef::as_value) {
                Some(default) => default.clone(),
                None if param.required => return Err(ArgumentError::Missing(param.name.clone())),
                None => Value::Null,
            },
        };
        if let Some(allowed) = param.values.as_ref().and_then(MaybeRef::as_value) {
            if !value.is_null() && !allowed.contains(&value) {
                return Err(ArgumentError::NotAllowed {
                    param: param.name.clone(),
                    allowed: Value::Array(allowed.clone()).to_string(),
                });
            }
        }
        out.insert(param.name.clone(), value);
    }
    Ok(out)
}

fn compile_value(name: &str, kind: &ParamKind, value: &Value) -> Result<Value, ArgumentError> {
    let mismatch = || ArgumentError::TypeMismatch {
        param: name.to_string(),
        expected: kind.label().to_string(),
    };
    match kind {
        ParamKind::Any => Ok(value.clone()),
        ParamKind::String if value.is_string() => Ok(value.clone()),
        ParamKind::Integer if value.is_i64() || value.is_u64() => Ok(value.clone()),
        // 模型常把整数写成 2.0
        ParamKind::Integer => match value.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(json!(f as i64)),
            _ => Err(mismatch()),
        },
        ParamKind::Number if value.is_number() => Ok(value.clone()),
        ParamKind::Boolean if value.is_boolean() => Ok(value.clone()),
        ParamKind::Array(items) => match value {
            Value::Array(list) => list
                .iter()
                .enumerate()
                .map(|(i, item)| compile_value(&format!("{name}[{i}]"), items, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Err(mismatch()),
        },
        ParamKind::Object(fields) => match value {
            Value::Object(map) => compile_object(fields, map).map(Value::Object),
            _ => Err(mismatch()),
        },
        _ => Err(mismatch()),
    }
}

/// 编译后的参数
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// 按名取参数并反序列化；缺失视为 null
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, ToolError> {
        let value = self.0.get(name).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| ToolError::InvalidArguments(format!("{name}: {e}")))
    }

    /// 整体反序列化为参数结构体
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ToolError> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// 从 schemars 生成的 schema 推导参数表（参数结构体 `#[derive(Deserialize, JsonSchema)]`）
pub fn params_from_schema<T: JsonSchema>() -> Vec<ParamSpec> {
    let root = schemars::schema_for!(T);
    let schema = serde_json::to_value(&root).unwrap_or_default();
    let definitions = schema.get("definitions").cloned().unwrap_or_default();
    params_from_object(&schema, &definitions, 0)
}

const MAX_SCHEMA_DEPTH: usize = 8;

fn deref<'a>(schema: &'a Value, definitions: &'a Value) -> &'a Value {
    if let Some(target) = schema.get("$ref").and_then(Value::as_str) {
        let name = target.trim_start_matches("#/definitions/");
        return definitions.get(name).unwrap_or(schema);
    }
    for combinator in ["allOf", "anyOf", "oneOf"] {
        if let Some(variants) = schema.get(combinator).and_then(Value::as_array) {
            let non_null = variants
                .iter()
                .find(|v| v.get("type").and_then(Value::as_str) != Some("null"));
            if let Some(v) = non_null {
                return deref(v, definitions);
            }
        }
    }
    schema
}

fn params_from_object(schema: &Value, definitions: &Value, depth: usize) -> Vec<ParamSpec> {
    let schema = deref(schema, definitions);
    let required: HashSet<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, prop)| {
            let resolved = deref(prop, definitions);
            let description = prop
                .get("description")
                .or_else(|| resolved.get("description"))
                .and_then(Value::as_str)
                .map(|d| MaybeRef::Value(d.to_string()));
            ParamSpec {
                name: name.clone(),
                kind: kind_from_schema(resolved, definitions, depth + 1),
                description,
                required: required.contains(name.as_str()),
                default: prop.get("default").cloned().map(MaybeRef::Value),
                values: resolved
                    .get("enum")
                    .and_then(Value::as_array)
                    .cloned()
                    .map(MaybeRef::Value),
            }
        })
        .collect()
}

fn kind_from_schema(schema: &Value, definitions: &Value, depth: usize) -> ParamKind {
    if depth > MAX_SCHEMA_DEPTH {
        return ParamKind::Any;
    }
    let schema = deref(schema, definitions);
    let ty = match schema.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).find(|t| *t != "null"),
        _ => None,
    };
    match ty {
        Some("string") => ParamKind::String,
        Some("integer") => ParamKind::Integer,
        Some("number") => ParamKind::Number,
        Some("boolean") => ParamKind::Boolean,
        Some("array") => ParamKind::Array(Box::new(
            schema
                .get("items")
                .map(|items| kind_from_schema(items, definitions, depth + 1))
                .unwrap_or(ParamKind::Any),
        )),
        Some("object") if schema.get("properties").is_some() => {
            ParamKind::Object(params_from_object(schema, definitions, depth))
        }
        _ => ParamKind::Any,
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    fn greet_params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::string("name").required(),
            ParamSpec::integer("times").default(json!(1)),
            ParamSpec::string("tone").one_of(vec![json!("warm"), json!("dry")]),
        ]
    }

    #[test]
    fn test_defaults_are_filled() {
        let args = compile_args(&greet_params(), r#"{"name": "Ada"}"#).unwrap();
        assert_eq!(args.value("times"), Some(&json!(1)));
        assert_eq!(args.value("tone"), Some(&Value::Null));
        assert_eq!(args.get::<String>("name").unwrap(), "Ada");
    }

    #[test]
    fn test_empty_arguments_mean_empty_object() {
        let err = compile_args(&greet_params(), "").unwrap_err();
        assert_eq!(err, ArgumentError::Missing("name".into()));
        assert!(compile_args(&[], "  ").unwrap().as_map().is_empty());
    }

    #[test]
    fn test_type_and_enum_violations() {
        let err = compile_args(&greet_params(), r#"{"name": 3}"#).unwrap_err();
        assert!(matches!(err, ArgumentError::TypeMismatch { ref param, .. } if param == "name"));

        let err = compile_args(&greet_params(), r#"{"name": "x", "tone": "loud"}"#).unwrap_err();
        assert!(matches!(err, ArgumentError::NotAllowed { .. }));

        assert!(matches!(
            compile_args(&greet_params(), "[1, 2]"),
            Err(ArgumentError::Malformed(_))
        ));
        assert!(matches!(
            compile_args(&greet_params(), "{not json"),
            Err(ArgumentError::Malformed(_))
        ));
    }

    #[test]
    fn test_integral_floats_and_nested_objects() {
        let params = vec![
            ParamSpec::integer("n").required(),
            ParamSpec::object("opts", vec![ParamSpec::boolean("loud").default(json!(false))]),
            ParamSpec::array("ids", ParamKind::Integer),
        ];
        let args = compile_args(&params, r#"{"n": 2.0, "opts": {"extra": 1}, "ids": [1, 2], "junk": true}"#).unwrap();
        assert_eq!(args.value("n"), Some(&json!(2)));
        assert_eq!(args.value("opts"), Some(&json!({"loud": false})));
        assert!(args.value("junk").is_none());

        let err = compile_args(&params, r#"{"n": 1, "ids": [1, "x"]}"#).unwrap_err();
        assert!(matches!(err, ArgumentError::TypeMismatch { ref param, .. } if param == "ids[1]"));
    }

    #[test]
    fn test_resolve_refs_and_schema() {
        let params = vec![ParamSpec::integer("amount")
            .describe_ref(StateRef::field("hint"))
            .default_ref(StateRef::field("step"))];
        let reference = json!({"self": {"hint": "how much", "step": 5}});
        let resolved: Vec<ParamSpec> = params.iter().map(|p| p.resolve(&reference)).collect();

        let schema = object_schema(&resolved);
        assert_eq!(schema["properties"]["amount"]["description"], json!("how much"));
        assert_eq!(schema["properties"]["amount"]["default"], json!(5));
        assert_eq!(schema["required"], json!([]));
        assert_eq!(compile_args(&resolved, "{}").unwrap().value("amount"), Some(&json!(5)));

        assert_eq!(params[0].state_refs().len(), 2);
        let unset = params[0].resolve(&json!({"self": {"hint": null}}));
        assert!(unset.description.is_none());
        assert!(unset.default.is_none());
        assert_eq!(object_schema(&[unset])["properties"]["amount"], json!({"type": "integer"}));
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct SearchArgs {
        /// Query text
        query: String,
        limit: Option<u32>,
        filters: Vec<String>,
    }

    #[test]
    fn test_params_from_schema() {
        let params = params_from_schema::<SearchArgs>();
        let query = params.iter().find(|p| p.name == "query").unwrap();
        assert!(query.required);
        assert_eq!(query.kind, ParamKind::String);
        assert_eq!(query.description, Some(MaybeRef::Value("Query text".into())));

        let limit = params.iter().find(|p| p.name == "limit").unwrap();
        assert!(!limit.required);
        assert_eq!(limit.kind, ParamKind::Integer);

        let filters = params.iter().find(|p| p.name == "filters").unwrap();
        assert_eq!(filters.kind, ParamKind::Array(Box::new(ParamKind::String)));

        let args = compile_args(&params, r#"{"query": "bees", "filters": []}"#).unwrap();
        let parsed: SearchArgs = args.parse().unwrap();
        assert_eq!(parsed.query, "bees");
    }
}
