//! 状态访问器工具
//!
//! 按字段访问权限生成 `get_<field>` / `set_<field>` 工具；读写都经过字段的策略管线。

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ToolError;
use crate::memory::template::value_to_text;
use crate::state::{StateField, StateStore};
use crate::tools::params::{ParamKind, ParamSpec, ToolArgs};
use crate::tools::Tool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessorMode {
    Get,
    Set,
}

#[derive(Clone, Debug)]
pub struct StateAccessorTool {
    name: String,
    field: String,
    mode: AccessorMode,
    description: String,
    kind: ParamKind,
    value_description: Option<String>,
}

impl StateAccessorTool {
    /// 字段对应的访问器（Hidden 字段返回空）
    pub fn for_field(field: &StateField) -> Vec<StateAccessorTool> {
        let mut tools = Vec::new();
        if field.access.readable() {
            tools.push(Self::new(field, AccessorMode::Get));
        }
        if field.access.writable() {
            tools.push(Self::new(field, AccessorMode::Set));
        }
        tools
    }

    fn new(field: &StateField, mode: AccessorMode) -> Self {
        let (prefix, verb) = match mode {
            AccessorMode::Get => ("get", "Read"),
            AccessorMode::Set => ("set", "Update"),
        };
        let mut description = format!("{verb} the `{}` state field ({}).", field.name, field.kind);
        if let Some(text) = &field.description {
            description.push(' ');
            description.push_str(text);
        }
        Self {
            name: format!("{prefix}_{}", field.name),
            field: field.name.clone(),
            mode,
            description,
            kind: ParamKind::from(field.kind),
            value_description: field.description.clone(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn mode(&self) -> AccessorMode {
        self.mode
    }
}

#[async_trait]
impl Tool for StateAccessorTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        match self.mode {
            AccessorMode::Get => Vec::new(),
            AccessorMode::Set => {
                let mut value = ParamSpec::new("value", self.kind.clone()).required();
                if let Some(text) = &self.value_description {
                    value = value.describe(text.clone());
                }
                vec![value]
            }
        }
    }

    async fn execute(&self, state: &StateStore, args: ToolArgs) -> Result<String, ToolError> {
        match self.mode {
            AccessorMode::Get => {
                let value = state.get(&self.field)?;
                Ok(value_to_text(&value))
            }
            AccessorMode::Set => {
                let value = args.value("value").cloned().unwrap_or(Value::Null);
                state.set(&self.field, value)?;
                Ok(format!("Updated `{}`", self.field))
            }
        }
    }
}
