//! Agent 定义
//!
//! AgentDefinition 是不可变配置：名称、描述、instructions 模板、输入模板、结构化输出格式、
//! 状态字段、工具与关联槽位。可复用的字段 / 工具 / 关联放在 AgentExtension 中，
//! 按顺序合并：后合并的同名声明覆盖先前的声明。instructions 与输入模板不参与继承。

use schemars::JsonSchema;
use serde_json::Value;

use crate::agent::LinkSpec;
use crate::core::AgentError;
use crate::state::{StateField, StateSchema};
use crate::tools::{StateAccessorTool, Tool, ToolRegistry};

/// 可复用的定义片段
#[derive(Clone, Debug, Default)]
pub struct AgentExtension {
    pub state: StateSchema,
    pub tools: ToolRegistry,
    pub links: Vec<LinkSpec>,
}

impl AgentExtension {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: StateField) -> Self {
        self.state.insert(field);
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn link(mut self, link: LinkSpec) -> Self {
        upsert_link(&mut self.links, link);
        self
    }

    /// 合并 other，同名声明以 other 为准
    pub fn merge(&mut self, other: &AgentExtension) {
        for field in other.state.fields() {
            self.state.insert(field.clone());
        }
        self.tools.merge(&other.tools);
        for link in &other.links {
            upsert_link(&mut self.links, link.clone());
        }
    }

    /// 按给定顺序合并多个片段
    pub fn merged<'a>(layers: impl IntoIterator<Item = &'a AgentExtension>) -> AgentExtension {
        layers.into_iter().fold(AgentExtension::new(), |mut acc, layer| {
            acc.merge(layer);
            acc
        })
    }
}

fn upsert_link(links: &mut Vec<LinkSpec>, link: LinkSpec) {
    match links.iter_mut().find(|l| l.name == link.name) {
        Some(existing) => *existing = link,
        None => links.push(link),
    }
}

#[derive(Clone, Debug)]
pub struct AgentDefinition {
    name: String,
    description: String,
    instructions: String,
    input_template: Option<String>,
    response_format: Option<Value>,
    parts: AgentExtension,
}

impl AgentDefinition {
    pub fn builder(name: impl Into<String>) -> AgentDefinitionBuilder {
        AgentDefinitionBuilder {
            name: name.into(),
            description: String::new(),
            instructions: None,
            input_template: None,
            response_format: None,
            parts: AgentExtension::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn input_template(&self) -> Option<&str> {
        self.input_template.as_deref()
    }

    pub fn response_format(&self) -> Option<&Value> {
        self.response_format.as_ref()
    }

    pub fn state_schema(&self) -> &StateSchema {
        &self.parts.state
    }

    /// 声明的工具与生成的访问器工具
    pub fn tools(&self) -> &ToolRegistry {
        &self.parts.tools
    }

    pub fn links(&self) -> &[LinkSpec] {
        &self.parts.links
    }

    /// 含自动生成的访问器工具
    pub fn declares_tools(&self) -> bool {
        !self.parts.tools.is_empty()
    }

    pub fn declares_links(&self) -> bool {
        !self.parts.links.is_empty()
    }

    /// 可被子定义继承的部分
    pub fn extension(&self) -> AgentExtension {
        self.parts.clone()
    }
}

pub struct AgentDefinitionBuilder {
    name: String,
    description: String,
    instructions: Option<String>,
    input_template: Option<String>,
    response_format: Option<Value>,
    parts: AgentExtension,
}

impl AgentDefinitionBuilder {
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// system 消息模板，`{{ field }}` 引用状态
    pub fn instructions(mut self, template: impl Into<String>) -> Self {
        self.instructions = Some(template.into());
        self
    }

    /// 用户输入模板，`{{ user_message }}` 为原始输入
    pub fn input_template(mut self, template: impl Into<String>) -> Self {
        self.input_template = Some(template.into());
        self
    }

    pub fn response_format(mut self, schema: Value) -> Self {
        self.response_format = Some(schema);
        self
    }

    /// 用类型的 JSON Schema 作为结构化输出格式
    pub fn response_type<T: JsonSchema>(self) -> Self {
        let schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default();
        self.response_format(schema)
    }

    pub fn field(mut self, field: StateField) -> Self {
        self.parts.state.insert(field);
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.parts.tools.register(tool);
        self
    }

    pub fn link(mut self, link: LinkSpec) -> Self {
        upsert_link(&mut self.parts.links, link);
        self
    }

    /// 合并片段；之后的声明覆盖片段中的同名声明
    pub fn extend(mut self, extension: &AgentExtension) -> Self {
        self.parts.merge(extension);
        self
    }

    /// 继承另一个定义的字段、工具与关联（不继承 instructions）
    pub fn inherit(self, parent: &AgentDefinition) -> Self {
        let parent = parent.extension();
        self.extend(&parent)
    }

    pub fn build(mut self) -> Result<AgentDefinition, AgentError> {
        let instructions = match self.instructions.take() {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                return Err(AgentError::InvalidDefinition(format!(
                    "agent `{}` must declare instructions",
                    self.name
                )))
            }
        };

        for link in &self.parts.links {
            if link.name == "self" {
                return Err(AgentError::InvalidDefinition("`self` is reserved and cannot name a link".into()));
            }
            if self.parts.tools.contains(&link.name) {
                return Err(AgentError::InvalidDefinition(format!(
                    "`{}` is declared both as a tool and as a linked agent",
                    link.name
                )));
            }
        }

        for tool in self.parts.tools.iter() {
            for param in tool.parameters() {
                for r in param.state_refs() {
                    let unknown = r.root() == "self"
                        && !r.field_name().is_some_and(|f| self.parts.state.contains(f));
                    if unknown {
                        return Err(AgentError::InvalidDefinition(format!(
                            "tool `{}` references `{}` which is not a state field of `{}`",
                            tool.name(),
                            r,
                            self.name
                        )));
                    }
                }
            }
        }

        let accessors: Vec<StateAccessorTool> = self
            .parts
            .state
            .fields()
            .iter()
            .flat_map(StateAccessorTool::for_field)
            .collect();
        let mut tools = ToolRegistry::new();
        for accessor in accessors {
            tools.register(accessor);
        }
        // 用户声明的同名工具优先于生成的访问器
        tools.merge(&self.parts.tools);
        self.parts.tools = tools;

        Ok(AgentDefinition {
            name: self.name,
            description: self.description,
            instructions,
            input_template: self.input_template,
            response_format: self.response_format,
            parts: self.parts,
        })
    }
}
