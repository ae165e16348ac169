//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters / execute），由 ToolRegistry 按名注册与查找。
//! 注册顺序即暴露给模型的顺序；同名工具后注册者覆盖先注册者并保留原位置。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ToolError;
use crate::llm::ToolDescriptor;
use crate::state::StateStore;
use crate::tools::params::{object_schema, ParamSpec, ToolArgs};

/// 工具 trait：名称、描述（供 LLM 理解）、参数声明、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型调用时使用）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数声明；默认无参数
    fn parameters(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// 本轮是否暴露给模型（每轮推理前按当前状态判断）
    fn is_available(&self, _state: &StateStore) -> bool {
        true
    }

    /// 执行工具；参数已按 parameters 编译
    async fn execute(&self, state: &StateStore, args: ToolArgs) -> Result<String, ToolError>;
}

/// 用引用树解析参数并生成描述
pub fn describe(
    name: &str,
    description: &str,
    params: &[ParamSpec],
    reference: &Value,
) -> (ToolDescriptor, Vec<ParamSpec>) {
    let resolved: Vec<ParamSpec> = params.iter().map(|p| p.resolve(reference)).collect();
    let descriptor = ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        parameters: object_schema(&resolved),
    };
    (descriptor, resolved)
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，保持注册顺序
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 合并另一个注册表，同名时 other 覆盖
    pub fn merge(&mut self, other: &ToolRegistry) {
        for tool in other.iter() {
            self.register_arc(tool.clone());
        }
    }

    /// 返回 (name, description) 列表
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|tool| (tool.name().to_string(), tool.description().to_string()))
            .collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.order.iter()).finish()
    }
}
