//! 关联 Agent
//!
//! 定义中声明关联槽位（名称、描述、可用条件），构造实例时绑定具体的 Agent。
//! 对模型而言关联 Agent 就是一个只有 `user_input` 参数的工具。

use std::sync::Arc;

use crate::agent::Agent;
use crate::state::StateStore;
use crate::tools::{Condition, ParamSpec};

#[derive(Clone)]
pub struct LinkSpec {
    pub name: String,
    pub description: Option<String>,
    condition: Option<Condition>,
}

impl LinkSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            condition: None,
        }
    }

    /// 覆盖关联 Agent 自身的描述
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// 按父 Agent 状态决定本轮是否暴露
    pub fn when(mut self, condition: impl Fn(&StateStore) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn is_available(&self, state: &StateStore) -> bool {
        self.condition.as_ref().map_or(true, |c| c(state))
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![ParamSpec::string("user_input")
            .describe("The message to send to this agent")
            .required()]
    }
}

impl std::fmt::Debug for LinkSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

/// 已绑定实例的关联
#[derive(Clone)]
pub struct BoundLink {
    pub spec: LinkSpec,
    pub agent: Arc<Agent>,
}

impl BoundLink {
    pub fn description(&self) -> String {
        self.spec
            .description
            .clone()
            .unwrap_or_else(|| self.agent.definition().description().to_string())
    }
}
