//! 闭包工具：用同步或异步闭包定义工具
//!
//! ```ignore
//! let add = FnTool::new("add", "Add two numbers", |_state, args| {
//!     let a: i64 = args.get("a")?;
//!     let b: i64 = args.get("b")?;
//!     Ok((a + b).to_string())
//! })
//! .param(ParamSpec::integer("a").required())
//! .param(ParamSpec::integer("b").required());
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::core::ToolError;
use crate::state::StateStore;
use crate::tools::params::{ParamSpec, ToolArgs};
use crate::tools::Tool;

type SyncHandler = Arc<dyn Fn(&StateStore, ToolArgs) -> Result<String, ToolError> + Send + Sync>;
type AsyncHandler =
    Arc<dyn Fn(StateStore, ToolArgs) -> BoxFuture<'static, Result<String, ToolError>> + Send + Sync>;

/// 每轮判断工具是否可用
pub type Condition = Arc<dyn Fn(&StateStore) -> bool + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    params: Vec<ParamSpec>,
    handler: Handler,
    condition: Option<Condition>,
}

impl FnTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        f: impl Fn(&StateStore, ToolArgs) -> Result<String, ToolError> + Send + Sync + 'static,
    ) -> Self {
        Self::with_handler(name, description, Handler::Sync(Arc::new(f)))
    }

    /// 异步闭包；StateStore 以句柄传入，可跨 await 使用
    pub fn new_async<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(StateStore, ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        let handler: AsyncHandler = Arc::new(move |state, args| Box::pin(f(state, args)));
        Self::with_handler(name, description, Handler::Async(handler))
    }

    fn with_handler(name: impl Into<String>, description: impl Into<String>, handler: Handler) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            handler,
            condition: None,
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn params(mut self, params: impl IntoIterator<Item = ParamSpec>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn when(mut self, condition: impl Fn(&StateStore) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        self.params.clone()
    }

    fn is_available(&self, state: &StateStore) -> bool {
        self.condition.as_ref().map_or(true, |c| c(state))
    }

    async fn execute(&self, state: &StateStore, args: ToolArgs) -> Result<String, ToolError> {
        match &self.handler {
            Handler::Sync(f) => f(state, args),
            Handler::Async(f) => f(state.clone(), args).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::state::{FieldType, PromptTemplates, StateField, StateSchema};
    use crate::tools::params::compile_args;

    fn state() -> StateStore {
        StateStore::new(
            StateSchema::new().with(StateField::new("counter", FieldType::Integer).default(json!(0))),
            PromptTemplates::default(),
        )
    }

    #[tokio::test]
    async fn test_sync_tool_reads_args_and_state() {
        let tool = FnTool::new("add", "Add to counter", |state, args| {
            let by: i64 = args.get("by")?;
            let now = state.get_as::<i64>("counter")? + by;
            state.set("counter", json!(now))?;
            Ok(now.to_string())
        })
        .param(ParamSpec::integer("by").default(json!(1)));

        let s = state();
        let args = compile_args(&tool.parameters(), "{}").unwrap();
        assert_eq!(tool.execute(&s, args).await.unwrap(), "1");
        assert_eq!(s.snapshot()["counter"], json!(1));
    }

    #[tokio::test]
    async fn test_async_tool_and_condition() {
        let tool = FnTool::new_async("wait", "Wait a bit", |state, _args| async move {
            tokio::task::yield_now().await;
            Ok::<_, ToolError>(format!("counter={}", state.get("counter")?))
        })
        .when(|state| state.snapshot()["counter"] == json!(0));

        let s = state();
        assert!(tool.is_available(&s));
        assert_eq!(tool.execute(&s, ToolArgs::default()).await.unwrap(), "counter=0");
        s.set("counter", json!(3)).unwrap();
        assert!(!tool.is_available(&s));
    }
}
