//! Mock Provider（用于测试，无需 API）
//!
//! 按脚本依次返回预设响应或错误；脚本耗尽后使用 fallback（默认回显最后一条 User 消息）。
//! 每次请求都会被记录，便于断言调用次数与是否携带工具。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::llm::{GenerateRequest, LlmError, LlmResponse, Provider, ProviderInfo};
use crate::memory::{Message, Role};

/// 脚本中的一步
#[derive(Clone, Debug)]
pub enum MockReply {
    Respond(LlmResponse),
    Fail(LlmError),
}

/// 被记录的一次请求
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub response_format: Option<Value>,
}

pub struct MockProvider {
    script: Mutex<VecDeque<MockReply>>,
    fallback: Option<LlmResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
    tool_calls: bool,
    structured_output: bool,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            tool_calls: true,
            structured_output: true,
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        }
    }

    pub fn with_reply(self, response: LlmResponse) -> Self {
        self.script.lock().push_back(MockReply::Respond(response));
        self
    }

    pub fn with_replies(self, responses: impl IntoIterator<Item = LlmResponse>) -> Self {
        self.script
            .lock()
            .extend(responses.into_iter().map(MockReply::Respond));
        self
    }

    pub fn with_failure(self, error: LlmError) -> Self {
        self.script.lock().push_back(MockReply::Fail(error));
        self
    }

    /// 脚本耗尽后重复返回该响应
    pub fn with_fallback(mut self, response: LlmResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn without_tool_calls(mut self) -> Self {
        self.tool_calls = false;
        self
    }

    pub fn without_structured_output(mut self) -> Self {
        self.structured_output = false;
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn echo(messages: &[Message]) -> LlmResponse {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        LlmResponse::text(format!("Echo from Mock: {last_user}"))
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "mock".into(),
            model: "mock-1".into(),
        }
    }

    fn supports_tool_calls(&self) -> bool {
        self.tool_calls
    }

    fn supports_structured_output(&self) -> bool {
        self.structured_output
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<LlmResponse, LlmError> {
        self.requests.lock().push(RecordedRequest {
            messages: request.messages.to_vec(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            response_format: request.response_format.cloned(),
        });

        let next = self.script.lock().pop_front();
        let response = match next {
            Some(MockReply::Respond(r)) => r,
            Some(MockReply::Fail(e)) => return Err(e),
            None => match &self.fallback {
                Some(r) => r.clone(),
                None => Self::echo(request.messages),
            },
        };

        if let Some(usage) = response.usage {
            self.prompt_tokens
                .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
            self.completion_tokens
                .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        }
        Ok(response)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        let p = self.prompt_tokens.load(Ordering::Relaxed);
        let c = self.completion_tokens.load(Ordering::Relaxed);
        (p, c, p + c)
    }
}
