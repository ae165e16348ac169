//! 执行循环集成测试

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use hive::agent::{Agent, AgentDefinition, StateRef};
    use hive::core::{PolicyError, ToolError};
    use hive::llm::{LlmError, LlmResponse, MockProvider, ToolCall};
    use hive::memory::Role;
    use hive::react::AgentEvent;
    use hive::state::{Access, Event, FieldType, Policy, PolicyResult, StateField};
    use hive::tools::{FnTool, ParamSpec};
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::{json, Value};

    fn increment() -> FnTool {
        FnTool::new("increment", "Add one to the counter", |state, _| {
            let count: i64 = state.get_as("count")?;
            state.set("count", json!(count + 1))?;
            Ok(format!("count is now {}", count + 1))
        })
    }

    fn counter(provider: Arc<MockProvider>, depth: usize) -> Agent {
        let def = AgentDefinition::builder("counter")
            .description("Keeps a count")
            .instructions("You keep a counter. Current value: {{ count }}")
            .field(StateField::new("count", FieldType::Integer).default(json!(0)))
            .tool(increment())
            .build()
            .unwrap();
        Agent::builder(def, provider).max_call_depth(depth).build().unwrap()
    }

    fn calls(pairs: &[(&str, &str, &str)]) -> LlmResponse {
        LlmResponse::tool_calls(
            pairs
                .iter()
                .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_counter_reaches_two() {
        let provider = Arc::new(MockProvider::new().with_replies([
            calls(&[("c1", "increment", "{}"), ("c2", "increment", "")]),
            LlmResponse::text("Counted twice."),
        ]));
        let agent = counter(provider.clone(), 1);

        let response = agent.run("count to two").await.unwrap();
        assert!(!response.is_degraded());
        assert_eq!(response.final_output, json!("Counted twice."));
        assert_eq!(response.state, json!({"count": 2}));
        assert_eq!(agent.state().get("count").unwrap(), json!(2));

        let tools = response.tool_responses.unwrap();
        assert_eq!(tools.len(), 2);
        assert!(tools.iter().all(|t| t.succeeded && t.call_depth == 0));
        assert_eq!(tools[1].output, "count is now 2");
        assert!(response.agent_responses.is_none());

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tool_names, ["increment"]);
        assert_eq!(requests[0].messages[0].content, "You keep a counter. Current value: 0");
        // system 消息按最新状态重新渲染
        assert_eq!(requests[1].messages[0].content, "You keep a counter. Current value: 2");
        assert!(requests[1].tool_names.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_call_is_reported_to_the_model() {
        let provider = Arc::new(MockProvider::new().with_replies([
            calls(&[("c1", "ghost", "{}")]),
            LlmResponse::text("Sorry."),
        ]));
        let agent = counter(provider, 1);

        let response = agent.run("call a ghost").await.unwrap();
        let tools = response.tool_responses.unwrap();
        assert_eq!(tools.len(), 1);
        assert!(!tools[0].succeeded);
        assert_eq!(tools[0].output, "Unknown call `ghost`: no tool or linked agent with that name.");

        let history = agent.state().history();
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(history[2].content, tools[0].output);
    }

    #[tokio::test]
    async fn test_depth_limit_forces_a_final_inference() {
        let provider = Arc::new(MockProvider::new().with_fallback(calls(&[("c1", "increment", "{}")])));
        let agent = counter(provider.clone(), 1);

        let response = agent.run("loop forever").await.unwrap();
        assert_eq!(provider.call_count(), 2);
        assert!(!response.final_output.is_null());
        assert_eq!(response.tool_responses.unwrap().len(), 1);
        assert!(provider.requests()[1].tool_names.is_empty());
    }

    #[tokio::test]
    async fn test_depth_two_runs_two_rounds() {
        let provider = Arc::new(MockProvider::new().with_replies([
            calls(&[("c1", "increment", "{}")]),
            calls(&[("c2", "increment", "{}")]),
            LlmResponse::text("Max depth reached!"),
        ]));
        let agent = counter(provider.clone(), 2);

        let response = agent.run("go").await.unwrap();
        assert_eq!(response.final_output, json!("Max depth reached!"));
        let depths: Vec<usize> = response.tool_responses.unwrap().iter().map(|t| t.call_depth).collect();
        assert_eq!(depths, [0, 1]);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_calls_run_once() {
        let provider = Arc::new(MockProvider::new().with_replies([
            calls(&[("c1", "increment", "{}"), ("c1", "increment", "{}")]),
            calls(&[("c1", "increment", "{}"), ("c2", "increment", "{}")]),
            calls(&[("", "increment", r#"{"a": 1}"#), ("", "increment", r#"{ "a" : 1 }"#)]),
            LlmResponse::text("done"),
        ]));
        let agent = counter(provider, 4);

        let response = agent.run("go").await.unwrap();
        assert_eq!(response.state["count"], json!(3));
        assert_eq!(response.tool_responses.unwrap().len(), 3);
        // user + 3 次调用 * 2 + 最终回复
        assert_eq!(agent.state().history_len(), 8);
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_the_tool() {
        let def = AgentDefinition::builder("adder")
            .instructions("add numbers")
            .field(StateField::new("count", FieldType::Integer).default(json!(0)))
            .tool(
                FnTool::new("add", "add to count", |state, args| {
                    let by: i64 = args.get("by")?;
                    state.set("count", json!(by))?;
                    Ok("added".into())
                })
                .param(ParamSpec::integer("by").required()),
            )
            .build()
            .unwrap();
        let provider = Arc::new(MockProvider::new().with_replies([
            calls(&[("c1", "add", r#"{"by": "many"}"#), ("c2", "add", "not json")]),
            LlmResponse::text("oops"),
        ]));
        let agent = Agent::builder(def, provider).build().unwrap();

        let response = agent.run("add").await.unwrap();
        assert_eq!(response.state["count"], json!(0));
        let tools = response.tool_responses.unwrap();
        assert!(tools.iter().all(|t| !t.succeeded && t.arguments.is_null()));
        assert!(tools[0].output.starts_with("Function args were invalid:"));
        assert_eq!(agent.state().history_len(), 6);
    }

    #[tokio::test]
    async fn test_provider_failure_degrades() {
        let provider = Arc::new(MockProvider::new().with_failure(LlmError::Other("upstream down".into())));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let def = AgentDefinition::builder("fragile").instructions("x").build().unwrap();
        let agent = Agent::builder(def, provider).emitter(tx).build().unwrap();

        let response = agent.run("hello").await.unwrap();
        assert!(response.is_degraded());
        assert_eq!(response.error.as_deref(), Some("upstream down"));
        assert_eq!(
            response.final_output,
            json!("The LLM failed to generate a response: upstream down")
        );
        let history = agent.state().history();
        assert_eq!(history.last().unwrap().content, "Failed to generate a response");

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            saw_error |= matches!(event, AgentEvent::Error { .. });
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_response_parts_follow_declarations() {
        let plain = AgentDefinition::builder("plain").instructions("x").build().unwrap();
        let agent = Agent::builder(plain, Arc::new(MockProvider::new())).build().unwrap();
        let response = agent.run("hi").await.unwrap();
        assert_eq!(response.final_output, json!("Echo from Mock: hi"));
        assert!(response.tool_responses.is_none());
        assert!(response.agent_responses.is_none());

        let serialized = serde_json::to_value(&response).unwrap();
        assert!(serialized.get("tool_responses").is_none());

        let agent = counter(Arc::new(MockProvider::new()), 1);
        let response = agent.run("hi").await.unwrap();
        assert_eq!(response.tool_responses, Some(Vec::new()));
    }

    struct Exploding;

    impl Policy for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn on_set(&self, _event: &Event, _value: &Value) -> PolicyResult {
            Err(PolicyError::Failed("kaboom".into()))
        }
    }

    #[tokio::test]
    async fn test_failing_policy_keeps_the_written_value() {
        let def = AgentDefinition::builder("policy")
            .instructions("x")
            .field(
                StateField::new("mood", FieldType::String)
                    .default(json!("calm"))
                    .access(Access::ReadWrite)
                    .policy(Exploding),
            )
            .build()
            .unwrap();
        let provider = Arc::new(MockProvider::new().with_replies([
            calls(&[("c1", "set_mood", r#"{"value": "happy"}"#), ("c2", "get_mood", "")]),
            LlmResponse::text("ok"),
        ]));
        let agent = Agent::builder(def, provider).build().unwrap();

        let response = agent.run("cheer up").await.unwrap();
        let tools = response.tool_responses.unwrap();
        assert_eq!(tools[0].output, "Updated `mood`");
        assert_eq!(tools[1].output, "happy");
        assert_eq!(response.state["mood"], json!("happy"));
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Verdict {
        approved: bool,
        reason: String,
    }

    #[tokio::test]
    async fn test_structured_output() {
        let def = AgentDefinition::builder("judge")
            .instructions("judge things")
            .response_type::<Verdict>()
            .build()
            .unwrap();
        let provider = Arc::new(
            MockProvider::new().with_reply(LlmResponse::parsed(json!({"approved": true, "reason": "fine"}))),
        );
        let agent = Agent::builder(def, provider.clone()).build().unwrap();

        let response = agent.run("is it fine?").await.unwrap();
        assert_eq!(response.final_output["approved"], json!(true));
        let verdict: Verdict = serde_json::from_value(response.final_output).unwrap();
        assert_eq!(verdict.reason, "fine");

        let format = provider.requests()[0].response_format.clone().unwrap();
        assert!(format["properties"].get("approved").is_some());
    }

    #[tokio::test]
    async fn test_state_ref_defaults_follow_state_between_rounds() {
        let def = AgentDefinition::builder("stepper")
            .instructions("step")
            .field(StateField::new("count", FieldType::Integer).default(json!(0)))
            .field(StateField::new("step_size", FieldType::Integer).default(json!(1)))
            .tool(
                FnTool::new("step", "advance", |state, args| {
                    let by: i64 = args.get("by")?;
                    let count: i64 = state.get_as("count")?;
                    state.set("count", json!(count + by))?;
                    state.set("step_size", json!(5))?;
                    Ok(format!("stepped by {by}"))
                })
                .param(ParamSpec::integer("by").default_ref(StateRef::field("step_size"))),
            )
            .tool(
                FnTool::new("warmup", "only before the first step", |_, _| Ok::<_, ToolError>("warm".into()))
                    .when(|state| state.get("count").map(|v| v == json!(0)).unwrap_or(false)),
            )
            .build()
            .unwrap();
        let provider = Arc::new(MockProvider::new().with_replies([
            calls(&[("c1", "step", "{}")]),
            calls(&[("c2", "step", "{}")]),
            LlmResponse::text("done"),
        ]));
        let agent = Agent::builder(def, provider.clone()).max_call_depth(2).build().unwrap();

        let before = agent.tool_descriptors();
        assert_eq!(before[0].parameters["properties"]["by"]["default"], json!(1));

        let response = agent.run("step twice").await.unwrap();
        let tools = response.tool_responses.unwrap();
        assert_eq!(tools[0].arguments, json!({"by": 1}));
        assert_eq!(tools[1].arguments, json!({"by": 5}));
        assert_eq!(response.state["count"], json!(6));

        let requests = provider.requests();
        assert_eq!(requests[0].tool_names, ["step", "warmup"]);
        assert_eq!(requests[1].tool_names, ["step"]);
    }

    #[tokio::test]
    async fn test_concurrent_calls_record_in_request_order() {
        let def = AgentDefinition::builder("parallel")
            .instructions("x")
            .tool(FnTool::new_async("slow", "slow", |_, _| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, ToolError>("slow done".to_string())
            }))
            .tool(FnTool::new("fast", "fast", |_, _| Ok::<_, ToolError>("fast done".into())))
            .build()
            .unwrap();
        let provider = Arc::new(MockProvider::new().with_replies([
            calls(&[("a", "slow", ""), ("b", "fast", "")]),
            LlmResponse::text("both"),
        ]));
        let agent = Agent::builder(def, provider)
            .max_concurrent_calls(2)
            .build()
            .unwrap();

        let response = agent.run("go").await.unwrap();
        let outputs: Vec<String> = response.tool_responses.unwrap().into_iter().map(|t| t.output).collect();
        assert_eq!(outputs, ["slow done", "fast done"]);

        let history = agent.state().history();
        assert_eq!(history[1].tool_calls[0].id, "a");
        assert_eq!(history[2].tool_call_id.as_deref(), Some("a"));
        assert_eq!(history[3].tool_calls[0].id, "b");
        assert_eq!(history[4].tool_call_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_input_template_wraps_user_message() {
        let def = AgentDefinition::builder("templated")
            .instructions("Topic: {{ topic }}")
            .input_template("[{{ topic }}] {{ user_message }}")
            .field(StateField::new("topic", FieldType::String).default(json!("bees")))
            .build()
            .unwrap();
        let agent = Agent::builder(def, Arc::new(MockProvider::new())).build().unwrap();
        let response = agent.run("how do they fly?").await.unwrap();
        assert_eq!(response.final_output, json!("Echo from Mock: [bees] how do they fly?"));
    }

    #[tokio::test]
    async fn test_ref_cleared_to_null_mid_run_is_treated_as_unset() {
        let def = AgentDefinition::builder("picker")
            .instructions("x")
            .field(StateField::new("options", FieldType::Array).default(json!(["a", "b"])))
            .tool(
                FnTool::new("pick", "pick one option", |state, args| {
                    let choice: String = args.get("choice")?;
                    state.set("options", Value::Null)?;
                    Ok(format!("picked {choice}"))
                })
                .param(ParamSpec::string("choice").required().one_of_ref(StateRef::field("options"))),
            )
            .build()
            .unwrap();
        let provider = Arc::new(MockProvider::new().with_replies([
            calls(&[("c1", "pick", r#"{"choice": "a"}"#)]),
            calls(&[("c2", "pick", r#"{"choice": "z"}"#)]),
            LlmResponse::text("done"),
        ]));
        let agent = Agent::builder(def, provider.clone()).max_call_depth(2).build().unwrap();

        let first = agent.tool_descriptors();
        assert_eq!(first[0].parameters["properties"]["choice"]["enum"], json!(["a", "b"]));

        let response = agent.run("pick twice").await.unwrap();
        assert!(!response.is_degraded());
        assert_eq!(response.final_output, json!("done"));
        assert_eq!(provider.call_count(), 3);

        let tools = response.tool_responses.unwrap();
        assert_eq!(tools[0].output, "picked a");
        assert!(tools[1].succeeded);
        assert_eq!(tools[1].output, "picked z");
        assert_eq!(response.state, json!({"options": null}));

        let after = agent.tool_descriptors();
        assert!(after[0].parameters["properties"]["choice"].get("enum").is_none());
    }
}
