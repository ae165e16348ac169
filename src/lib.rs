//! Hive - 声明式 Agent 运行时
//!
//! 模块划分：
//! - **agent**: Agent 定义（字段 / 工具 / 关联 / 输出格式）、状态引用、运行结果、Agent 实例
//! - **config**: 运行时配置加载（TOML + 环境变量）
//! - **core**: 错误分层、同轮调用并发限制
//! - **llm**: Provider 抽象、请求 / 响应类型、Mock Provider
//! - **memory**: 对话历史与提示模板渲染
//! - **observability**: 日志初始化、span 追踪抽象与内存 Tracer
//! - **react**: 推理 / 调用循环、调用路由、过程事件
//! - **state**: 类型化状态、同步 / 后台策略管线、内置策略、SQLite 历史
//! - **tools**: 工具 trait 与注册表、参数声明与编译、闭包工具、状态访问工具

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod state;
pub mod tools;

pub use agent::{Agent, AgentDefinition, AgentResponse, AgentSettings};
pub use core::AgentError;
