//! 记忆层：对话历史与提示模板

pub mod conversation;
pub mod template;

pub use conversation::{Conversation, Message, Role};
pub use template::render;
