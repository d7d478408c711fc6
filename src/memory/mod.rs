//! 记忆层：会话内短期对话历史

pub mod conversation;

pub use conversation::{last_user_message, ConversationMemory, Message, Role};
