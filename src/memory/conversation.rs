//! 短期记忆：会话内的对话历史
//!
//! 消息一旦创建即不可变；历史按时间顺序完整保存 user / agent 消息。
//! max_turns 只限制送入推理后端的上下文窗口（最近 max_turns*2 条），不删除会话历史。

use serde::{Deserialize, Serialize};

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

/// 单条消息；author 记录产生该回复的 Agent 名称（用户消息为 None）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            author: None,
        }
    }

    pub fn agent(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: content.into(),
            author: Some(author.into()),
        }
    }
}

/// 从历史末尾向前查找第一条用户消息
pub fn last_user_message(messages: &[Message]) -> Option<&Message> {
    messages.iter().rev().find(|m| m.role == Role::User)
}

/// 对话历史（每轮含 user + agent，上下文窗口为最近 max_turns*2 条消息）
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// 会话内全部消息
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 送入推理后端的上下文窗口：最近 max_turns*2 条
    pub fn context(&self) -> &[Message] {
        let keep = self.max_turns * 2;
        let start = self.messages.len().saturating_sub(keep);
        &self.messages[start..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(20)
    }
}
