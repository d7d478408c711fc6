//! Weather Agent - 带护栏的多 Agent 天气助手
//!
//! 模块划分：
//! - **agent**: Agent 定义与默认 Agent 树（天气根 Agent + 问候 / 告别子 Agent）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、单轮状态、Runner 与对话循环
//! - **dispatch**: 推理后端（LLM / 规则意图）与单轮流水线
//! - **guardrail**: 推理前与工具前护栏链
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 会话内对话历史
//! - **session**: 会话状态与会话存储
//! - **tools**: 工具注册表、执行器与天气 / 问候 / 告别工具
//! - **weather**: 天气数据源（OpenWeatherMap / 固定表）

pub mod agent;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod guardrail;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod session;
pub mod tools;
pub mod weather;

pub use crate::core::{AgentError, ConversationLoop, Runner, TurnResponse};
