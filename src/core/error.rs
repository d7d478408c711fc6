//! Agent 错误类型
//!
//! 只有配置/编程错误（未知会话、未知工具、未知 Agent、重复会话）与推理后端失败会以 AgentError 出现；
//! 护栏拦截与工具失败都在流水线内部转为文本或 error 形态的 ToolResult。

use thiserror::Error;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Session already exists: {0}")]
    DuplicateSession(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    /// 推理后端调用失败（网络、鉴权、响应格式等）
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("LLM timeout after {0}s")]
    LlmTimeout(u64),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 是否属于推理后端故障：这类错误不会中断调用方，而是转为 Escalated 回复
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            AgentError::LlmError(_) | AgentError::LlmTimeout(_) | AgentError::JsonParseError(_)
        )
    }
}
