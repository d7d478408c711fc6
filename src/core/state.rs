//! 单轮对话的状态定义：TurnPhase 与 TurnResponse
//!
//! 每轮都从 Received 出发，经护栏检查、推理、可选的工具调用，最终到达 Responded；
//! 没有重试状态，后端或工具失败都以 error 形态的结果或 Escalated 回复结束。

use serde::Serialize;

/// 单轮流水线所处阶段（用于日志与事件推送）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Received,
    /// 护栏检查（推理前或工具前）
    GuardrailCheck,
    Reasoning,
    ToolRequested,
    /// 工具调用被护栏拒绝，拒绝结果代替执行结果
    ToolDenied,
    ToolExec,
    Responded,
}

/// 一轮的最终结果：正常文本回复，或后端故障导致的升级（调用方可据此分支）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum TurnResponse {
    Final(String),
    Escalated(String),
}

impl TurnResponse {
    pub fn is_escalated(&self) -> bool {
        matches!(self, TurnResponse::Escalated(_))
    }

    /// 最终文本；Escalated 时为 None
    pub fn text(&self) -> Option<&str> {
        match self {
            TurnResponse::Final(text) => Some(text),
            TurnResponse::Escalated(_) => None,
        }
    }

    /// 面向终端的展示文本
    pub fn display_text(&self) -> String {
        match self {
            TurnResponse::Final(text) => text.clone(),
            TurnResponse::Escalated(reason) => format!("Agent escalated: {}", reason),
        }
    }
}
