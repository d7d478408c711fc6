//! 单轮过程事件：用于流式展示委派、护栏拦截、工具调用与最终回复

use serde::Serialize;

use crate::core::TurnPhase;

/// 护栏注入点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStage {
    BeforeModel,
    BeforeTool,
}

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 阶段切换
    Phase { phase: TurnPhase },
    /// 根 Agent 把本轮交给子 Agent
    Transfer { from: String, to: String },
    /// 护栏触发
    GuardrailBlocked { stage: GuardrailStage, detail: String },
    ToolCall {
        agent: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具结果（预览，避免过长）
    ToolResult {
        tool: String,
        success: bool,
        preview: String,
    },
    FinalResponse { author: String, text: String },
    /// 推理后端故障导致的升级
    Escalated { reason: String },
}
