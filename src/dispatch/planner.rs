//! 推理后端：意图规划、工具调用与委派解析
//!
//! ReasoningBackend 是编排层唯一依赖的推理契约，可替换而不改动 Dispatcher：
//! - generate：给定历史、当前 Agent（指令、子 Agent）与可用工具，返回直接回复 / 工具调用 / 委派；
//! - generate_with_tool_result：把工具结果喂回，得到本轮最终文本（只往返一次）。
//!
//! LlmBackend 通过提示词约定 JSON 协议驱动任意 LlmClient；parse_llm_output 从文本中提取 JSON。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::Agent;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::{tool_call_schema_json, ToolResult, ToolSpec};

/// 推理后端要求执行的工具调用（{"tool": "get_weather", "args": {"city": "..."}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// 推理后端的一次输出
#[derive(Debug, Clone, PartialEq)]
pub enum BackendReply {
    /// 直接回复用户
    Text(String),
    /// 需要执行工具
    ToolCall(ToolCall),
    /// 本轮交给指定子 Agent 处理
    Transfer(String),
}

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn generate(
        &self,
        history: &[Message],
        agent: &Agent,
        tools: &[ToolSpec],
    ) -> Result<BackendReply, AgentError>;

    async fn generate_with_tool_result(
        &self,
        history: &[Message],
        agent: &Agent,
        call: &ToolCall,
        result: &ToolResult,
    ) -> Result<String, AgentError>;
}

#[derive(Debug, Deserialize)]
struct RawReply {
    tool: Option<String>,
    args: Option<Value>,
    transfer_to: Option<String>,
    response: Option<String>,
}

/// 解析 LLM 输出：含 JSON 时按 transfer_to > tool > response 取值，否则视为直接回复
///
/// 只有 ```json 代码块解析失败才算 JsonParseError；裸花括号解析不出来时按普通文本处理
/// （如 "I can help with {weather} questions"）。
pub fn parse_llm_output(output: &str) -> Result<BackendReply, AgentError> {
    let trimmed = output.trim();

    let parsed: RawReply = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let json_str = rest
            .find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim());
        serde_json::from_str::<RawReply>(json_str)
            .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start >= end {
            return Ok(BackendReply::Text(trimmed.to_string()));
        }
        match serde_json::from_str::<RawReply>(&trimmed[start..=end]) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, "Braces in reply are not JSON, treating as text");
                return Ok(BackendReply::Text(trimmed.to_string()));
            }
        }
    } else {
        return Ok(BackendReply::Text(trimmed.to_string()));
    };

    if let Some(target) = parsed.transfer_to.filter(|t| !t.trim().is_empty()) {
        return Ok(BackendReply::Transfer(target.trim().to_string()));
    }
    if let Some(tool) = parsed.tool.filter(|t| !t.trim().is_empty()) {
        return Ok(BackendReply::ToolCall(ToolCall::new(
            tool.trim(),
            parsed.args.unwrap_or_else(empty_args),
        )));
    }
    Ok(BackendReply::Text(
        parsed.response.unwrap_or_else(|| trimmed.to_string()),
    ))
}

/// 基于 LlmClient 的推理后端
pub struct LlmBackend {
    llm: Arc<dyn LlmClient>,
}

impl LlmBackend {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 拼接 system：Agent 指令 + 可用工具 + 可委派子 Agent + 回复格式
    fn build_system_prompt(agent: &Agent, tools: &[ToolSpec]) -> String {
        let mut s = format!("{}\n\n", agent.instructions);

        if !tools.is_empty() {
            s.push_str("## Available tools\n");
            for t in tools {
                s.push_str(&format!("- {}: {} Parameters: {}\n", t.name, t.description, t.parameters));
            }
            s.push('\n');
        }

        if !agent.children.is_empty() {
            s.push_str("## Sub-agents you can transfer the request to\n");
            for c in &agent.children {
                s.push_str(&format!("- {}: {}\n", c.name, c.description));
            }
            s.push('\n');
        }

        s.push_str("## Reply format\n");
        s.push_str("Reply with exactly ONE of the following and nothing else:\n");
        if !tools.is_empty() {
            s.push_str("- a tool call: {\"tool\": \"<tool name>\", \"args\": {...}}\n");
        }
        if !agent.children.is_empty() {
            s.push_str("- a transfer: {\"transfer_to\": \"<sub-agent name>\"}\n");
        }
        s.push_str("- a direct answer as plain text.\n\nJSON schema:\n");
        s.push_str(&tool_call_schema_json());
        s
    }

    fn build_tool_result_prompt(agent: &Agent, call: &ToolCall, result: &ToolResult) -> String {
        format!(
            "{}\n\nYou called tool `{}` with args {} and it returned:\n{}\n\n\
             Answer the user in plain text based on this result. Do not call any tool. \
             If the status is \"error\", explain the problem politely.",
            agent.instructions,
            call.tool,
            call.args,
            result.to_json()
        )
    }
}

#[async_trait]
impl ReasoningBackend for LlmBackend {
    async fn generate(
        &self,
        history: &[Message],
        agent: &Agent,
        tools: &[ToolSpec],
    ) -> Result<BackendReply, AgentError> {
        let system = Self::build_system_prompt(agent, tools);
        let output = self
            .llm
            .complete(&system, history)
            .await
            .map_err(AgentError::LlmError)?;
        let (prompt_tokens, completion_tokens, _) = self.llm.token_usage();
        tracing::debug!(
            agent = %agent.name,
            output = %output,
            prompt_tokens,
            completion_tokens,
            "LLM reply"
        );
        parse_llm_output(&output)
    }

    async fn generate_with_tool_result(
        &self,
        history: &[Message],
        agent: &Agent,
        call: &ToolCall,
        result: &ToolResult,
    ) -> Result<String, AgentError> {
        let system = Self::build_tool_result_prompt(agent, call, result);
        let output = self
            .llm
            .complete(&system, history)
            .await
            .map_err(AgentError::LlmError)?;
        let text = output.trim();
        if text.is_empty() {
            return Err(AgentError::LlmError("empty response".to_string()));
        }
        Ok(text.to_string())
    }
}
