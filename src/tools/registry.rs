//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / invoke），由 ToolRegistry 按名注册与查找；
//! 查不到时返回 AgentError::UnknownTool，而不是静默忽略。工具结果统一为 ToolResult（success / error）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::session::SessionState;

/// 工具结果状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
}

/// 统一的工具结果信封：success 时携带 payload 字段，error 时携带 error_message
///
/// 序列化后 payload 字段与 status 平铺，如 `{"status": "success", "report": "..."}`。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolResult {
    pub fn success(payload: Map<String, Value>) -> Self {
        Self {
            status: ToolStatus::Success,
            payload,
            error_message: None,
        }
    }

    /// 只含一段 report 文本的成功结果
    pub fn report(text: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("report".to_string(), Value::String(text.into()));
        Self::success(payload)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            payload: Map::new(),
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    pub fn report_text(&self) -> Option<&str> {
        self.payload.get("report").and_then(Value::as_str)
    }

    /// 给人看的一句话摘要：report > error_message > payload JSON
    pub fn summary(&self) -> String {
        if let Some(report) = self.report_text() {
            return report.to_string();
        }
        if let Some(err) = &self.error_message {
            return err.clone();
        }
        Value::Object(self.payload.clone()).to_string()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.summary())
    }
}

/// 工具执行上下文：当前 Agent 名与会话状态（整轮内借用，不跨轮保留）
pub struct ToolContext<'a> {
    pub agent_name: &'a str,
    pub state: &'a mut SessionState,
}

impl<'a> ToolContext<'a> {
    pub fn new(agent_name: &'a str, state: &'a mut SessionState) -> Self {
        Self { agent_name, state }
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；失败以 error 形态的 ToolResult 返回，不向上抛错
    async fn invoke(&self, args: &Value, ctx: &mut ToolContext<'_>) -> ToolResult;
}

/// 提供给推理后端的工具描述
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Tool re-registered, previous definition replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 按名查找，找不到返回 UnknownTool
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, AgentError> {
        self.get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    /// 为给定工具名列表生成 ToolSpec（保持传入顺序）
    pub fn specs_for<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ToolSpec>, AgentError> {
        names
            .iter()
            .map(|name| {
                let tool = self.resolve(name.as_ref())?;
                Ok(ToolSpec {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                })
            })
            .collect()
    }
}
