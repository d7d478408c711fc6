//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时：execute(tool_name, args, ctx) 在超时内调用工具，
//! 超时转为 error 形态的 ToolResult（工具失败不致命）；未知工具返回 AgentError::UnknownTool。
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{ToolContext, ToolRegistry, ToolResult};

/// 工具执行器：对每次调用施加超时
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// 执行指定工具；输出 JSON 审计日志
    pub async fn execute(
        &self,
        tool_name: &str,
        args: &Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, AgentError> {
        let tool = self.registry.resolve(tool_name)?;
        let start = Instant::now();

        let result = timeout(self.timeout, tool.invoke(args, ctx)).await;

        let outcome = match &result {
            Ok(r) if r.is_success() => "ok",
            Ok(_) => "error",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "agent": ctx.agent_name,
            "ok": outcome == "ok",
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        Ok(result.unwrap_or_else(|_| {
            ToolResult::error(format!(
                "Tool '{}' timed out after {}s",
                tool_name,
                self.timeout.as_secs()
            ))
        }))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
