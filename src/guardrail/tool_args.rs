//! 工具参数护栏（工具前）
//!
//! 受保护工具的某个参数与屏蔽值大小写不敏感相等时，写入审计标记并返回 error 形态的 ToolResult，
//! 工具本身的 invoke 不会被调用。

use serde_json::Value;

use super::{GuardrailDecision, ToolGuardrail};
use crate::session::{SessionState, TOOL_GUARDRAIL_TRIGGERED_KEY};
use crate::tools::ToolResult;
use crate::weather::capitalize;

pub struct BlockedArgumentGuardrail {
    tool_name: String,
    argument: String,
    /// 已转为小写的屏蔽值
    blocked_values: Vec<String>,
    flag_key: String,
}

impl BlockedArgumentGuardrail {
    pub fn new<I, S>(tool_name: impl Into<String>, argument: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tool_name: tool_name.into(),
            argument: argument.into(),
            blocked_values: values
                .into_iter()
                .map(|v| v.as_ref().trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect(),
            flag_key: TOOL_GUARDRAIL_TRIGGERED_KEY.to_string(),
        }
    }

    pub fn with_flag_key(mut self, key: impl Into<String>) -> Self {
        self.flag_key = key.into();
        self
    }

    pub fn denial(value: &str) -> String {
        format!(
            "Policy restriction: Weather checks for '{}' are currently disabled by a tool guardrail.",
            capitalize(value)
        )
    }
}

impl ToolGuardrail for BlockedArgumentGuardrail {
    fn name(&self) -> &str {
        "blocked_argument"
    }

    fn before_tool(
        &self,
        tool_name: &str,
        args: &Value,
        state: &mut SessionState,
    ) -> GuardrailDecision<ToolResult> {
        if tool_name != self.tool_name {
            return GuardrailDecision::Pass;
        }
        let Some(value) = args.get(&self.argument).and_then(Value::as_str) else {
            return GuardrailDecision::Pass;
        };
        if value.is_empty() || !self.blocked_values.contains(&value.trim().to_lowercase()) {
            return GuardrailDecision::Pass;
        }

        tracing::info!(tool = %tool_name, argument = %self.argument, value = %value, "Blocked tool argument");
        state.set(self.flag_key.as_str(), true);
        GuardrailDecision::Terminal(ToolResult::error(Self::denial(value)))
    }
}
