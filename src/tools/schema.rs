//! 推理回复 JSON Schema 生成（schemars）
//!
//! 将「合法回复」的 JSON 结构注入 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 推理回复格式：与 parse_llm_output 解析的三种 JSON 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ReplyFormat {
    /// 要调用的工具名，如 get_weather
    pub tool: Option<String>,
    /// 工具参数，依工具不同而不同（city、name 等）
    pub args: Option<Value>,
    /// 要委派的子 Agent 名，如 greeting_agent
    pub transfer_to: Option<String>,
    /// 直接回复用户的文本
    pub response: Option<String>,
}

/// 返回推理回复的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ReplyFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
