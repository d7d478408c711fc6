//! 问候 / 告别工具（无状态）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolResult};

pub const SAY_HELLO_TOOL_NAME: &str = "say_hello";
pub const SAY_GOODBYE_TOOL_NAME: &str = "say_goodbye";

/// 问候：有 name 时带名字
pub struct SayHelloTool;

#[async_trait]
impl Tool for SayHelloTool {
    fn name(&self) -> &str {
        SAY_HELLO_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Greets the user. Args: {\"name\": \"optional name\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Name of the person to greet"}
            },
            "required": []
        })
    }

    async fn invoke(&self, args: &Value, _ctx: &mut ToolContext<'_>) -> ToolResult {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty());
        match name {
            Some(n) => ToolResult::report(format!("Hello, {}!", n)),
            None => ToolResult::report("Hello there!"),
        }
    }
}

pub struct SayGoodbyeTool;

#[async_trait]
impl Tool for SayGoodbyeTool {
    fn name(&self) -> &str {
        SAY_GOODBYE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Says goodbye to the user. No args."
    }

    async fn invoke(&self, _args: &Value, _ctx: &mut ToolContext<'_>) -> ToolResult {
        ToolResult::report("Goodbye! Have a great day.")
    }
}
