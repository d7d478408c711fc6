//! Agent 定义
//!
//! Agent 是配置而非运行时状态：名称、描述、指令、可调用工具集合、有序子 Agent 列表，构建后不可变。
//! 根 Agent 没有父节点；子 Agent 只能经由根的委派在单轮内接管。

use std::collections::HashSet;

use crate::core::AgentError;
use crate::tools::{ToolRegistry, SAY_GOODBYE_TOOL_NAME, SAY_HELLO_TOOL_NAME, WEATHER_TOOL_NAME};

pub const ROOT_AGENT_NAME: &str = "weather_agent";
pub const GREETING_AGENT_NAME: &str = "greeting_agent";
pub const FAREWELL_AGENT_NAME: &str = "farewell_agent";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Agent {
    pub name: String,
    pub description: String,
    pub instructions: String,
    /// 可调用的工具名（保持声明顺序，不重复）
    pub tools: Vec<String>,
    pub children: Vec<Agent>,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instructions: String::new(),
            tools: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        let tool = tool.into();
        if !self.tools.contains(&tool) {
            self.tools.push(tool);
        }
        self
    }

    pub fn with_child(mut self, child: Agent) -> Self {
        self.children.push(child);
        self
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }

    /// 在直接子 Agent 中按名查找
    pub fn child(&self, name: &str) -> Option<&Agent> {
        self.children.iter().find(|c| c.name == name)
    }

    /// 按名解析直接子 Agent，找不到返回 UnknownAgent
    pub fn resolve_child(&self, name: &str) -> Result<&Agent, AgentError> {
        self.child(name)
            .ok_or_else(|| AgentError::UnknownAgent(name.to_string()))
    }

    /// 校验整棵树：名称唯一、工具均已注册、子 Agent 不再有子节点（单层委派）
    pub fn validate(&self, registry: &ToolRegistry) -> Result<(), AgentError> {
        let mut seen = HashSet::new();
        self.validate_node(registry, &mut seen, 0)
    }

    fn validate_node<'a>(
        &'a self,
        registry: &ToolRegistry,
        seen: &mut HashSet<&'a str>,
        depth: usize,
    ) -> Result<(), AgentError> {
        if !seen.insert(self.name.as_str()) {
            return Err(AgentError::ConfigError(format!(
                "duplicate agent name: {}",
                self.name
            )));
        }
        if depth > 0 && !self.children.is_empty() {
            return Err(AgentError::ConfigError(format!(
                "agent '{}' has children, but delegation is single-level",
                self.name
            )));
        }
        for tool in &self.tools {
            registry.resolve(tool)?;
        }
        for child in &self.children {
            child.validate_node(registry, seen, depth + 1)?;
        }
        Ok(())
    }
}

/// 默认 Agent 树：天气根 Agent，委派问候与告别
pub fn default_agent_tree() -> Agent {
    let greeting = Agent::new(GREETING_AGENT_NAME)
        .with_description("Handles simple greetings and hellos.")
        .with_instructions(
            "You are the Greeting Agent. Your ONLY task is to greet the user using the 'say_hello' tool.",
        )
        .with_tool(SAY_HELLO_TOOL_NAME);

    let farewell = Agent::new(FAREWELL_AGENT_NAME)
        .with_description("Handles simple farewells and goodbyes.")
        .with_instructions(
            "You are the Farewell Agent. Your ONLY task is to say goodbye using the 'say_goodbye' tool.",
        )
        .with_tool(SAY_GOODBYE_TOOL_NAME);

    Agent::new(ROOT_AGENT_NAME)
        .with_description(
            "Main agent: provides weather reports, delegates greetings and farewells.",
        )
        .with_instructions(
            "You are the main Weather Agent. Use 'get_weather' for weather requests. \
             Delegate greetings to 'greeting_agent' and farewells to 'farewell_agent'. \
             For anything else, answer briefly or say you cannot help.",
        )
        .with_tool(WEATHER_TOOL_NAME)
        .with_child(greeting)
        .with_child(farewell)
}
