//! 规则意图识别后端
//!
//! 不调用 LLM 的确定性 ReasoningBackend：按关键词把用户输入归类为天气 / 问候 / 告别，
//! 根 Agent 据此委派或直接调用工具；工具结果原样转述。用于测试、离线演示与未配置 API Key 的场景。

use async_trait::async_trait;
use serde_json::json;

use super::planner::{BackendReply, ReasoningBackend, ToolCall};
use crate::agent::Agent;
use crate::core::AgentError;
use crate::memory::{last_user_message, Message, Role};
use crate::tools::{
    ToolResult, ToolSpec, SAY_GOODBYE_TOOL_NAME, SAY_HELLO_TOOL_NAME, WEATHER_TOOL_NAME,
};

/// 识别出的意图
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Greeting { name: Option<String> },
    Farewell,
    Weather { city: Option<String> },
    Unknown,
}

impl Intent {
    /// 处理该意图所需的工具
    fn tool(&self) -> Option<&'static str> {
        match self {
            Intent::Greeting { .. } => Some(SAY_HELLO_TOOL_NAME),
            Intent::Farewell => Some(SAY_GOODBYE_TOOL_NAME),
            Intent::Weather { .. } => Some(WEATHER_TOOL_NAME),
            Intent::Unknown => None,
        }
    }

    fn tool_args(&self) -> serde_json::Value {
        match self {
            Intent::Greeting { name: Some(n) } => json!({ "name": n }),
            Intent::Weather { city: Some(c) } => json!({ "city": c }),
            _ => json!({}),
        }
    }
}

const GREETING_WORDS: &[&str] = &["hello", "hi", "hey", "greetings", "good morning", "good afternoon", "good evening"];
const FAREWELL_WORDS: &[&str] = &["bye", "goodbye", "see you", "farewell", "good night"];
const FOLLOW_UP_PREFIXES: &[&str] = &["how about", "what about", "and in", "and for"];

/// 关键词意图分类器
#[derive(Debug, Default, Clone)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// 对最近一条用户消息分类；追问式输入（"How about Paris?"）在之前问过天气时视为天气
    pub fn classify(&self, history: &[Message]) -> Intent {
        let Some(last) = last_user_message(history) else {
            return Intent::Unknown;
        };
        let text = last.content.trim();
        let lower = text.to_ascii_lowercase();

        if lower.contains("weather") || lower.contains("temperature") || lower.contains("forecast") {
            return Intent::Weather { city: extract_city(text) };
        }
        if FOLLOW_UP_PREFIXES.iter().any(|p| lower.starts_with(p)) && asked_weather_before(history) {
            return Intent::Weather { city: extract_city(text) };
        }
        if contains_word(&lower, FAREWELL_WORDS) {
            return Intent::Farewell;
        }
        if contains_word(&lower, GREETING_WORDS) {
            return Intent::Greeting { name: extract_name(text) };
        }
        Intent::Unknown
    }
}

/// 除最近一条外，是否有用户消息问过天气
fn asked_weather_before(history: &[Message]) -> bool {
    history
        .iter()
        .rev()
        .filter(|m| m.role == Role::User)
        .skip(1)
        .any(|m| m.content.to_ascii_lowercase().contains("weather"))
}

/// 按词边界匹配（短语按子串匹配）
fn contains_word(lower: &str, words: &[&str]) -> bool {
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    words.iter().any(|w| {
        if w.contains(' ') {
            lower.contains(w)
        } else {
            tokens.iter().any(|t| t == w)
        }
    })
}

/// 取最后一个 " in " / " about " / " for " 之后的部分作为城市名
fn extract_city(text: &str) -> Option<String> {
    let padded = format!(" {}", text);
    let lower = padded.to_ascii_lowercase();
    let (pos, marker) = [" in ", " about ", " for "]
        .iter()
        .filter_map(|m| lower.rfind(m).map(|p| (p, *m)))
        .max_by_key(|(p, _)| *p)?;
    let rest = &padded[pos + marker.len()..];
    let city = rest
        .split(['?', '.', '!', ','])
        .next()
        .unwrap_or("")
        .trim();
    let city = city.strip_prefix("the ").unwrap_or(city).trim();
    if city.is_empty() {
        None
    } else {
        Some(city.to_string())
    }
}

/// "my name is X" / "I'm X" / "I am X"
fn extract_name(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    ["my name is ", "i'm ", "i am "].iter().find_map(|marker| {
        let pos = lower.find(marker)?;
        let name = text[pos + marker.len()..]
            .split(['?', '.', '!', ','])
            .next()?
            .trim();
        (!name.is_empty()).then(|| name.to_string())
    })
}

/// 确定性推理后端
#[derive(Debug, Default, Clone)]
pub struct IntentBackend {
    classifier: IntentClassifier,
}

impl IntentBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReasoningBackend for IntentBackend {
    async fn generate(
        &self,
        history: &[Message],
        agent: &Agent,
        tools: &[ToolSpec],
    ) -> Result<BackendReply, AgentError> {
        let intent = self.classifier.classify(history);
        tracing::debug!(agent = %agent.name, intent = ?intent, "Intent classified");

        let Some(tool) = intent.tool() else {
            return Ok(BackendReply::Text(
                "I can help with weather reports, greetings and farewells.".to_string(),
            ));
        };

        if tools.iter().any(|t| t.name == tool) {
            if let Intent::Weather { city: None } = intent {
                return Ok(BackendReply::Text(
                    "Which city would you like the weather for?".to_string(),
                ));
            }
            return Ok(BackendReply::ToolCall(ToolCall::new(tool, intent.tool_args())));
        }

        // 自己没有该工具时，委派给拥有它的子 Agent
        if let Some(child) = agent.children.iter().find(|c| c.has_tool(tool)) {
            return Ok(BackendReply::Transfer(child.name.clone()));
        }

        Ok(BackendReply::Text(format!(
            "Sorry, {} cannot handle that request.",
            agent.name
        )))
    }

    async fn generate_with_tool_result(
        &self,
        _history: &[Message],
        _agent: &Agent,
        _call: &ToolCall,
        result: &ToolResult,
    ) -> Result<String, AgentError> {
        if result.is_success() {
            Ok(result.summary())
        } else {
            Ok(format!("Sorry, I couldn't complete that: {}", result.summary()))
        }
    }
}
