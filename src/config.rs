//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WEATHER_AGENT__*` 覆盖
//! （双下划线表示嵌套，如 `WEATHER_AGENT__LLM__PROVIDER=openai`）。
//! 列表型键用逗号分隔，如 `WEATHER_AGENT__GUARDRAILS__BLOCKED_KEYWORDS=BLOCK,SECRET`。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub session: SessionSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub guardrails: GuardrailsSection,
}

/// [app] 段：应用名、默认用户与会话、对话轮数上限、最终回复写入的状态键
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub user_id: String,
    pub session_id: String,
    /// 对话历史保留轮数
    pub max_context_turns: usize,
    pub output_key: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "weather_tutorial_app".to_string(),
            user_id: "user_1".to_string(),
            session_id: "session_001".to_string(),
            max_context_turns: 20,
            output_key: "last_weather_report".to_string(),
        }
    }
}

/// [session] 段：新会话的初始状态
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Celsius / Fahrenheit
    pub unit_preference: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            unit_preference: "Celsius".to_string(),
        }
    }
}

/// [llm] 段：推理后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// intent（规则，无需 Key）/ openai / deepseek
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "intent".to_string(),
            model: None,
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次推理请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub weather: WeatherSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            weather: WeatherSection::default(),
        }
    }
}

/// [tools.weather] 段：天气数据源；API Key 只从 OPENWEATHER_API_KEY 读取
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherSection {
    /// openweathermap / static
    pub provider: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            provider: "openweathermap".to_string(),
            base_url: None,
            timeout_secs: 5,
        }
    }
}

/// [guardrails] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardrailsSection {
    /// 推理前拦截的关键词（大小写不敏感）
    pub blocked_keywords: Vec<String>,
    /// 工具前按参数值拦截
    pub tool_blocks: Vec<ToolBlockSection>,
}

impl Default for GuardrailsSection {
    fn default() -> Self {
        Self {
            blocked_keywords: vec!["BLOCK".to_string()],
            tool_blocks: vec![ToolBlockSection::default()],
        }
    }
}

/// [[guardrails.tool_blocks]]：tool 的 argument 参数取 values 中任一值（大小写不敏感）时拒绝
#[derive(Debug, Clone, Deserialize)]
pub struct ToolBlockSection {
    pub tool: String,
    pub argument: String,
    pub values: Vec<String>,
}

impl Default for ToolBlockSection {
    fn default() -> Self {
        Self {
            tool: "get_weather".to_string(),
            argument: "city".to_string(),
            values: vec!["Paris".to_string()],
        }
    }
}

/// 从 config 目录加载配置，环境变量 WEATHER_AGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 WEATHER_AGENT__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WEATHER_AGENT")
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("guardrails.blocked_keywords")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
