//! 编排器：Runner 与对话循环
//!
//! Runner 持有 Dispatcher 与会话存储；每次 submit 都先拿到会话的独占句柄，再跑完整一轮，
//! 因此同一会话的轮次串行执行，不同会话可以并发。
//! build_runner 按配置组装：推理后端、天气数据源、工具注册表、两条护栏链。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::agent::default_agent_tree;
use crate::config::AppConfig;
use crate::core::{AgentError, TurnResponse};
use crate::dispatch::{Dispatcher, IntentBackend, LlmBackend, ReasoningBackend, TurnEvent};
use crate::guardrail::{
    BlockedArgumentGuardrail, BlockedKeywordGuardrail, ModelGuardrailChain, ToolGuardrailChain,
};
use crate::llm::{create_deepseek_client, LlmClient, OpenAiClient};
use crate::session::{
    InMemorySessionService, Session, SessionKey, SessionService, SessionState,
    UNIT_PREFERENCE_KEY,
};
use crate::tools::{SayGoodbyeTool, SayHelloTool, ToolExecutor, ToolRegistry, WeatherTool};
use crate::weather::{OpenWeatherMapProvider, StaticWeatherProvider, WeatherProvider};

/// 演示脚本：问候、两次天气、被拦截的 Paris、London、被屏蔽的关键词、告别
pub const DEMO_QUERIES: &[&str] = &[
    "Hello!",
    "What's the weather in New York?",
    "How about Paris?",
    "Tell me the weather in London.",
    "BLOCK the request for weather in Tokyo",
    "Thanks, bye!",
];

/// 会话级入口：按 (app_name, user_id, session_id) 定位会话并执行一轮
pub struct Runner {
    app_name: String,
    dispatcher: Dispatcher,
    sessions: Arc<dyn SessionService>,
}

impl Runner {
    pub fn new(
        app_name: impl Into<String>,
        dispatcher: Dispatcher,
        sessions: Arc<dyn SessionService>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            dispatcher,
            sessions,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn sessions(&self) -> &Arc<dyn SessionService> {
        &self.sessions
    }

    pub fn session_key(&self, user_id: &str, session_id: &str) -> SessionKey {
        SessionKey::new(self.app_name.as_str(), user_id, session_id)
    }

    /// 在本应用下创建会话
    pub async fn create_session(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        initial_state: SessionState,
    ) -> Result<Session, AgentError> {
        self.sessions
            .create_session(&self.app_name, user_id, session_id, initial_state)
            .await
    }

    /// 提交一条用户消息；会话不存在时返回 UnknownSession
    pub async fn submit(
        &self,
        user_id: &str,
        session_id: &str,
        text: &str,
    ) -> Result<TurnResponse, AgentError> {
        self.run(user_id, session_id, text, None).await
    }

    /// 同 submit，并把过程事件发送到 event_tx
    pub async fn submit_with_events(
        &self,
        user_id: &str,
        session_id: &str,
        text: &str,
        event_tx: mpsc::UnboundedSender<TurnEvent>,
    ) -> Result<TurnResponse, AgentError> {
        self.run(user_id, session_id, text, Some(&event_tx)).await
    }

    async fn run(
        &self,
        user_id: &str,
        session_id: &str,
        text: &str,
        event_tx: Option<&mpsc::UnboundedSender<TurnEvent>>,
    ) -> Result<TurnResponse, AgentError> {
        let key = self.session_key(user_id, session_id);
        let mut session = self.sessions.lock_session(&key).await?;
        self.dispatcher.run_turn(&mut session, text, event_tx).await
    }
}

/// 绑定到单个会话的顺序对话驱动
pub struct ConversationLoop {
    runner: Arc<Runner>,
    user_id: String,
    session_id: String,
}

impl ConversationLoop {
    pub fn new(
        runner: Arc<Runner>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    pub fn session_key(&self) -> SessionKey {
        self.runner.session_key(&self.user_id, &self.session_id)
    }

    pub async fn submit(&self, text: &str) -> Result<TurnResponse, AgentError> {
        self.runner.submit(&self.user_id, &self.session_id, text).await
    }

    /// 依次提交；每轮完成后才提交下一条，返回各轮结果
    pub async fn run<I, S>(&self, queries: I) -> Result<Vec<TurnResponse>, AgentError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut responses = Vec::new();
        for query in queries {
            responses.push(self.submit(query.as_ref()).await?);
        }
        Ok(responses)
    }
}

/// 根据配置与环境变量选择 LLM 客户端；provider 为 intent 或缺少 Key 时返回 None
fn create_llm_from_config(cfg: &AppConfig) -> Option<Arc<dyn LlmClient>> {
    let provider = cfg.llm.provider.to_lowercase();
    match provider.as_str() {
        "deepseek" => match std::env::var("DEEPSEEK_API_KEY") {
            Ok(key) => {
                let client: Arc<dyn LlmClient> =
                    Arc::new(create_deepseek_client(&key, cfg.llm.model.as_deref()));
                tracing::info!("Using DeepSeek LLM");
                Some(client)
            }
            Err(_) => {
                tracing::warn!("DEEPSEEK_API_KEY not set, falling back to intent backend");
                None
            }
        },
        "openai" => match std::env::var("OPENAI_API_KEY") {
            Ok(key) => {
                let model = cfg
                    .llm
                    .model
                    .clone()
                    .unwrap_or_else(|| "gpt-4o-mini".to_string());
                tracing::info!("Using OpenAI LLM ({})", model);
                let client: Arc<dyn LlmClient> =
                    Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, &key));
                Some(client)
            }
            Err(_) => {
                tracing::warn!("OPENAI_API_KEY not set, falling back to intent backend");
                None
            }
        },
        "intent" => None,
        other => {
            tracing::warn!("Unknown LLM provider '{}', using intent backend", other);
            None
        }
    }
}

/// 推理后端：有可用 LLM 时走 LlmBackend，否则走规则意图后端
pub fn create_backend_from_config(cfg: &AppConfig) -> Arc<dyn ReasoningBackend> {
    match create_llm_from_config(cfg) {
        Some(llm) => Arc::new(LlmBackend::new(llm)),
        None => {
            tracing::info!("Using intent backend");
            Arc::new(IntentBackend::new())
        }
    }
}

/// 天气数据源：openweathermap（缺 Key 时工具返回 error 结果）或 static 演示表
pub fn create_weather_provider_from_config(cfg: &AppConfig) -> Arc<dyn WeatherProvider> {
    let weather = &cfg.tools.weather;
    match weather.provider.to_lowercase().as_str() {
        "static" => Arc::new(StaticWeatherProvider::demo()),
        "openweathermap" => Arc::new(OpenWeatherMapProvider::from_env(
            weather.base_url.as_deref(),
            weather.timeout_secs,
        )),
        other => {
            tracing::warn!("Unknown weather provider '{}', using static table", other);
            Arc::new(StaticWeatherProvider::demo())
        }
    }
}

/// 按配置构建护栏链
pub fn create_guardrails_from_config(cfg: &AppConfig) -> (ModelGuardrailChain, ToolGuardrailChain) {
    let mut model = ModelGuardrailChain::new();
    if !cfg.guardrails.blocked_keywords.is_empty() {
        model = model.with(BlockedKeywordGuardrail::new(&cfg.guardrails.blocked_keywords));
    }
    let mut tool = ToolGuardrailChain::new();
    for block in &cfg.guardrails.tool_blocks {
        tool = tool.with(BlockedArgumentGuardrail::new(
            block.tool.as_str(),
            block.argument.as_str(),
            &block.values,
        ));
    }
    (model, tool)
}

/// 用给定推理后端与天气数据源组装 Runner（测试与自定义部署用）
pub fn build_runner_with(
    cfg: &AppConfig,
    backend: Arc<dyn ReasoningBackend>,
    weather: Arc<dyn WeatherProvider>,
) -> Result<Runner, AgentError> {
    let mut registry = ToolRegistry::new();
    registry.register(WeatherTool::new(weather));
    registry.register(SayHelloTool);
    registry.register(SayGoodbyeTool);
    let executor = ToolExecutor::new(registry, cfg.tools.tool_timeout_secs);

    let (model_guardrails, tool_guardrails) = create_guardrails_from_config(cfg);
    let dispatcher = Dispatcher::new(default_agent_tree(), backend, executor)?
        .with_model_guardrails(model_guardrails)
        .with_tool_guardrails(tool_guardrails)
        .with_output_key(cfg.app.output_key.as_str())
        .with_llm_timeout(cfg.llm.timeouts.request);

    let sessions: Arc<dyn SessionService> =
        Arc::new(InMemorySessionService::new(cfg.app.max_context_turns));
    Ok(Runner::new(cfg.app.name.as_str(), dispatcher, sessions))
}

/// 按配置组装 Runner
pub fn build_runner(cfg: &AppConfig) -> Result<Runner, AgentError> {
    build_runner_with(
        cfg,
        create_backend_from_config(cfg),
        create_weather_provider_from_config(cfg),
    )
}

/// 新会话的初始状态（单位偏好）
pub fn initial_state_from_config(cfg: &AppConfig) -> SessionState {
    [(UNIT_PREFERENCE_KEY, cfg.session.unit_preference.as_str())]
        .into_iter()
        .collect()
}
