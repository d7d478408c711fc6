//! 端到端对话测试：规则意图后端 + 固定天气表，覆盖护栏、单位偏好、委派与升级

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use weather_agent::agent::Agent;
use weather_agent::config::AppConfig;
use weather_agent::core::{build_runner_with, initial_state_from_config, ConversationLoop, Runner};
use weather_agent::dispatch::{
    BackendReply, GuardrailStage, IntentBackend, LlmBackend, ReasoningBackend, ToolCall, TurnEvent,
};
use weather_agent::llm::MockLlmClient;
use weather_agent::memory::{Message, Role};
use weather_agent::session::{Session, SessionState};
use weather_agent::tools::{ToolResult, ToolSpec};
use weather_agent::weather::{
    OpenWeatherMapProvider, StaticWeatherProvider, WeatherError, WeatherProvider, WeatherReading,
};
use weather_agent::{AgentError, TurnResponse};

const USER: &str = "user_1";
const SESSION: &str = "session_001";

const PARIS_DENIAL: &str =
    "Policy restriction: Weather checks for 'Paris' are currently disabled by a tool guardrail.";
const BLOCK_REFUSAL: &str =
    "I cannot process this request because it contains the blocked keyword 'BLOCK'.";

/// 记录 fetch 次数的天气数据源
struct CountingProvider {
    inner: StaticWeatherProvider,
    calls: AtomicUsize,
}

impl CountingProvider {
    fn new(inner: StaticWeatherProvider) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherProvider for CountingProvider {
    async fn fetch(&self, city: &str) -> Result<WeatherReading, WeatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(city).await
    }
}

/// 记录 generate 次数的推理后端（委托给规则意图后端）
#[derive(Default)]
struct CountingBackend {
    inner: IntentBackend,
    calls: AtomicUsize,
}

impl CountingBackend {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningBackend for CountingBackend {
    async fn generate(
        &self,
        history: &[Message],
        agent: &Agent,
        tools: &[ToolSpec],
    ) -> Result<BackendReply, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.generate(history, agent, tools).await
    }

    async fn generate_with_tool_result(
        &self,
        history: &[Message],
        agent: &Agent,
        call: &ToolCall,
        result: &ToolResult,
    ) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .generate_with_tool_result(history, agent, call, result)
            .await
    }
}

/// 永不返回的后端，用于超时
struct HangingBackend;

#[async_trait]
impl ReasoningBackend for HangingBackend {
    async fn generate(
        &self,
        _history: &[Message],
        _agent: &Agent,
        _tools: &[ToolSpec],
    ) -> Result<BackendReply, AgentError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(BackendReply::Text("too late".into()))
    }

    async fn generate_with_tool_result(
        &self,
        _history: &[Message],
        _agent: &Agent,
        _call: &ToolCall,
        _result: &ToolResult,
    ) -> Result<String, AgentError> {
        Ok("too late".into())
    }
}

/// 每次推理前先睡一会，并记录每轮首次 generate 看到的 (最新用户消息, 历史长度)
#[derive(Default)]
struct SlowBackend {
    inner: IntentBackend,
    seen: std::sync::Mutex<Vec<(String, usize)>>,
}

impl SlowBackend {
    fn seen(&self) -> Vec<(String, usize)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningBackend for SlowBackend {
    async fn generate(
        &self,
        history: &[Message],
        agent: &Agent,
        tools: &[ToolSpec],
    ) -> Result<BackendReply, AgentError> {
        if agent.name == "weather_agent" {
            let latest = history.last().map(|m| m.content.clone()).unwrap_or_default();
            self.seen.lock().unwrap().push((latest, history.len()));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.generate(history, agent, tools).await
    }

    async fn generate_with_tool_result(
        &self,
        history: &[Message],
        agent: &Agent,
        call: &ToolCall,
        result: &ToolResult,
    ) -> Result<String, AgentError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner
            .generate_with_tool_result(history, agent, call, result)
            .await
    }
}

fn config(unit: &str) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.session.unit_preference = unit.to_string();
    cfg
}

async fn runner_with(
    cfg: &AppConfig,
    backend: Arc<dyn ReasoningBackend>,
    weather: Arc<dyn WeatherProvider>,
) -> Arc<Runner> {
    let runner = build_runner_with(cfg, backend, weather).unwrap();
    runner
        .create_session(USER, Some(SESSION), initial_state_from_config(cfg))
        .await
        .unwrap();
    Arc::new(runner)
}

async fn session(runner: &Runner) -> Session {
    runner
        .sessions()
        .get_session(&runner.session_key(USER, SESSION))
        .await
        .unwrap()
}

fn final_text(response: TurnResponse) -> String {
    match response {
        TurnResponse::Final(text) => text,
        TurnResponse::Escalated(reason) => panic!("unexpected escalation: {reason}"),
    }
}

#[tokio::test]
async fn test_demo_scenario() {
    let weather = CountingProvider::new(StaticWeatherProvider::demo());
    let cfg = config("Celsius");
    let runner = runner_with(&cfg, Arc::new(IntentBackend::new()), weather.clone()).await;
    let conversation = ConversationLoop::new(runner.clone(), USER, SESSION);

    let texts: Vec<String> = conversation
        .run(weather_agent::core::DEMO_QUERIES)
        .await
        .unwrap()
        .into_iter()
        .map(final_text)
        .collect();

    assert_eq!(texts[0], "Hello there!");
    assert_eq!(
        texts[1],
        "The weather in New York is Sunny with a temperature of 25.0°C."
    );
    assert!(texts[2].contains(PARIS_DENIAL));
    assert_eq!(
        texts[3],
        "The weather in London is Cloudy with a temperature of 15.0°C."
    );
    assert_eq!(texts[4], BLOCK_REFUSAL);
    assert_eq!(texts[5], "Goodbye! Have a great day.");

    // Paris 被拦截、BLOCK 轮不进推理：只有 New York 与 London 触达数据源
    assert_eq!(weather.calls(), 2);

    let s = session(&runner).await;
    assert_eq!(s.state.get_str_or("last_city_checked", ""), "London");
    assert_eq!(s.state.get_bool("guardrail_tool_block_triggered"), Some(true));
    assert_eq!(s.state.get_bool("guardrail_triggered"), Some(true));
    assert_eq!(
        s.state.get_str_or("last_weather_report", ""),
        "Goodbye! Have a great day."
    );
    assert_eq!(s.history.len(), 12);
}

#[tokio::test]
async fn test_blocked_keyword_skips_backend_in_any_case() {
    let backend = Arc::new(CountingBackend::default());
    let weather = CountingProvider::new(StaticWeatherProvider::demo());
    let runner = runner_with(&config("Celsius"), backend.clone(), weather.clone()).await;

    for text in ["BLOCK weather in Tokyo", "please block this", "unblocked?"] {
        let response = runner.submit(USER, SESSION, text).await.unwrap();
        assert_eq!(response, TurnResponse::Final(BLOCK_REFUSAL.into()));
    }
    assert_eq!(backend.calls(), 0);
    assert_eq!(weather.calls(), 0);

    let s = session(&runner).await;
    assert_eq!(s.state.get_bool("guardrail_triggered"), Some(true));
    assert!(!s.state.contains_key("last_city_checked"));
    // 拒绝回复由根 Agent 署名并写入历史
    let last = s.history.messages().last().unwrap();
    assert_eq!(last.author.as_deref(), Some("weather_agent"));
    assert_eq!(s.state.get_str_or("last_weather_report", ""), BLOCK_REFUSAL);
}

#[tokio::test]
async fn test_repeated_blocked_query_gives_same_refusal() {
    let backend = Arc::new(CountingBackend::default());
    let runner = runner_with(
        &config("Celsius"),
        backend.clone(),
        Arc::new(StaticWeatherProvider::demo()),
    )
    .await;

    for turn in 1..=2 {
        let response = runner
            .submit(USER, SESSION, "BLOCK weather in Tokyo")
            .await
            .unwrap();
        assert_eq!(response, TurnResponse::Final(BLOCK_REFUSAL.into()), "turn {turn}");

        let s = session(&runner).await;
        assert_eq!(s.state.get_bool("guardrail_triggered"), Some(true), "turn {turn}");
        assert_eq!(s.state.get_str_or("last_weather_report", ""), BLOCK_REFUSAL);
        assert_eq!(s.history.len(), turn * 2);
    }
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_paris_denied_without_fetch_in_any_case() {
    let weather = CountingProvider::new(StaticWeatherProvider::demo());
    let runner = runner_with(&config("Celsius"), Arc::new(IntentBackend::new()), weather.clone()).await;

    for text in ["What's the weather in Paris?", "weather in PARIS", "weather in paris"] {
        let text = final_text(runner.submit(USER, SESSION, text).await.unwrap());
        assert!(text.contains(PARIS_DENIAL), "got: {text}");
    }
    assert_eq!(weather.calls(), 0);

    let s = session(&runner).await;
    assert_eq!(s.state.get_bool("guardrail_tool_block_triggered"), Some(true));
    assert!(!s.state.contains_key("last_city_checked"));
}

#[tokio::test]
async fn test_fahrenheit_preference_rounds_up() {
    let weather = CountingProvider::new(
        StaticWeatherProvider::demo().with_reading("Oslo", 20.3, "overcast clouds"),
    );
    let runner = runner_with(&config("Fahrenheit"), Arc::new(IntentBackend::new()), weather).await;

    let ny = final_text(
        runner
            .submit(USER, SESSION, "What's the weather in New York?")
            .await
            .unwrap(),
    );
    assert_eq!(ny, "The weather in New York is Sunny with a temperature of 77°F.");

    let oslo = final_text(runner.submit(USER, SESSION, "weather in Oslo").await.unwrap());
    assert_eq!(
        oslo,
        "The weather in Oslo is Overcast clouds with a temperature of 69°F."
    );
}

#[tokio::test]
async fn test_unit_preference_change_applies_to_next_turn() {
    let runner = runner_with(
        &config("Celsius"),
        Arc::new(IntentBackend::new()),
        Arc::new(StaticWeatherProvider::demo()),
    )
    .await;

    let first = final_text(runner.submit(USER, SESSION, "weather in Tokyo").await.unwrap());
    assert!(first.ends_with("18.0°C."));

    runner
        .sessions()
        .set_state(
            &runner.session_key(USER, SESSION),
            "unit_preference",
            "Fahrenheit".into(),
        )
        .await
        .unwrap();

    let second = final_text(runner.submit(USER, SESSION, "weather in Tokyo").await.unwrap());
    assert!(second.ends_with("65°F."), "got: {second}");
}

#[tokio::test]
async fn test_greeting_and_farewell_never_touch_weather() {
    let weather = CountingProvider::new(StaticWeatherProvider::demo());
    let runner = runner_with(&config("Celsius"), Arc::new(IntentBackend::new()), weather.clone()).await;

    let hello = final_text(
        runner
            .submit(USER, SESSION, "Hi, my name is Ada.")
            .await
            .unwrap(),
    );
    assert_eq!(hello, "Hello, Ada!");
    let bye = final_text(runner.submit(USER, SESSION, "Goodbye").await.unwrap());
    assert_eq!(bye, "Goodbye! Have a great day.");

    assert_eq!(weather.calls(), 0);
    let s = session(&runner).await;
    assert!(!s.state.contains_key("last_city_checked"));
    let authors: Vec<_> = s
        .history
        .messages()
        .iter()
        .filter(|m| m.role == Role::Agent)
        .filter_map(|m| m.author.clone())
        .collect();
    assert_eq!(authors, vec!["greeting_agent", "farewell_agent"]);
}

#[tokio::test]
async fn test_last_city_only_tracks_successful_lookups() {
    let runner = runner_with(
        &config("Celsius"),
        Arc::new(IntentBackend::new()),
        Arc::new(StaticWeatherProvider::demo()),
    )
    .await;

    runner.submit(USER, SESSION, "weather in London").await.unwrap();
    // 固定表中不存在的城市：工具失败，不覆盖
    let text = final_text(runner.submit(USER, SESSION, "weather in Atlantis").await.unwrap());
    assert!(text.starts_with("Sorry, I couldn't complete that:"));
    runner.submit(USER, SESSION, "weather in Paris").await.unwrap();

    let s = session(&runner).await;
    assert_eq!(s.state.get_str_or("last_city_checked", ""), "London");

    runner.submit(USER, SESSION, "weather in Tokyo").await.unwrap();
    let s = session(&runner).await;
    assert_eq!(s.state.get_str_or("last_city_checked", ""), "Tokyo");
}

#[tokio::test]
async fn test_missing_api_key_is_tool_error_not_failure() {
    let runner = runner_with(
        &config("Celsius"),
        Arc::new(IntentBackend::new()),
        Arc::new(OpenWeatherMapProvider::new(None, None, 5)),
    )
    .await;

    let text = final_text(runner.submit(USER, SESSION, "weather in London").await.unwrap());
    assert_eq!(
        text,
        "Sorry, I couldn't complete that: OpenWeatherMap API key not set in .env."
    );
    assert!(!session(&runner).await.state.contains_key("last_city_checked"));
}

#[tokio::test]
async fn test_unknown_session_is_error() {
    let runner = runner_with(
        &config("Celsius"),
        Arc::new(IntentBackend::new()),
        Arc::new(StaticWeatherProvider::demo()),
    )
    .await;

    let err = runner.submit(USER, "no_such_session", "Hello!").await.unwrap_err();
    assert!(matches!(err, AgentError::UnknownSession(_)));
    let err = runner.submit("someone_else", SESSION, "Hello!").await.unwrap_err();
    assert!(matches!(err, AgentError::UnknownSession(_)));
}

#[tokio::test]
async fn test_duplicate_session_is_error() {
    let runner = runner_with(
        &config("Celsius"),
        Arc::new(IntentBackend::new()),
        Arc::new(StaticWeatherProvider::demo()),
    )
    .await;
    let err = runner
        .create_session(USER, Some(SESSION), SessionState::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::DuplicateSession(_)));
}

#[tokio::test]
async fn test_llm_backend_scripted_tool_round_trip() {
    let mock = Arc::new(
        MockLlmClient::new()
            .with_reply(r#"{"tool": "get_weather", "args": {"city": "London"}}"#)
            .with_reply("It's cloudy in London, about 15 degrees."),
    );
    let runner = runner_with(
        &config("Celsius"),
        Arc::new(LlmBackend::new(mock.clone())),
        Arc::new(StaticWeatherProvider::demo()),
    )
    .await;

    let text = final_text(
        runner
            .submit(USER, SESSION, "What's it like in London?")
            .await
            .unwrap(),
    );
    assert_eq!(text, "It's cloudy in London, about 15 degrees.");
    assert_eq!(mock.call_count(), 2);
    // 第二次调用看到的是真实工具结果
    assert!(mock.prompts()[1].contains("The weather in London is Cloudy"));
    assert_eq!(
        session(&runner).await.state.get_str_or("last_city_checked", ""),
        "London"
    );
}

#[tokio::test]
async fn test_backend_failure_escalates_without_persisting() {
    let mock = Arc::new(MockLlmClient::new().with_error("503 Service Unavailable"));
    let runner = runner_with(
        &config("Celsius"),
        Arc::new(LlmBackend::new(mock)),
        Arc::new(StaticWeatherProvider::demo()),
    )
    .await;

    let response = runner.submit(USER, SESSION, "weather in London").await.unwrap();
    assert!(response.is_escalated());
    assert_eq!(
        response.display_text(),
        "Agent escalated: LLM error: 503 Service Unavailable"
    );

    let s = session(&runner).await;
    assert!(!s.state.contains_key("last_weather_report"));
    assert_eq!(s.history.len(), 1);
    assert_eq!(s.history.messages()[0].role, Role::User);
}

#[tokio::test(start_paused = true)]
async fn test_backend_timeout_escalates() {
    let mut cfg = config("Celsius");
    cfg.llm.timeouts.request = 2;
    let runner = runner_with(
        &cfg,
        Arc::new(HangingBackend),
        Arc::new(StaticWeatherProvider::demo()),
    )
    .await;

    let response = runner.submit(USER, SESSION, "Hello!").await.unwrap();
    assert_eq!(response, TurnResponse::Escalated("LLM timeout after 2s".into()));
}

#[tokio::test]
async fn test_events_report_tool_denial() {
    let runner = runner_with(
        &config("Celsius"),
        Arc::new(IntentBackend::new()),
        Arc::new(StaticWeatherProvider::demo()),
    )
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    runner
        .submit_with_events(USER, SESSION, "weather in Paris", tx)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    assert!(events.iter().any(|e| matches!(
        e,
        TurnEvent::GuardrailBlocked { stage: GuardrailStage::BeforeTool, detail } if detail == PARIS_DENIAL
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::ToolResult { success: false, .. })));
    assert!(matches!(events.last(), Some(TurnEvent::FinalResponse { .. })));
}

#[tokio::test]
async fn test_sessions_are_isolated_and_concurrent() {
    let cfg = config("Celsius");
    let runner = Arc::new(
        build_runner_with(
            &cfg,
            Arc::new(IntentBackend::new()),
            Arc::new(StaticWeatherProvider::demo()),
        )
        .unwrap(),
    );
    runner
        .create_session("alice", Some("a"), initial_state_from_config(&cfg))
        .await
        .unwrap();
    runner
        .create_session("bob", Some("b"), initial_state_from_config(&cfg))
        .await
        .unwrap();

    let alice = ConversationLoop::new(runner.clone(), "alice", "a");
    let bob = ConversationLoop::new(runner.clone(), "bob", "b");
    let (a, b) = tokio::join!(
        alice.run(["weather in London", "BLOCK this"]),
        bob.run(["weather in Tokyo", "bye"]),
    );
    assert_eq!(a.unwrap().len(), 2);
    assert_eq!(b.unwrap().len(), 2);

    let sa = runner.sessions().get_session(&alice.session_key()).await.unwrap();
    let sb = runner.sessions().get_session(&bob.session_key()).await.unwrap();
    assert_eq!(sa.state.get_str_or("last_city_checked", ""), "London");
    assert_eq!(sb.state.get_str_or("last_city_checked", ""), "Tokyo");
    assert_eq!(sa.state.get_bool("guardrail_triggered"), Some(true));
    assert!(!sb.state.contains_key("guardrail_triggered"));
}

#[tokio::test(start_paused = true)]
async fn test_same_session_turns_are_serialized() {
    let backend = Arc::new(SlowBackend::default());
    let runner = runner_with(
        &config("Celsius"),
        backend.clone(),
        Arc::new(StaticWeatherProvider::demo()),
    )
    .await;

    let (first, second) = tokio::join!(
        runner.submit(USER, SESSION, "weather in London"),
        runner.submit(USER, SESSION, "weather in Tokyo"),
    );
    final_text(first.unwrap());
    final_text(second.unwrap());

    let s = session(&runner).await;
    let roles: Vec<Role> = s.history.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Agent, Role::User, Role::Agent]);

    // 无论哪一轮先拿到会话，后一轮都必须看到前一轮完整的 user + agent 消息
    let seen = backend.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1, 1);
    assert_eq!(seen[1].1, 3);
    assert_eq!(seen[0].0, s.history.messages()[0].content);
    assert_eq!(seen[1].0, s.history.messages()[2].content);

    let (earlier_city, later_city) = if seen[0].0.contains("London") {
        ("London", "Tokyo")
    } else {
        ("Tokyo", "London")
    };
    assert!(s.history.messages()[1].content.contains(earlier_city));
    assert!(s.history.messages()[3].content.contains(later_city));
    assert_eq!(s.state.get_str_or("last_city_checked", ""), later_city);
}

#[tokio::test(start_paused = true)]
async fn test_follow_up_waits_for_previous_turn() {
    let backend = Arc::new(SlowBackend::default());
    let runner = runner_with(
        &config("Celsius"),
        backend.clone(),
        Arc::new(StaticWeatherProvider::demo()),
    )
    .await;

    // 后一轮是追问，只有在看到前一轮的天气提问后才会被识别为天气请求
    let submit_first = runner.submit(USER, SESSION, "What's the weather in London?");
    let submit_follow_up = async {
        tokio::task::yield_now().await;
        runner.submit(USER, SESSION, "How about Tokyo?").await
    };
    let (first, follow_up) = tokio::join!(submit_first, submit_follow_up);

    assert_eq!(
        final_text(first.unwrap()),
        "The weather in London is Cloudy with a temperature of 15.0°C."
    );
    assert_eq!(
        final_text(follow_up.unwrap()),
        "The weather in Tokyo is Light rain with a temperature of 18.0°C."
    );

    let s = session(&runner).await;
    assert_eq!(s.history.len(), 4);
    assert_eq!(s.state.get_str_or("last_city_checked", ""), "Tokyo");
    assert_eq!(backend.seen()[1], ("How about Tokyo?".to_string(), 3));
}
