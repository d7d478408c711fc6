//! 核心编排层：错误、单轮状态、Runner 与对话循环

pub mod error;
pub mod orchestrator;
pub mod state;

pub use error::AgentError;
pub use orchestrator::{
    build_runner, build_runner_with, create_backend_from_config, create_guardrails_from_config,
    create_weather_provider_from_config, initial_state_from_config, ConversationLoop, Runner,
    DEMO_QUERIES,
};
pub use state::{TurnPhase, TurnResponse};
