//! 分派层：推理后端（LLM / 规则意图）、单轮流水线与过程事件

pub mod dispatcher;
pub mod events;
pub mod intent;
pub mod planner;

pub use dispatcher::Dispatcher;
pub use events::{GuardrailStage, TurnEvent};
pub use intent::{Intent, IntentBackend, IntentClassifier};
pub use planner::{parse_llm_output, BackendReply, LlmBackend, ReasoningBackend, ToolCall};
