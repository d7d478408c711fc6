//! 护栏：在两个注入点拦截流水线
//!
//! - 推理前（ModelGuardrailChain）：拿到完整历史，可直接给出终止回复，本轮不再调用推理后端；
//! - 工具前（ToolGuardrailChain）：拿到工具名与参数，可给出 error 形态的 ToolResult 代替执行。
//!
//! 链按注册顺序求值，第一个 Terminal 决定结果，其余护栏与被拦截的动作都不再执行。
//! 触发的护栏对会话状态的写入（审计标记）会保留。

pub mod keyword;
pub mod tool_args;

use std::sync::Arc;

use serde_json::Value;

use crate::memory::Message;
use crate::session::SessionState;
use crate::tools::ToolResult;

pub use keyword::BlockedKeywordGuardrail;
pub use tool_args::BlockedArgumentGuardrail;

/// 护栏决定：放行，或以终止结果替换本步的正常处理
#[derive(Clone, Debug, PartialEq)]
pub enum GuardrailDecision<T> {
    Pass,
    Terminal(T),
}

impl<T> GuardrailDecision<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GuardrailDecision::Terminal(_))
    }
}

/// 推理前护栏
pub trait ModelGuardrail: Send + Sync {
    fn name(&self) -> &str;

    fn before_model(
        &self,
        history: &[Message],
        state: &mut SessionState,
    ) -> GuardrailDecision<String>;
}

/// 工具前护栏
pub trait ToolGuardrail: Send + Sync {
    fn name(&self) -> &str;

    fn before_tool(
        &self,
        tool_name: &str,
        args: &Value,
        state: &mut SessionState,
    ) -> GuardrailDecision<ToolResult>;
}

/// 推理前护栏链
#[derive(Clone, Default)]
pub struct ModelGuardrailChain {
    guardrails: Vec<Arc<dyn ModelGuardrail>>,
}

impl ModelGuardrailChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, guardrail: impl ModelGuardrail + 'static) -> Self {
        self.push(Arc::new(guardrail));
        self
    }

    pub fn push(&mut self, guardrail: Arc<dyn ModelGuardrail>) {
        self.guardrails.push(guardrail);
    }

    pub fn len(&self) -> usize {
        self.guardrails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guardrails.is_empty()
    }

    pub fn evaluate(&self, history: &[Message], state: &mut SessionState) -> GuardrailDecision<String> {
        for guardrail in &self.guardrails {
            if let GuardrailDecision::Terminal(response) = guardrail.before_model(history, state) {
                tracing::warn!(guardrail = guardrail.name(), "Model guardrail fired");
                return GuardrailDecision::Terminal(response);
            }
        }
        GuardrailDecision::Pass
    }
}

/// 工具前护栏链
#[derive(Clone, Default)]
pub struct ToolGuardrailChain {
    guardrails: Vec<Arc<dyn ToolGuardrail>>,
}

impl ToolGuardrailChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, guardrail: impl ToolGuardrail + 'static) -> Self {
        self.push(Arc::new(guardrail));
        self
    }

    pub fn push(&mut self, guardrail: Arc<dyn ToolGuardrail>) {
        self.guardrails.push(guardrail);
    }

    pub fn len(&self) -> usize {
        self.guardrails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guardrails.is_empty()
    }

    pub fn evaluate(
        &self,
        tool_name: &str,
        args: &Value,
        state: &mut SessionState,
    ) -> GuardrailDecision<ToolResult> {
        for guardrail in &self.guardrails {
            if let GuardrailDecision::Terminal(result) = guardrail.before_tool(tool_name, args, state) {
                tracing::warn!(guardrail = guardrail.name(), tool = %tool_name, "Tool guardrail fired");
                return GuardrailDecision::Terminal(result);
            }
        }
        GuardrailDecision::Pass
    }
}
