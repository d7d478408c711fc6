//! Dispatcher：单轮流水线
//!
//! 用户消息入历史 -> 推理前护栏 -> 咨询根 Agent（可委派给子 Agent，仅限本轮）->
//! 若为工具调用则过工具前护栏再执行 -> 工具结果喂回推理后端得到最终文本 ->
//! 写入 output_key、追加 Agent 消息并返回。
//!
//! 推理后端失败或超时转为 TurnResponse::Escalated；未知工具 / 未知 Agent 是硬错误。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;

use super::events::{GuardrailStage, TurnEvent};
use super::planner::{BackendReply, ReasoningBackend, ToolCall};
use crate::agent::Agent;
use crate::core::{AgentError, TurnPhase, TurnResponse};
use crate::guardrail::{GuardrailDecision, ModelGuardrailChain, ToolGuardrailChain};
use crate::memory::Message;
use crate::session::Session;
use crate::tools::{ToolContext, ToolExecutor, ToolResult};

/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

pub struct Dispatcher {
    root: Agent,
    backend: Arc<dyn ReasoningBackend>,
    executor: ToolExecutor,
    model_guardrails: ModelGuardrailChain,
    tool_guardrails: ToolGuardrailChain,
    output_key: String,
    llm_timeout: Duration,
}

/// 单轮内的事件发送端（可选）
struct Events<'a>(Option<&'a UnboundedSender<TurnEvent>>);

impl Events<'_> {
    fn send(&self, ev: TurnEvent) {
        if let Some(tx) = self.0 {
            let _ = tx.send(ev);
        }
    }

    fn phase(&self, phase: TurnPhase) {
        tracing::debug!(phase = ?phase, "turn phase");
        self.send(TurnEvent::Phase { phase });
    }
}

impl Dispatcher {
    /// 构建时校验 Agent 树（工具已注册、单层委派、名称唯一）
    pub fn new(
        root: Agent,
        backend: Arc<dyn ReasoningBackend>,
        executor: ToolExecutor,
    ) -> Result<Self, AgentError> {
        root.validate(executor.registry())?;
        Ok(Self {
            root,
            backend,
            executor,
            model_guardrails: ModelGuardrailChain::new(),
            tool_guardrails: ToolGuardrailChain::new(),
            output_key: "last_response".to_string(),
            llm_timeout: Duration::from_secs(60),
        })
    }

    pub fn with_model_guardrails(mut self, chain: ModelGuardrailChain) -> Self {
        self.model_guardrails = chain;
        self
    }

    pub fn with_tool_guardrails(mut self, chain: ToolGuardrailChain) -> Self {
        self.tool_guardrails = chain;
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn with_llm_timeout(mut self, secs: u64) -> Self {
        self.llm_timeout = Duration::from_secs(secs.max(1));
        self
    }

    pub fn root(&self) -> &Agent {
        &self.root
    }

    pub fn output_key(&self) -> &str {
        &self.output_key
    }

    /// 执行一轮；调用方须持有该会话的独占句柄
    pub async fn run_turn(
        &self,
        session: &mut Session,
        user_text: &str,
        event_tx: Option<&UnboundedSender<TurnEvent>>,
    ) -> Result<TurnResponse, AgentError> {
        let events = Events(event_tx);
        events.phase(TurnPhase::Received);
        tracing::info!(session = %session.key, "Turn received");
        session.push_message(Message::user(user_text));

        events.phase(TurnPhase::GuardrailCheck);
        if let GuardrailDecision::Terminal(text) = self
            .model_guardrails
            .evaluate(session.history.messages(), &mut session.state)
        {
            events.send(TurnEvent::GuardrailBlocked {
                stage: GuardrailStage::BeforeModel,
                detail: text.clone(),
            });
            return Ok(self.respond(session, &self.root.name, text, &events));
        }

        events.phase(TurnPhase::Reasoning);
        let reply = match self.generate(session.history.context(), &self.root).await {
            Ok(r) => r,
            Err(e) if e.is_backend_failure() => return Ok(self.escalate(e.to_string(), &events)),
            Err(e) => return Err(e),
        };

        // 委派只在本轮有效：active 是局部变量，下一轮重新从根开始
        let (active, reply) = match reply {
            BackendReply::Transfer(target) => {
                let child = self.root.resolve_child(&target)?;
                tracing::info!(from = %self.root.name, to = %child.name, "Transfer");
                events.send(TurnEvent::Transfer {
                    from: self.root.name.clone(),
                    to: child.name.clone(),
                });
                match self.generate(session.history.context(), child).await {
                    Ok(BackendReply::Transfer(nested)) => {
                        return Ok(self.escalate(
                            format!(
                                "agent '{}' attempted to transfer to '{}', but delegation is single-level",
                                child.name, nested
                            ),
                            &events,
                        ));
                    }
                    Ok(r) => (child, r),
                    Err(e) if e.is_backend_failure() => {
                        return Ok(self.escalate(e.to_string(), &events))
                    }
                    Err(e) => return Err(e),
                }
            }
            other => (&self.root, other),
        };

        let text = match reply {
            BackendReply::Text(text) => text,
            BackendReply::ToolCall(call) => {
                let result = self.run_tool(session, active, &call, &events).await?;
                events.phase(TurnPhase::Reasoning);
                let fut = self.backend.generate_with_tool_result(
                    session.history.context(),
                    active,
                    &call,
                    &result,
                );
                match timeout(self.llm_timeout, fut).await {
                    Ok(Ok(text)) => text,
                    Ok(Err(e)) if e.is_backend_failure() => {
                        return Ok(self.escalate(e.to_string(), &events))
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        let e = AgentError::LlmTimeout(self.llm_timeout.as_secs());
                        return Ok(self.escalate(e.to_string(), &events));
                    }
                }
            }
            BackendReply::Transfer(target) => {
                return Ok(self.escalate(format!("unexpected transfer to '{}'", target), &events))
            }
        };

        Ok(self.respond(session, &active.name, text, &events))
    }

    /// 调用推理后端（带超时），工具集限定为该 Agent 的工具
    async fn generate(
        &self,
        history: &[Message],
        agent: &Agent,
    ) -> Result<BackendReply, AgentError> {
        let tools = self.executor.registry().specs_for(&agent.tools)?;
        match timeout(self.llm_timeout, self.backend.generate(history, agent, &tools)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::LlmTimeout(self.llm_timeout.as_secs())),
        }
    }

    /// 工具前护栏 + 执行；返回送回推理后端的 ToolResult
    async fn run_tool(
        &self,
        session: &mut Session,
        agent: &Agent,
        call: &ToolCall,
        events: &Events<'_>,
    ) -> Result<ToolResult, AgentError> {
        events.phase(TurnPhase::ToolRequested);
        if !agent.has_tool(&call.tool) {
            tracing::error!(agent = %agent.name, tool = %call.tool, "Tool not available to agent");
            return Err(AgentError::UnknownTool(call.tool.clone()));
        }
        events.send(TurnEvent::ToolCall {
            agent: agent.name.clone(),
            tool: call.tool.clone(),
            args: call.args.clone(),
        });

        events.phase(TurnPhase::GuardrailCheck);
        let result = match self
            .tool_guardrails
            .evaluate(&call.tool, &call.args, &mut session.state)
        {
            GuardrailDecision::Terminal(denied) => {
                events.phase(TurnPhase::ToolDenied);
                events.send(TurnEvent::GuardrailBlocked {
                    stage: GuardrailStage::BeforeTool,
                    detail: denied.summary(),
                });
                denied
            }
            GuardrailDecision::Pass => {
                events.phase(TurnPhase::ToolExec);
                let mut ctx = ToolContext::new(&agent.name, &mut session.state);
                self.executor.execute(&call.tool, &call.args, &mut ctx).await?
            }
        };
        session.touch();

        events.send(TurnEvent::ToolResult {
            tool: call.tool.clone(),
            success: result.is_success(),
            preview: preview(&result.summary()),
        });
        Ok(result)
    }

    /// 写入 output_key 与历史，返回最终回复
    fn respond(
        &self,
        session: &mut Session,
        author: &str,
        text: String,
        events: &Events<'_>,
    ) -> TurnResponse {
        session.state.set(self.output_key.as_str(), text.clone());
        session.push_message(Message::agent(author, text.clone()));
        events.phase(TurnPhase::Responded);
        events.send(TurnEvent::FinalResponse {
            author: author.to_string(),
            text: text.clone(),
        });
        tracing::info!(session = %session.key, author = %author, "Turn responded");
        TurnResponse::Final(text)
    }

    fn escalate(&self, reason: String, events: &Events<'_>) -> TurnResponse {
        tracing::warn!(reason = %reason, "Turn escalated");
        events.phase(TurnPhase::Responded);
        events.send(TurnEvent::Escalated {
            reason: reason.clone(),
        });
        TurnResponse::Escalated(reason)
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > RESULT_PREVIEW_CHARS {
        format!("{}...", s.chars().take(RESULT_PREVIEW_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}
