//! 关键词护栏（推理前）
//!
//! 从历史末尾找到最近一条用户消息，若其文本（大小写不敏感）包含任一屏蔽词，
//! 写入审计标记并返回固定的拒绝回复。

use super::{GuardrailDecision, ModelGuardrail};
use crate::memory::{last_user_message, Message};
use crate::session::{SessionState, GUARDRAIL_TRIGGERED_KEY};

pub struct BlockedKeywordGuardrail {
    /// 已转为大写的屏蔽词
    keywords: Vec<String>,
    flag_key: String,
}

impl BlockedKeywordGuardrail {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_uppercase())
                .filter(|k| !k.is_empty())
                .collect(),
            flag_key: GUARDRAIL_TRIGGERED_KEY.to_string(),
        }
    }

    /// 自定义审计标记键
    pub fn with_flag_key(mut self, key: impl Into<String>) -> Self {
        self.flag_key = key.into();
        self
    }

    fn matched_keyword(&self, text: &str) -> Option<&str> {
        let upper = text.to_uppercase();
        self.keywords
            .iter()
            .find(|k| upper.contains(k.as_str()))
            .map(String::as_str)
    }

    pub fn refusal(keyword: &str) -> String {
        format!(
            "I cannot process this request because it contains the blocked keyword '{}'.",
            keyword
        )
    }
}

impl ModelGuardrail for BlockedKeywordGuardrail {
    fn name(&self) -> &str {
        "blocked_keyword"
    }

    fn before_model(
        &self,
        history: &[Message],
        state: &mut SessionState,
    ) -> GuardrailDecision<String> {
        let Some(last_user) = last_user_message(history) else {
            return GuardrailDecision::Pass;
        };
        match self.matched_keyword(&last_user.content) {
            Some(keyword) => {
                tracing::info!(keyword = %keyword, "Blocked keyword found in user message");
                state.set(self.flag_key.as_str(), true);
                GuardrailDecision::Terminal(Self::refusal(keyword))
            }
            None => GuardrailDecision::Pass,
        }
    }
}
