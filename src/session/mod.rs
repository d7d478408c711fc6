//! 会话层：会话状态映射与会话存储

pub mod state;
pub mod store;

pub use state::{SessionState, StateValue};
pub use store::{InMemorySessionService, Session, SessionKey, SessionService};

/// 温度单位偏好
pub const UNIT_PREFERENCE_KEY: &str = "unit_preference";
/// 最近一次成功查询的城市
pub const LAST_CITY_CHECKED_KEY: &str = "last_city_checked";
/// 推理前护栏触发标记
pub const GUARDRAIL_TRIGGERED_KEY: &str = "guardrail_triggered";
/// 工具前护栏触发标记
pub const TOOL_GUARDRAIL_TRIGGERED_KEY: &str = "guardrail_tool_block_triggered";
