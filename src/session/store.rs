//! 会话存储
//!
//! 以 (app_name, user_id, session_id) 三元组定位会话；每个会话放在独立的 Mutex 后面，
//! Dispatcher 在整轮对话期间持有该锁，从而同一会话的轮次严格串行，不同会话互不阻塞。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::state::{SessionState, StateValue};
use crate::core::AgentError;
use crate::memory::{ConversationMemory, Message};

/// 会话定位键
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// 单个会话：状态 + 对话历史
#[derive(Clone, Debug)]
pub struct Session {
    pub key: SessionKey,
    pub state: SessionState,
    pub history: ConversationMemory,
    pub created_at: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

impl Session {
    pub fn new(key: SessionKey, state: SessionState, max_context_turns: usize) -> Self {
        let now = Utc::now();
        Self {
            key,
            state,
            history: ConversationMemory::new(max_context_turns),
            created_at: now,
            last_update_time: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.key.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.key.user_id
    }

    /// 追加消息并刷新最后活跃时间
    pub fn push_message(&mut self, message: Message) {
        self.history.push(message);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_update_time = Utc::now();
    }
}

/// 会话存储接口
#[async_trait]
pub trait SessionService: Send + Sync {
    /// 创建会话；session_id 为 None 时自动生成。三元组已存在时返回 DuplicateSession
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
        initial_state: SessionState,
    ) -> Result<Session, AgentError>;

    /// 获取会话快照
    async fn get_session(&self, key: &SessionKey) -> Result<Session, AgentError>;

    /// 获取会话独占句柄（持有期间同一会话的其它访问会等待）
    async fn lock_session(&self, key: &SessionKey) -> Result<OwnedMutexGuard<Session>, AgentError>;

    /// 读取状态键，不存在时返回 default
    async fn get_state(
        &self,
        key: &SessionKey,
        state_key: &str,
        default: StateValue,
    ) -> Result<StateValue, AgentError>;

    /// 写入状态键
    async fn set_state(
        &self,
        key: &SessionKey,
        state_key: &str,
        value: StateValue,
    ) -> Result<(), AgentError>;

    /// 列出某用户在某应用下的所有会话
    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Vec<SessionKey>;

    async fn delete_session(&self, key: &SessionKey) -> Result<(), AgentError>;
}

/// 内存会话存储：进程存活期间有效，不做外部持久化
pub struct InMemorySessionService {
    sessions: RwLock<HashMap<SessionKey, Arc<Mutex<Session>>>>,
    max_context_turns: usize,
}

impl InMemorySessionService {
    pub fn new(max_context_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_context_turns,
        }
    }

    async fn handle(&self, key: &SessionKey) -> Result<Arc<Mutex<Session>>, AgentError> {
        self.sessions
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| AgentError::UnknownSession(key.to_string()))
    }
}

impl Default for InMemorySessionService {
    fn default() -> Self {
        Self::new(20)
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
        initial_state: SessionState,
    ) -> Result<Session, AgentError> {
        let session_id = session_id
            .map(String::from)
            .unwrap_or_else(|| format!("session_{}", uuid::Uuid::new_v4()));
        let key = SessionKey::new(app_name, user_id, session_id);

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&key) {
            return Err(AgentError::DuplicateSession(key.to_string()));
        }
        let session = Session::new(key.clone(), initial_state, self.max_context_turns);
        sessions.insert(key.clone(), Arc::new(Mutex::new(session.clone())));
        tracing::info!(session = %key, "Session created");
        Ok(session)
    }

    async fn get_session(&self, key: &SessionKey) -> Result<Session, AgentError> {
        let handle = self.handle(key).await?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    async fn lock_session(&self, key: &SessionKey) -> Result<OwnedMutexGuard<Session>, AgentError> {
        let handle = self.handle(key).await?;
        Ok(handle.lock_owned().await)
    }

    async fn get_state(
        &self,
        key: &SessionKey,
        state_key: &str,
        default: StateValue,
    ) -> Result<StateValue, AgentError> {
        let handle = self.handle(key).await?;
        let session = handle.lock().await;
        Ok(session.state.get_or(state_key, default))
    }

    async fn set_state(
        &self,
        key: &SessionKey,
        state_key: &str,
        value: StateValue,
    ) -> Result<(), AgentError> {
        let handle = self.handle(key).await?;
        let mut session = handle.lock().await;
        session.state.set(state_key, value);
        session.touch();
        Ok(())
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Vec<SessionKey> {
        self.sessions
            .read()
            .await
            .keys()
            .filter(|k| k.app_name == app_name && k.user_id == user_id)
            .cloned()
            .collect()
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<(), AgentError> {
        self.sessions
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| AgentError::UnknownSession(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn initial() -> SessionState {
        [("unit_preference", "Celsius")].into_iter().collect()
    }

    #[tokio::test]
    async fn test_create_and_read_state() {
        let store = InMemorySessionService::default();
        let session = store
            .create_session("app", "user_1", Some("s1"), initial())
            .await
            .unwrap();
        assert_eq!(session.id(), "s1");

        let key = SessionKey::new("app", "user_1", "s1");
        let unit = store
            .get_state(&key, "unit_preference", "Fahrenheit".into())
            .await
            .unwrap();
        assert_eq!(unit, StateValue::Text("Celsius".into()));

        let missing = store
            .get_state(&key, "last_city_checked", "none".into())
            .await
            .unwrap();
        assert_eq!(missing, StateValue::Text("none".into()));
    }

    #[tokio::test]
    async fn test_duplicate_session_rejected() {
        let store = InMemorySessionService::default();
        store
            .create_session("app", "user_1", Some("s1"), initial())
            .await
            .unwrap();
        let err = store
            .create_session("app", "user_1", Some("s1"), SessionState::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::DuplicateSession(_)));

        // 同 id 不同用户是不同会话
        assert!(store
            .create_session("app", "user_2", Some("s1"), SessionState::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_generated_session_id() {
        let store = InMemorySessionService::default();
        let session = store
            .create_session("app", "user_1", None, SessionState::new())
            .await
            .unwrap();
        assert!(session.id().starts_with("session_"));
        assert_eq!(store.list_sessions("app", "user_1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let store = InMemorySessionService::default();
        let key = SessionKey::new("app", "nobody", "missing");
        assert!(matches!(
            store.get_session(&key).await,
            Err(AgentError::UnknownSession(_))
        ));
        assert!(matches!(
            store.set_state(&key, "k", true.into()).await,
            Err(AgentError::UnknownSession(_))
        ));
        assert!(store.delete_session(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_lock_serializes_same_session() {
        let store = Arc::new(InMemorySessionService::default());
        store
            .create_session("app", "u", Some("s"), SessionState::new())
            .await
            .unwrap();
        let key = SessionKey::new("app", "u", "s");

        let mut guard = store.lock_session(&key).await.unwrap();

        let reader = {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .get_state(&key, "last_city_checked", "none".into())
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());
        guard.state.set("last_city_checked", "London");
        drop(guard);

        assert_eq!(reader.await.unwrap(), StateValue::Text("London".into()));
    }

    #[tokio::test]
    async fn test_other_sessions_not_blocked() {
        let store = InMemorySessionService::default();
        store
            .create_session("app", "u", Some("a"), SessionState::new())
            .await
            .unwrap();
        store
            .create_session("app", "u", Some("b"), SessionState::new())
            .await
            .unwrap();

        let _held = store
            .lock_session(&SessionKey::new("app", "u", "a"))
            .await
            .unwrap();
        let other = tokio::time::timeout(
            Duration::from_millis(200),
            store.set_state(&SessionKey::new("app", "u", "b"), "k", true.into()),
        )
        .await;
        assert!(matches!(other, Ok(Ok(()))));
    }
}
