//! Session and client stores
//!
//! Two independent concurrent maps keyed by session id: one for session
//! state, one for the backend transport serving that session. All transport
//! teardown goes through [`SessionRegistry::delete_client`], which closes the
//! transport before removing it; handles fetched with
//! [`SessionRegistry::get_client`] must never be closed directly.
//!
//! A third map holds the event stream of the session's current streaming
//! exchange. Backend notifications for the session are written there.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mcprouter_client::Client;
use tracing::{debug, info, trace, warn};

use crate::sse::{EVENT_JSONRPC, SseWriter};

/// State of one client session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session id handed to the client
    pub id: String,
    /// Backend this session is bound to
    pub server_key: String,
    /// Client implementation name from `initialize`
    pub client_name: String,
    /// Client implementation version from `initialize`
    pub client_version: String,
    /// Protocol revision the client requested
    pub protocol_version: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last time a request used this session
    pub last_seen: DateTime<Utc>,
}

impl Session {
    /// New session bound to `server_key`
    pub fn new(id: impl Into<String>, server_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            server_key: server_key.into(),
            client_name: String::new(),
            client_version: String::new(),
            protocol_version: String::new(),
            created_at: now,
            last_seen: now,
        }
    }

    /// Mark the session as used now
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

/// Concurrent session and client stores
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    clients: DashMap<String, Arc<dyn Client>>,
    streams: DashMap<String, SseWriter>,
}

impl SessionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Session state for `key`
    pub fn get_session(&self, key: &str) -> Option<Session> {
        self.sessions.get(key).map(|s| s.value().clone())
    }

    /// Store session state, replacing any previous entry
    pub fn store_session(&self, key: impl Into<String>, session: Session) {
        self.sessions.insert(key.into(), session);
    }

    /// Remove session state only; the session's transport is untouched
    pub fn delete_session(&self, key: &str) -> Option<Session> {
        self.sessions.remove(key).map(|(_, session)| session)
    }

    /// Refresh `last_seen`; returns whether the session exists
    pub fn touch_session(&self, key: &str) -> bool {
        match self.sessions.get_mut(key) {
            Some(mut session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Transport for `key`
    pub fn get_client(&self, key: &str) -> Option<Arc<dyn Client>> {
        self.clients.get(key).map(|c| Arc::clone(c.value()))
    }

    /// Store a transport, replacing any previous entry
    ///
    /// A replaced transport is not closed here; it is released when its last
    /// handle drops.
    pub fn store_client(&self, key: impl Into<String>, client: Arc<dyn Client>) {
        let key = key.into();
        if self.clients.insert(key.clone(), client).is_some() {
            debug!(session_id = %key, "replaced stored client");
        }
    }

    /// Route backend notifications for `key` to `writer` until detached
    ///
    /// A later attach replaces the earlier stream.
    pub fn attach_stream(&self, key: impl Into<String>, writer: SseWriter) {
        self.streams.insert(key.into(), writer);
    }

    /// Stop routing notifications for `key` to `writer`
    ///
    /// A stream attached since by another exchange stays in place.
    pub fn detach_stream(&self, key: &str, writer: &SseWriter) {
        self.streams
            .remove_if(key, |_, stored| stored.same_stream(writer));
    }

    /// Write a backend notification to the session's attached stream
    ///
    /// Returns whether it was written. Without an attached stream, or when
    /// the stream cannot take it, the notification is dropped.
    pub fn forward_notification(&self, key: &str, line: &[u8]) -> bool {
        let Some(writer) = self.streams.get(key).map(|w| w.value().clone()) else {
            trace!(session_id = %key, "notification dropped: no active stream");
            return false;
        };
        match writer.try_send_event_data(EVENT_JSONRPC, String::from_utf8_lossy(line)) {
            Ok(()) => true,
            Err(e) => {
                debug!(session_id = %key, error = %e, "notification dropped");
                false
            }
        }
    }

    /// Close the transport for `key`, then remove it
    ///
    /// Close errors are logged, not returned. Returns whether an entry existed.
    pub async fn delete_client(&self, key: &str) -> bool {
        let Some(client) = self.get_client(key) else {
            return false;
        };
        if let Err(e) = client.close().await {
            warn!(session_id = %key, error = %e, "failed to close client");
        }
        // Only remove the handle we closed; a concurrent store may have replaced it.
        self.clients
            .remove_if(key, |_, stored| Arc::ptr_eq(stored, &client));
        true
    }

    /// Close the session's transport and drop its state
    ///
    /// Returns whether anything was removed.
    pub async fn evict(&self, session_id: &str) -> bool {
        self.streams.remove(session_id);
        let had_client = self.delete_client(session_id).await;
        let had_session = self.delete_session(session_id).is_some();
        if had_client || had_session {
            info!(session_id = %session_id, "session evicted");
        }
        had_client || had_session
    }

    /// Evict every session; used on shutdown
    pub async fn close_all(&self) {
        let mut keys: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        keys.extend(self.clients.iter().map(|e| e.key().clone()));
        keys.sort_unstable();
        keys.dedup();
        for key in keys {
            self.evict(&key).await;
        }
    }

    /// Number of stored sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of stored transports
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("clients", &self.clients.len())
            .field("streams", &self.streams.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use mcprouter_client::{ClientError, ClientResult, NotificationHandler};
    use mcprouter_protocol::RequestId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingClient {
        closes: AtomicUsize,
        fail_close: bool,
    }

    #[async_trait]
    impl Client for CountingClient {
        fn error(&self) -> Option<ClientError> {
            None
        }

        async fn close(&self) -> ClientResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(ClientError::KilledAfterTimeout)
            } else {
                Ok(())
            }
        }

        fn on_notification(&self, _handler: NotificationHandler) {}

        async fn send_message(&self, _message: &[u8]) -> ClientResult<Option<Bytes>> {
            Ok(None)
        }

        fn next_request_id(&self) -> RequestId {
            RequestId::Number(0)
        }
    }

    #[test]
    fn test_session_store_overwrite_and_delete() {
        let registry = SessionRegistry::new();
        assert!(registry.get_session("s1").is_none());

        registry.store_session("s1", Session::new("s1", "weather"));
        registry.store_session("s1", Session::new("s1", "search"));
        assert_eq!(registry.get_session("s1").unwrap().server_key, "search");
        assert_eq!(registry.session_count(), 1);

        assert!(registry.delete_session("s1").is_some());
        assert!(registry.get_session("s1").is_none());
        assert!(registry.delete_session("s1").is_none());
    }

    #[test]
    fn test_touch_session_updates_last_seen() {
        let registry = SessionRegistry::new();
        let mut session = Session::new("s1", "weather");
        session.last_seen = session.created_at - chrono::Duration::seconds(60);
        registry.store_session("s1", session);

        assert!(registry.touch_session("s1"));
        let session = registry.get_session("s1").unwrap();
        assert!(session.last_seen >= session.created_at);
        assert!(!registry.touch_session("missing"));
    }

    #[tokio::test]
    async fn test_delete_client_closes_then_removes() {
        let registry = SessionRegistry::new();
        let client = Arc::new(CountingClient::default());
        registry.store_client("s1", client.clone());
        assert_eq!(registry.client_count(), 1);

        assert!(registry.delete_client("s1").await);
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
        assert!(registry.get_client("s1").is_none());
        assert!(!registry.delete_client("s1").await);
    }

    #[tokio::test]
    async fn test_delete_client_removes_even_when_close_fails() {
        let registry = SessionRegistry::new();
        let client = Arc::new(CountingClient {
            fail_close: true,
            ..CountingClient::default()
        });
        registry.store_client("s1", client.clone());

        assert!(registry.delete_client("s1").await);
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
        assert_eq!(registry.client_count(), 0);
    }

    #[tokio::test]
    async fn test_evict_and_close_all() {
        let registry = SessionRegistry::new();
        let first = Arc::new(CountingClient::default());
        let second = Arc::new(CountingClient::default());
        registry.store_session("a", Session::new("a", "weather"));
        registry.store_client("a", first.clone());
        registry.store_session("b", Session::new("b", "weather"));
        registry.store_client("b", second.clone());

        assert!(registry.evict("a").await);
        assert_eq!(first.closes.load(Ordering::SeqCst), 1);
        assert_eq!(registry.session_count(), 1);
        assert!(!registry.evict("a").await);

        registry.close_all().await;
        assert_eq!(second.closes.load(Ordering::SeqCst), 1);
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.client_count(), 0);
    }

    #[tokio::test]
    async fn test_notifications_follow_attached_stream() {
        let registry = SessionRegistry::new();
        let line = br#"{"jsonrpc":"2.0","method":"notifications/progress"}"#;
        assert!(!registry.forward_notification("s1", line));

        let (first, _first_body) = SseWriter::channel();
        let (second, _second_body) = SseWriter::channel();
        registry.attach_stream("s1", first.clone());
        assert!(registry.forward_notification("s1", line));

        registry.attach_stream("s1", second.clone());
        registry.detach_stream("s1", &first);
        assert!(registry.forward_notification("s1", line));

        registry.detach_stream("s1", &second);
        assert!(!registry.forward_notification("s1", line));

        registry.attach_stream("s1", second);
        registry.store_session("s1", Session::new("s1", "weather"));
        assert!(registry.evict("s1").await);
        assert!(!registry.forward_notification("s1", line));
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let registry = Arc::new(SessionRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let key = format!("s{i}");
                registry.store_session(key.clone(), Session::new(key.clone(), "weather"));
                registry.store_client(key.clone(), Arc::new(CountingClient::default()));
                assert!(registry.get_session(&key).is_some());
                if i % 2 == 0 {
                    registry.evict(&key).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.session_count(), 16);
        assert_eq!(registry.client_count(), 16);
    }
}
