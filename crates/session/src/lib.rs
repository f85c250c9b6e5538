//! Session State Store — the source of truth for per-conversation state.
//!
//! Each session key owns one `Session` record behind its own async mutex.
//! Updates for a key are serialized (a second updater queues on the mutex
//! rather than racing); different keys are fully independent and proceed in
//! parallel. The engine takes an owned guard for the whole duration of a
//! turn, which is what makes turns for one session strictly sequential.

use std::collections::HashMap;
use std::sync::Arc;

use parley_core::turn::{Session, SessionKey, Turn};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

/// In-memory store of sessions keyed by session key.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The per-key slot, created with an empty `Session` if absent.
    async fn entry(&self, key: &SessionKey) -> Arc<Mutex<Session>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(slot) = sessions.get(key) {
                return slot.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(session = %key, "creating session");
                Arc::new(Mutex::new(Session::new(key.clone())))
            })
            .clone()
    }

    /// Snapshot of the session state (created empty if absent).
    pub async fn get(&self, key: &SessionKey) -> Session {
        let slot = self.entry(key).await;
        let session = slot.lock().await;
        session.clone()
    }

    /// Atomic read-modify-write of the session under its key mutex.
    pub async fn update<R>(&self, key: &SessionKey, mutator: impl FnOnce(&mut Session) -> R) -> R {
        let slot = self.entry(key).await;
        let mut session = slot.lock().await;
        mutator(&mut session)
    }

    /// Append one turn to the session transcript.
    pub async fn append_turn(&self, key: &SessionKey, turn: Turn) {
        self.update(key, |session| session.push_turn(turn)).await;
    }

    /// Take the session lock for the duration of a whole turn.
    ///
    /// A concurrent `handle_turn` for the same key queues here until the
    /// first turn's mutations are fully applied.
    pub async fn lock_owned(&self, key: &SessionKey) -> OwnedMutexGuard<Session> {
        let slot = self.entry(key).await;
        slot.lock_owned().await
    }

    /// Number of sessions currently held.
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn creates_empty_session_on_first_get() {
        let store = SessionStore::new();
        let key = SessionKey::from("s1");

        let session = store.get(&key).await;
        assert_eq!(session.key, key);
        assert!(session.transcript.is_empty());
        assert_eq!(store.active_count().await, 1);
    }

    #[tokio::test]
    async fn update_applies_atomically() {
        let store = SessionStore::new();
        let key = SessionKey::from("s1");

        store
            .update(&key, |s| {
                s.turn_counter += 1;
                s.set_state("normalized_user_message", serde_json::json!("Hi"));
            })
            .await;

        let session = store.get(&key).await;
        assert_eq!(session.turn_counter, 1);
        assert_eq!(session.state_str("normalized_user_message"), Some("Hi"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_do_not_lose_writes() {
        let store = Arc::new(SessionStore::new());
        let key = SessionKey::from("s1");

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.update(&key, |s| s.turn_counter += 1).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get(&key).await.turn_counter, 50);
    }

    #[tokio::test]
    async fn owned_lock_serializes_whole_turns() {
        let store = Arc::new(SessionStore::new());
        let key = SessionKey::from("s1");

        let guard = store.lock_owned(&key).await;

        // A second turn on the same key must queue behind the guard.
        let store2 = store.clone();
        let key2 = key.clone();
        let second = tokio::spawn(async move {
            let mut session = store2.lock_owned(&key2).await;
            session.push_turn(Turn::user("second"));
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        drop(guard);
        second.await.unwrap();

        let session = store.get(&key).await;
        assert_eq!(session.transcript.len(), 1);
    }

    #[tokio::test]
    async fn independent_sessions_proceed_in_parallel() {
        let store = Arc::new(SessionStore::new());

        // Holding one session's turn lock must not block another session.
        let _guard = store.lock_owned(&SessionKey::from("s1")).await;

        let other = tokio::time::timeout(
            Duration::from_millis(100),
            store.lock_owned(&SessionKey::from("s2")),
        )
        .await;
        assert!(other.is_ok(), "independent session was blocked");
    }
}
