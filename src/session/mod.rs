//! Session abstraction: `UserId`, `ConversationId`, `SessionStore` and
//! per-user turn locks.
//!
//! A session binds a transport-level user to one remote conversation.
//! State is memory-resident and lost when the process exits; the
//! [`SessionStore`] trait is the seam where a persistent backend would
//! plug in without touching the engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

// ── Identifiers ──────────────────────────────────────────────

/// Stable user identifier handed over by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque conversation identifier issued by the remote assistant service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── SessionStore ─────────────────────────────────────────────

/// Mapping from user to remote conversation.
///
/// `put` is last-write-wins: it replaces any prior mapping without
/// merging.  The store performs no cross-call coordination; callers that
/// need read-then-write atomicity use [`TurnLocks`].
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Return the conversation bound to `user`, if any.
    async fn get(&self, user: UserId) -> Option<ConversationId>;

    /// Bind `user` to `conversation`, overwriting any previous binding.
    async fn put(&self, user: UserId, conversation: ConversationId);
}

/// Process-lifetime, in-memory [`SessionStore`].
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<UserId, ConversationId>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with a bound conversation.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, user: UserId) -> Option<ConversationId> {
        self.sessions.read().await.get(&user).cloned()
    }

    async fn put(&self, user: UserId, conversation: ConversationId) {
        let previous = self
            .sessions
            .write()
            .await
            .insert(user, conversation.clone());
        debug!(
            user_id = %user,
            conversation_id = %conversation,
            replaced = previous.is_some(),
            "session bound"
        );
    }
}

// ── TurnLocks ────────────────────────────────────────────────

/// One async mutex per user.  Holding the guard serialises a user's
/// turns so two quick messages cannot interleave on the same remote
/// conversation or swap replies.
#[derive(Default)]
pub struct TurnLocks {
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl TurnLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the turn lock for `user`.
    pub async fn acquire(&self, user: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(user)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of users that have ever taken a turn lock.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn turn_lock_is_exclusive_per_user() {
        let locks = TurnLocks::new();
        let guard = locks.acquire(UserId(1)).await;

        // Same user blocks while the guard is held.
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(UserId(1))).await;
        assert!(blocked.is_err());

        // A different user proceeds.
        let other =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(UserId(2))).await;
        assert!(other.is_ok());

        drop(guard);
        let again =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(UserId(1))).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn one_entry_per_user() {
        let locks = TurnLocks::new();
        assert!(locks.is_empty().await);
        drop(locks.acquire(UserId(1)).await);
        drop(locks.acquire(UserId(1)).await);
        drop(locks.acquire(UserId(2)).await);
        assert_eq!(locks.len().await, 2);
    }
}
