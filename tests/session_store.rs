//! In-memory session store semantics.

use std::sync::Arc;

use thread_relay::session::{ConversationId, MemorySessionStore, SessionStore, UserId};

#[tokio::test]
async fn unknown_user_has_no_session() {
    let store = MemorySessionStore::new();
    assert_eq!(store.get(UserId(1)).await, None);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn put_overwrites_previous_binding() {
    let store = MemorySessionStore::new();
    store.put(UserId(1), ConversationId::from("thread_a")).await;
    store.put(UserId(1), ConversationId::from("thread_b")).await;

    assert_eq!(store.get(UserId(1)).await, Some(ConversationId::from("thread_b")));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn users_are_isolated() {
    let store = MemorySessionStore::new();
    store.put(UserId(1), ConversationId::from("thread_a")).await;
    store.put(UserId(2), ConversationId::from("thread_b")).await;

    assert_eq!(store.get(UserId(1)).await, Some(ConversationId::from("thread_a")));
    assert_eq!(store.get(UserId(2)).await, Some(ConversationId::from("thread_b")));
}

#[tokio::test]
async fn concurrent_puts_for_many_users() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let mut tasks = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .put(UserId(i), ConversationId(format!("thread_{i}")))
                .await;
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }
    for i in 0..32 {
        assert_eq!(
            store.get(UserId(i)).await,
            Some(ConversationId(format!("thread_{i}")))
        );
    }
}
