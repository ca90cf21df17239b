//! Per-session advisory locks
//!
//! Every operation that reads and rewrites a session's escrow record holds
//! that session's lock, so two attest or claim calls for the same session
//! run one after the other. Different sessions never contend.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// How long an unsubmitted spend keeps the script output reserved
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 600;

#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`. Idle entries of other
    /// sessions are dropped on the way, so the map only holds sessions
    /// somebody is working on.
    pub async fn acquire(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(session_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_session_serializes() {
        let locks = Arc::new(SessionLocks::new());
        let id = Uuid::new_v4();
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.acquire(id).await;
        let waiter = {
            let locks = locks.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
                order.lock().await.push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().await.push("first");
        drop(guard);
        waiter.await.unwrap();

        assert_eq!(*order.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_other_sessions_do_not_block() {
        let locks = SessionLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(Uuid::new_v4()))
            .await
            .expect("independent session blocked");
        assert_eq!(locks.len().await, 2);
    }

    #[tokio::test]
    async fn test_map_stays_bounded() {
        let locks = SessionLocks::new();
        for _ in 0..100 {
            drop(locks.acquire(Uuid::new_v4()).await);
        }
        assert!(locks.len().await <= 1);

        let held = locks.acquire(Uuid::new_v4()).await;
        drop(locks.acquire(Uuid::new_v4()).await);
        assert_eq!(locks.len().await, 2);
        drop(held);
    }
}
