use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::types::UserId;

/// One async mutex per user; events of the same user run one at a time.
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the user's lock. The returned guard releases it on drop.
    pub async fn acquire(&self, user: UserId) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(user).or_default().value());
        lock.lock_owned().await
    }

    /// Drops the user's entry if nobody holds or waits for it.
    pub fn release(&self, user: UserId) {
        self.locks.remove_if(&user, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_user_is_serialized() {
        let locks = Arc::new(UserLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let (locks, inside, max_inside) = (locks.clone(), inside.clone(), max_inside.clone());
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire(UserId(1)).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_users_do_not_block() {
        let locks = UserLocks::new();
        let _a = locks.acquire(UserId(1)).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(UserId(2))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_release_prunes_idle_entries() {
        let locks = UserLocks::new();
        let guard = locks.acquire(UserId(1)).await;
        locks.release(UserId(1));
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.release(UserId(1));
        assert!(locks.is_empty());
    }
}
