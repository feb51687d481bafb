use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::types::UserId;

/// Per-user sliding-window admission control.
///
/// Keeps the timestamps of admitted events inside the trailing window. An
/// event is admitted while fewer than `limit` admitted events are younger
/// than `window`; rejected events are not recorded, so a flood cannot keep a
/// user locked out past the window.
#[derive(Clone)]
pub struct RateLimiter {
    /// Admitted-event timestamps per user, oldest first
    windows: Arc<Mutex<HashMap<UserId, VecDeque<Instant>>>>,
    window: Duration,
    limit: usize,
}

impl RateLimiter {
    /// Creates a limiter admitting `limit` events per `window`.
    ///
    /// A zero `limit` is treated as 1.
    ///
    /// # Example
    ///
    /// ```
    /// use flowcore::core::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(Duration::from_secs(1), 1);
    /// ```
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            window,
            limit: limit.max(1),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decides whether an event observed at `now` may proceed, and records it if so.
    ///
    /// # Arguments
    ///
    /// * `user_id` - the event's user
    /// * `now` - observation time; decisions are monotonic in it for one user
    ///
    /// # Returns
    ///
    /// `true` if admitted, `false` if the user already used up the window.
    pub async fn admit(&self, user_id: UserId, now: Instant) -> bool {
        let mut windows = self.windows.lock().await;
        let log = windows.entry(user_id).or_default();
        Self::evict(log, now, self.window);
        if log.len() >= self.limit {
            return false;
        }
        log.push_back(now);
        true
    }

    /// Time until the user may be admitted again.
    ///
    /// # Returns
    ///
    /// `Some(Duration)` if the user is currently limited, otherwise `None`.
    pub async fn remaining_time(&self, user_id: UserId, now: Instant) -> Option<Duration> {
        let mut windows = self.windows.lock().await;
        let log = windows.get_mut(&user_id)?;
        Self::evict(log, now, self.window);
        if log.len() < self.limit {
            return None;
        }
        log.front().map(|oldest| (*oldest + self.window).saturating_duration_since(now))
    }

    /// Drops the user's window, e.g. after an administrative unblock.
    pub async fn reset(&self, user_id: UserId) {
        self.windows.lock().await.remove(&user_id);
    }

    /// Removes users whose windows are fully elapsed. Returns how many were dropped.
    pub async fn prune(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        let window = self.window;
        windows.retain(|_, log| {
            Self::evict(log, now, window);
            !log.is_empty()
        });
        before - windows.len()
    }

    /// Periodically prunes idle users until `cancel` fires.
    pub fn spawn_cleanup_task(&self, every: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let dropped = limiter.prune(Instant::now()).await;
                        if dropped > 0 {
                            log::debug!("Rate limiter pruned {} idle users", dropped);
                        }
                    }
                }
            }
        })
    }

    fn evict(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = log.front() {
            if now.saturating_duration_since(oldest) >= window {
                log.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_per_second() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 1);
        let t0 = Instant::now();
        let user = UserId(10);

        assert!(limiter.admit(user, t0).await);
        assert!(!limiter.admit(user, t0 + Duration::from_millis(500)).await);
        assert!(!limiter.admit(user, t0 + Duration::from_millis(999)).await);
        assert!(limiter.admit(user, t0 + Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_n_admitted_then_rejected_in_any_window() {
        let limiter = RateLimiter::new(Duration::from_secs(10), 3);
        let t0 = Instant::now();
        let user = UserId(11);

        assert!(limiter.admit(user, t0).await);
        assert!(limiter.admit(user, t0 + Duration::from_secs(4)).await);
        assert!(limiter.admit(user, t0 + Duration::from_secs(8)).await);
        assert!(!limiter.admit(user, t0 + Duration::from_secs(9)).await);
        // first admission leaves the trailing window
        assert!(limiter.admit(user, t0 + Duration::from_secs(10)).await);
        assert!(!limiter.admit(user, t0 + Duration::from_secs(11)).await);
    }

    #[tokio::test]
    async fn test_users_do_not_interact() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 1);
        let t0 = Instant::now();

        assert!(limiter.admit(UserId(1), t0).await);
        assert!(limiter.admit(UserId(2), t0).await);
        assert!(!limiter.admit(UserId(1), t0).await);
    }

    #[tokio::test]
    async fn test_remaining_time() {
        let limiter = RateLimiter::new(Duration::from_secs(2), 1);
        let t0 = Instant::now();
        let user = UserId(3);

        assert_eq!(limiter.remaining_time(user, t0).await, None);
        limiter.admit(user, t0).await;
        assert_eq!(
            limiter.remaining_time(user, t0 + Duration::from_millis(500)).await,
            Some(Duration::from_millis(1500))
        );
    }

    #[tokio::test]
    async fn test_prune_and_reset() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 1);
        let t0 = Instant::now();

        limiter.admit(UserId(1), t0).await;
        limiter.admit(UserId(2), t0 + Duration::from_millis(900)).await;
        assert_eq!(limiter.prune(t0 + Duration::from_secs(1)).await, 1);

        limiter.reset(UserId(2)).await;
        assert!(limiter.admit(UserId(2), t0 + Duration::from_secs(1)).await);
    }
}
