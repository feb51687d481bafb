//! Scheduled fan-out of one payload to a snapshot of recipients.
//!
//! The scheduler owns its job list. A background loop (see [`BroadcastScheduler::start`])
//! fires due jobs and emits a [`DeliveryReport`] per job through an mpsc channel;
//! the bot layer forwards those to whoever scheduled the job.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::config;
use crate::core::error::StorageError;
use crate::core::types::UserId;
use crate::gateway::{OutboundMessage, Outbox};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub text: Option<String>,
    /// Gateway file id of a photo
    pub photo: Option<String>,
}

impl BroadcastPayload {
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().unwrap_or_default().is_empty() && self.photo.is_none()
    }

    pub fn to_message(&self) -> OutboundMessage {
        let message = OutboundMessage::text(self.text.clone().unwrap_or_default());
        match &self.photo {
            Some(photo) => message.with_photo(photo.clone()),
            None => message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastJob {
    pub id: Uuid,
    pub fire_at: DateTime<Utc>,
    /// Taken at schedule time, never re-evaluated
    pub recipients: Vec<UserId>,
    pub payload: BroadcastPayload,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one fired job. Failures are counted, never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub job_id: Uuid,
    pub delivered: usize,
    pub failed: usize,
    pub created_by: Option<UserId>,
}

/// Durable copy of the job list, used to survive restarts.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save(&self, job: &BroadcastJob) -> Result<(), StorageError>;

    async fn remove(&self, id: Uuid) -> Result<(), StorageError>;

    /// Jobs with `from <= fire_at < to`, earliest first.
    async fn pending_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<BroadcastJob>, StorageError>;
}

pub struct BroadcastScheduler {
    /// Pending jobs sorted by `fire_at`
    jobs: Mutex<Vec<BroadcastJob>>,
    outbox: Outbox,
    store: Option<Arc<dyn JobStore>>,
    concurrency: usize,
}

impl BroadcastScheduler {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            outbox,
            store: None,
            concurrency: config::scheduler::MAX_CONCURRENT_DELIVERIES,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Registers a job.
    ///
    /// The job is persisted before it becomes visible, so a store failure
    /// leaves nothing scheduled.
    ///
    /// # Returns
    ///
    /// The new job's id.
    pub async fn schedule(
        &self,
        fire_at: DateTime<Utc>,
        recipients: Vec<UserId>,
        payload: BroadcastPayload,
        created_by: Option<UserId>,
    ) -> Result<Uuid, StorageError> {
        let job = BroadcastJob {
            id: Uuid::new_v4(),
            fire_at,
            recipients,
            payload,
            created_by,
            created_at: Utc::now(),
        };
        if let Some(store) = &self.store {
            store.save(&job).await?;
        }

        let id = job.id;
        log::info!(
            "Broadcast {} scheduled for {} ({} recipients)",
            id,
            job.fire_at,
            job.recipients.len()
        );
        self.insert(job).await;
        Ok(id)
    }

    /// Pending jobs ordered by next fire time.
    pub async fn list_pending(&self) -> Vec<BroadcastJob> {
        self.jobs.lock().await.clone()
    }

    /// Loads jobs left in the store by a previous run. Already-known ids are skipped.
    pub async fn restore(&self) -> Result<usize, StorageError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let stored = store.pending_between(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC).await?;

        let mut jobs = self.jobs.lock().await;
        let mut restored = 0;
        for job in stored {
            if jobs.iter().any(|known| known.id == job.id) {
                continue;
            }
            let pos = jobs.partition_point(|known| known.fire_at <= job.fire_at);
            jobs.insert(pos, job);
            restored += 1;
        }
        Ok(restored)
    }

    /// Fires every job due at `now`.
    ///
    /// Due jobs leave the list under the lock; deliveries run after it is released.
    /// Each recipient gets exactly one attempt.
    pub async fn fire_due(&self, now: DateTime<Utc>) -> Vec<DeliveryReport> {
        let due: Vec<BroadcastJob> = {
            let mut jobs = self.jobs.lock().await;
            let split = jobs.partition_point(|job| job.fire_at <= now);
            jobs.drain(..split).collect()
        };
        if due.is_empty() {
            return Vec::new();
        }

        let reports = futures_util::future::join_all(due.iter().map(|job| self.deliver(job))).await;

        if let Some(store) = &self.store {
            for job in &due {
                if let Err(e) = store.remove(job.id).await {
                    log::error!("Failed to remove fired broadcast {}: {}", job.id, e);
                }
            }
        }
        reports
    }

    /// Spawns the firing loop.
    ///
    /// Returns a receiver for `DeliveryReport`s; the loop stops when `cancel`
    /// fires. A closed receiver does not stop deliveries.
    pub fn start(self: Arc<Self>, tick: Duration, cancel: CancellationToken) -> mpsc::UnboundedReceiver<DeliveryReport> {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            log::info!("Broadcast scheduler started (tick: {:?})", tick);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::info!("Broadcast scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        for report in self.fire_due(Utc::now()).await {
                            if tx.send(report).is_err() {
                                log::debug!("Delivery report receiver dropped");
                            }
                        }
                    }
                }
            }
        });

        rx
    }

    async fn insert(&self, job: BroadcastJob) {
        let mut jobs = self.jobs.lock().await;
        let pos = jobs.partition_point(|known| known.fire_at <= job.fire_at);
        jobs.insert(pos, job);
    }

    async fn deliver(&self, job: &BroadcastJob) -> DeliveryReport {
        let message = job.payload.to_message();
        let outbox = &self.outbox;
        let message = &message;

        let failed = stream::iter(job.recipients.iter().copied())
            .map(|user| async move {
                match outbox.send(user, message).await {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("Broadcast {} to user {} failed: {}", job.id, user, e);
                        false
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter(|ok| std::future::ready(!*ok))
            .count()
            .await;

        let report = DeliveryReport {
            job_id: job.id,
            delivered: job.recipients.len() - failed,
            failed,
            created_by: job.created_by,
        };
        log::info!(
            "Broadcast {} done: delivered={}, failed={}",
            job.id,
            report.delivered,
            report.failed
        );
        report
    }
}
