//! Broadcast scheduling against the SQLite job store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use flowcore::broadcast::{BroadcastPayload, BroadcastScheduler, JobStore};
use flowcore::core::types::UserId;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::Harness;

fn payload(text: &str) -> BroadcastPayload {
    BroadcastPayload {
        text: Some(text.to_string()),
        photo: None,
    }
}

fn recipients(n: i64) -> Vec<UserId> {
    (1..=n).map(UserId).collect()
}

#[tokio::test]
async fn test_fire_reports_partial_failure_and_removes_job() {
    let h = Harness::new();
    h.gateway.fail_for(UserId(3));
    let scheduler = BroadcastScheduler::new(h.outbox.clone()).with_store(Arc::new(h.db.clone()));

    let fire_at = Utc::now() + ChronoDuration::minutes(5);
    let id = scheduler
        .schedule(fire_at, recipients(5), payload("hello"), Some(UserId(1)))
        .await
        .unwrap();

    // nothing is due yet
    assert!(scheduler.fire_due(Utc::now()).await.is_empty());
    assert_eq!(scheduler.list_pending().await.len(), 1);

    let reports = scheduler.fire_due(fire_at).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].job_id, id);
    assert_eq!((reports[0].delivered, reports[0].failed), (4, 1));
    assert_eq!(reports[0].created_by, Some(UserId(1)));

    assert!(scheduler.list_pending().await.is_empty());
    let stored = h
        .db
        .pending_between(chrono::DateTime::<Utc>::MIN_UTC, chrono::DateTime::<Utc>::MAX_UTC)
        .await
        .unwrap();
    assert!(stored.is_empty());

    let delivered: Vec<UserId> = h.gateway.sent().into_iter().map(|s| s.user).collect();
    assert_eq!(delivered.len(), 4);
    assert!(!delivered.contains(&UserId(3)));

    // fired jobs never fire again
    assert!(scheduler.fire_due(fire_at + ChronoDuration::hours(1)).await.is_empty());
}

#[tokio::test]
async fn test_jobs_survive_restart() {
    let h = Harness::new();
    let store = Arc::new(h.db.clone());

    let before = BroadcastScheduler::new(h.outbox.clone()).with_store(store.clone());
    let overdue = Utc::now() - ChronoDuration::minutes(1);
    let later = Utc::now() + ChronoDuration::days(1);
    before.schedule(later, recipients(2), payload("later"), None).await.unwrap();
    before.schedule(overdue, recipients(2), payload("overdue"), None).await.unwrap();
    drop(before);

    let after = BroadcastScheduler::new(h.outbox.clone()).with_store(store);
    assert_eq!(after.restore().await.unwrap(), 2);
    assert_eq!(after.restore().await.unwrap(), 0);

    let pending = after.list_pending().await;
    assert_eq!(pending.len(), 2);
    assert!(pending[0].fire_at <= pending[1].fire_at);

    // the overdue job fires on the next pass
    let reports = after.fire_due(Utc::now()).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].delivered, 2);
    assert_eq!(h.gateway.last_text(UserId(1)).as_deref(), Some("overdue"));
    assert_eq!(after.list_pending().await.len(), 1);
}

#[tokio::test]
async fn test_hanging_recipient_does_not_stall_the_job() {
    let h = Harness::new();
    h.gateway.hang_for(UserId(2));
    let scheduler = BroadcastScheduler::new(h.outbox.clone());

    let now = Utc::now();
    scheduler.schedule(now, recipients(3), payload("hi"), None).await.unwrap();

    let reports = tokio::time::timeout(Duration::from_secs(10), scheduler.fire_due(now))
        .await
        .unwrap();
    assert_eq!((reports[0].delivered, reports[0].failed), (2, 1));
}

#[tokio::test]
async fn test_firing_loop_emits_reports() {
    let h = Harness::new();
    let scheduler = Arc::new(BroadcastScheduler::new(h.outbox.clone()));
    scheduler
        .schedule(Utc::now(), recipients(3), payload("tick"), Some(UserId(9)))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let mut reports = Arc::clone(&scheduler).start(Duration::from_millis(20), cancel.clone());

    let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.delivered, 3);
    assert_eq!(report.created_by, Some(UserId(9)));
    cancel.cancel();
}
