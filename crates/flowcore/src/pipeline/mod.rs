//! Ordered middleware stages run before dispatch.
//!
//! The engine runs two pipelines. Admission (the rate limit) runs as soon as
//! the event arrives, outside the per-user lock. The enrichment pipeline runs
//! under the lock: identity (with block check), conversation state, then the
//! audit stage.
//! Any stage can halt the event; later stages and the handler then never run.

mod locks;

pub use locks::UserLocks;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::audit::{AuditEvent, EventLog};
use crate::core::error::{HandlerResult, RejectReason};
use crate::core::rate_limiter::RateLimiter;
use crate::core::types::InboundEvent;
use crate::gateway::Outbox;
use crate::i18n;
use crate::identity::{IdentityStore, User};
use crate::state::{ConversationState, StateStore};

/// Per-event context shared by the stages.
#[derive(Debug)]
pub struct EventContext {
    pub event: InboundEvent,
    /// Filled by [`IdentityStage`]
    pub user: Option<User>,
    /// Filled by [`StateStage`]
    pub state: ConversationState,
}

impl EventContext {
    pub fn new(event: InboundEvent) -> Self {
        Self {
            event,
            user: None,
            state: ConversationState::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Continue,
    Halt(RejectReason),
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reads or annotates `ctx`. Each stage's writes are individually atomic.
    async fn process(&self, ctx: &mut EventContext) -> HandlerResult<StageOutcome>;
}

#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs the stages in order until one halts or fails.
    pub async fn run(&self, ctx: &mut EventContext) -> HandlerResult<StageOutcome> {
        for stage in &self.stages {
            match stage.process(ctx).await? {
                StageOutcome::Continue => {}
                StageOutcome::Halt(reason) => {
                    log::debug!(
                        "Event from user {} halted by {} stage: {}",
                        ctx.event.user_id,
                        stage.name(),
                        reason
                    );
                    return Ok(StageOutcome::Halt(reason));
                }
            }
        }
        Ok(StageOutcome::Continue)
    }
}

/// Admission control, judged at the event's arrival time. Rejected users get
/// at most one throttle notice per notice window.
pub struct RateLimitStage {
    limiter: RateLimiter,
    notices: RateLimiter,
    outbox: Outbox,
}

impl RateLimitStage {
    pub fn new(limiter: RateLimiter, notices: RateLimiter, outbox: Outbox) -> Self {
        Self {
            limiter,
            notices,
            outbox,
        }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn process(&self, ctx: &mut EventContext) -> HandlerResult<StageOutcome> {
        let user = ctx.event.user_id;
        let now = ctx.event.arrived_at;
        if self.limiter.admit(user, now).await {
            return Ok(StageOutcome::Continue);
        }

        if self.notices.admit(user, now).await {
            let wait = self.limiter.remaining_time(user, now).await.unwrap_or(self.limiter.window());
            let mut args = i18n::FluentArgs::new();
            args.set("seconds", whole_seconds(wait));
            let lang = i18n::lang_from_code(ctx.event.profile.language_code.as_deref().unwrap_or_default());
            let text = i18n::t_args(&lang, "throttle-notice", &args);
            if let Err(e) = self.outbox.send_text(user, text).await {
                log::warn!("Failed to send throttle notice to {}: {}", user, e);
            }
        }
        Ok(StageOutcome::Halt(RejectReason::RateLimited))
    }
}

/// Rounds up, never below one second.
fn whole_seconds(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Resolves or creates the user and stops blocked users.
pub struct IdentityStage {
    identity: Arc<dyn IdentityStore>,
    outbox: Outbox,
}

impl IdentityStage {
    pub fn new(identity: Arc<dyn IdentityStore>, outbox: Outbox) -> Self {
        Self { identity, outbox }
    }
}

#[async_trait]
impl Stage for IdentityStage {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn process(&self, ctx: &mut EventContext) -> HandlerResult<StageOutcome> {
        let user = self.identity.upsert(ctx.event.user_id, &ctx.event.profile).await?;

        if user.is_blocked {
            if let Err(e) = self.outbox.send_text(user.id, i18n::t(&user.language(), "blocked-notice")).await {
                log::warn!("Failed to send blocked notice to {}: {}", user.id, e);
            }
            ctx.user = Some(user);
            return Ok(StageOutcome::Halt(RejectReason::Blocked));
        }

        ctx.user = Some(user);
        Ok(StageOutcome::Continue)
    }
}

/// Loads the user's current conversation state.
pub struct StateStage {
    states: Arc<dyn StateStore>,
}

impl StateStage {
    pub fn new(states: Arc<dyn StateStore>) -> Self {
        Self { states }
    }
}

#[async_trait]
impl Stage for StateStage {
    fn name(&self) -> &'static str {
        "state"
    }

    async fn process(&self, ctx: &mut EventContext) -> HandlerResult<StageOutcome> {
        ctx.state = self.states.get(ctx.event.user_id).await?;
        Ok(StageOutcome::Continue)
    }
}

/// Writes one audit line per enriched event, and a row when a log is attached.
#[derive(Default)]
pub struct AuditStage {
    events: Option<Arc<dyn EventLog>>,
}

impl AuditStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_log(mut self, events: Arc<dyn EventLog>) -> Self {
        self.events = Some(events);
        self
    }
}

#[async_trait]
impl Stage for AuditStage {
    fn name(&self) -> &'static str {
        "audit"
    }

    async fn process(&self, ctx: &mut EventContext) -> HandlerResult<StageOutcome> {
        let audit = AuditEvent::from_inbound(&ctx.event, ctx.state.tag.as_ref());
        audit.log();
        if let Some(events) = &self.events {
            // best-effort, never blocks the event
            if let Err(e) = events.record(&audit).await {
                log::warn!("Failed to record audit event for {}: {}", audit.user_id, e);
            }
        }
        Ok(StageOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_seconds_rounds_up() {
        assert_eq!(whole_seconds(Duration::from_millis(59_997)), 60);
        assert_eq!(whole_seconds(Duration::from_secs(3)), 3);
        assert_eq!(whole_seconds(Duration::ZERO), 1);
    }
}
