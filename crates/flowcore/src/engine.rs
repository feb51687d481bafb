//! Per-event driver: admission, user lock, pipeline, dispatch and the error boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use strum::AsRefStr;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audit::EventLog;
use crate::core::config::Settings;
use crate::core::error::{DispatchError, RejectReason};
use crate::core::rate_limiter::RateLimiter;
use crate::core::types::{InboundEvent, UserId};
use crate::dispatch::{Ctx, Dispatched, Dispatcher};
use crate::gateway::Outbox;
use crate::i18n;
use crate::identity::IdentityStore;
use crate::pipeline::{
    AuditStage, EventContext, IdentityStage, Pipeline, RateLimitStage, StageOutcome, StateStage, UserLocks,
};
use crate::state::StateStore;

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Processed {
    Handled(&'static str),
    Rejected(RejectReason),
    Unmatched,
    Failed(String),
}

/// Stores and collaborators the engine is built from.
pub struct EngineParts<D> {
    pub identity: Arc<dyn IdentityStore>,
    pub states: Arc<dyn StateStore>,
    pub events: Option<Arc<dyn EventLog>>,
    pub outbox: Outbox,
    pub dispatcher: Dispatcher<D>,
    pub deps: D,
}

pub struct Engine<D> {
    /// Runs before the user lock is taken
    admission: Pipeline,
    pipeline: Pipeline,
    dispatcher: Dispatcher<D>,
    states: Arc<dyn StateStore>,
    outbox: Outbox,
    locks: UserLocks,
    /// Shared with the rate-limit stage, for periodic pruning
    limiters: Vec<RateLimiter>,
    deps: D,
}

impl<D: Send + Sync + 'static> Engine<D> {
    /// Builds the fixed pipelines: rate limit on arrival, then identity,
    /// state and audit under the user lock.
    pub fn new(settings: &Settings, parts: EngineParts<D>) -> Self {
        let mut admission = Pipeline::new();
        let mut limiters = Vec::new();
        if settings.antiflood_enabled {
            let limiter = RateLimiter::new(settings.antiflood_window, settings.antiflood_limit);
            let notices = RateLimiter::new(settings.throttle_notice_window, 1);
            limiters = vec![limiter.clone(), notices.clone()];
            admission = admission.with_stage(RateLimitStage::new(limiter, notices, parts.outbox.clone()));
        }

        let mut audit = AuditStage::new();
        if let Some(events) = parts.events {
            audit = audit.with_event_log(events);
        }
        let pipeline = Pipeline::new()
            .with_stage(IdentityStage::new(parts.identity, parts.outbox.clone()))
            .with_stage(StateStage::new(Arc::clone(&parts.states)))
            .with_stage(audit);

        let mut engine = Self::with_pipeline(pipeline, parts.states, parts.outbox, parts.dispatcher, parts.deps)
            .with_admission(admission);
        engine.limiters = limiters;
        engine
    }

    pub fn with_pipeline(
        pipeline: Pipeline,
        states: Arc<dyn StateStore>,
        outbox: Outbox,
        dispatcher: Dispatcher<D>,
        deps: D,
    ) -> Self {
        log::info!(
            "Engine ready: stages={:?}, routes={}",
            pipeline.stage_names(),
            dispatcher.len()
        );
        Self {
            admission: Pipeline::new(),
            pipeline,
            dispatcher,
            states,
            outbox,
            locks: UserLocks::new(),
            limiters: Vec::new(),
            deps,
        }
    }

    /// Replaces the stages that judge an event before it waits for the user lock.
    pub fn with_admission(mut self, admission: Pipeline) -> Self {
        log::info!("Admission stages: {:?}", admission.stage_names());
        self.admission = admission;
        self
    }

    pub fn deps(&self) -> &D {
        &self.deps
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Starts pruning idle users out of the rate limiters every `every`.
    pub fn spawn_rate_limit_cleanup(&self, every: Duration, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        self.limiters
            .iter()
            .map(|limiter| limiter.spawn_cleanup_task(every, cancel.clone()))
            .collect()
    }

    /// Processes one event to completion. Never returns an error: every
    /// failure is logged and turned into a user notice here.
    ///
    /// Admission is decided before waiting for the user's lock, so events
    /// piling up behind a slow handler are still rejected as a flood.
    pub async fn handle(&self, event: InboundEvent) -> Processed {
        let mut ctx = EventContext::new(event);

        let outcome = match self.admission.run(&mut ctx).await {
            Ok(StageOutcome::Continue) => {
                let user = ctx.event.user_id;
                let guard = self.locks.acquire(user).await;
                let outcome = self.process(&mut ctx).await;
                drop(guard);
                self.locks.release(user);
                outcome
            }
            Ok(StageOutcome::Halt(reason)) => Processed::Rejected(reason),
            Err(e) => self.fail(&ctx, e).await,
        };

        // Callbacks are always acknowledged, even for rejected users, so the
        // gateway does not redeliver them.
        if let Some(id) = ctx.event.callback_id() {
            if let Err(e) = self.outbox.answer_callback(id, None).await {
                log::warn!("Failed to answer callback {}: {}", id, e);
            }
        }

        log::debug!("Event from user {} -> {:?}", ctx.event.user_id, outcome);
        outcome
    }

    /// Consumes an inbound stream. Events of different users run concurrently;
    /// each user's events are handled one at a time in stream order. Returns
    /// when the stream ends and every event is processed.
    pub async fn run<S>(self: Arc<Self>, events: S)
    where
        S: Stream<Item = InboundEvent> + Send + Unpin,
    {
        let mut events = events;
        let mut tasks = tokio::task::JoinSet::new();
        // completion signal of the latest queued event per user
        let mut tails: HashMap<UserId, oneshot::Receiver<()>> = HashMap::new();

        while let Some(event) = events.next().await {
            tails.retain(|_, done| matches!(done.try_recv(), Err(oneshot::error::TryRecvError::Empty)));

            let (done_tx, done_rx) = oneshot::channel();
            let previous = tails.insert(event.user_id, done_rx);
            let engine = Arc::clone(&self);
            tasks.spawn(async move {
                if let Some(previous) = previous {
                    // a closed channel means the previous task is gone as well
                    let _ = previous.await;
                }
                engine.handle(event).await;
                let _ = done_tx.send(());
            });
            // reap finished tasks so the set does not grow unbounded
            while tasks.try_join_next().is_some() {}
        }
        while tasks.join_next().await.is_some() {}
    }

    async fn process(&self, ctx: &mut EventContext) -> Processed {
        match self.pipeline.run(ctx).await {
            Ok(StageOutcome::Continue) => self.dispatch(ctx).await,
            Ok(StageOutcome::Halt(reason)) => Processed::Rejected(reason),
            Err(e) => self.fail(ctx, e).await,
        }
    }

    async fn dispatch(&self, ctx: &EventContext) -> Processed {
        let Some(user) = ctx.user.as_ref() else {
            return self
                .fail(ctx, DispatchError::Fatal("identity stage did not resolve a user".to_string()))
                .await;
        };

        let handler_ctx = Ctx {
            event: &ctx.event,
            user,
            state: &ctx.state,
            states: self.states.as_ref(),
            outbox: &self.outbox,
            deps: &self.deps,
        };

        match self.dispatcher.dispatch(&handler_ctx).await {
            Ok(Dispatched::Handled(name)) => Processed::Handled(name),
            Ok(Dispatched::Unmatched) => {
                if let Some(command) = ctx.event.command() {
                    log::info!("Unsupported command /{} from user {}", command, user.id);
                    self.notify(user.id, &i18n::t(&user.language(), "unsupported-command")).await;
                }
                Processed::Unmatched
            }
            Err(e) => self.fail(ctx, e).await,
        }
    }

    async fn fail(&self, ctx: &EventContext, err: DispatchError) -> Processed {
        let user = ctx.event.user_id;
        let lang = match &ctx.user {
            Some(u) => u.language(),
            None => i18n::lang_from_code(ctx.event.profile.language_code.as_deref().unwrap_or_default()),
        };

        match err {
            DispatchError::Rejected(reason) => Processed::Rejected(reason),
            DispatchError::Validation(message) => {
                self.notify(user, &message).await;
                Processed::Failed(message)
            }
            DispatchError::TransientIo(message) | DispatchError::Fatal(message) => {
                log::error!(
                    "Event from user {} ({}) failed: {}",
                    user,
                    ctx.event.kind_name(),
                    message
                );
                self.notify(user, &i18n::t(&lang, "error-generic")).await;
                Processed::Failed(message)
            }
        }
    }

    async fn notify(&self, user: UserId, text: &str) {
        if let Err(e) = self.outbox.send_text(user, text).await {
            log::warn!("Failed to notify user {}: {}", user, e);
        }
    }
}
