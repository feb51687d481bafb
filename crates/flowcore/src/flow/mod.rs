//! Declarative multi-turn flows on top of [`StateStore`] and [`Dispatcher`].
//!
//! A flow is an ordered list of steps, each waiting in its own state tag.
//! The entry route clears any previous state, moves to the first tag and
//! prompts. Each matched input is captured by the active step: a validation
//! error re-prompts in place, success merges the captured data and either
//! advances to the next step or, after the last one, commits and clears.
//! The fixed [`CANCEL`] callback clears from any step without committing.
//!
//! [`StateStore`]: crate::state::StateStore

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::error::{DispatchError, HandlerResult};
use crate::dispatch::{Ctx, Dispatcher, Handler, Route};
use crate::gateway::{Button, OutboundMessage};
use crate::state::{DataBag, StateTag};

/// Callback payload that cancels whatever the user is doing.
pub const CANCEL: &str = "cancel";

/// Inline row with the localized cancel button.
pub fn cancel_row<D>(ctx: &Ctx<'_, D>) -> Vec<Button> {
    vec![Button::callback(ctx.t("cancel-button"), CANCEL)]
}

/// One prompt/capture step of a flow.
#[async_trait]
pub trait Step<D>: Send + Sync {
    /// State the flow waits in while this step is active.
    fn tag(&self) -> StateTag;

    /// Inputs this step consumes; anything else falls through to stateless routes.
    fn accepts(&self) -> Route {
        Route::text()
    }

    /// Asks for this step's input. `data` holds what earlier steps captured.
    async fn prompt(&self, ctx: &Ctx<'_, D>, data: &DataBag) -> HandlerResult;

    /// Validates the input; `Err(DispatchError::Validation)` re-prompts.
    async fn capture(&self, ctx: &Ctx<'_, D>, data: &DataBag) -> HandlerResult<DataBag>;
}

/// Side effect of a completed flow.
#[async_trait]
pub trait Commit<D>: Send + Sync {
    async fn commit(&self, ctx: &Ctx<'_, D>, data: DataBag) -> HandlerResult;
}

struct FlowInner<D> {
    name: &'static str,
    steps: Vec<Arc<dyn Step<D>>>,
    commit: Arc<dyn Commit<D>>,
}

/// A declared flow. Cheap to clone.
pub struct Flow<D> {
    inner: Arc<FlowInner<D>>,
}

impl<D> Clone for Flow<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`Flow`].
pub struct FlowBuilder<D> {
    name: &'static str,
    steps: Vec<Arc<dyn Step<D>>>,
}

impl<D: Send + Sync + 'static> FlowBuilder<D> {
    pub fn step(mut self, step: impl Step<D> + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn commit(self, commit: impl Commit<D> + 'static) -> Flow<D> {
        Flow {
            inner: Arc::new(FlowInner {
                name: self.name,
                steps: self.steps,
                commit: Arc::new(commit),
            }),
        }
    }
}

impl<D: Send + Sync + 'static> Flow<D> {
    pub fn builder(name: &'static str) -> FlowBuilder<D> {
        FlowBuilder {
            name,
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn tags(&self) -> Vec<StateTag> {
        self.inner.steps.iter().map(|s| s.tag()).collect()
    }

    /// Wires the flow into `dispatcher`: the entry route, a cancel route per
    /// step tag, then one capture route per step.
    pub fn register(&self, dispatcher: &mut Dispatcher<D>, entry: Route) {
        dispatcher.on_arc(self.inner.name, entry, None, Arc::new(self.entry()));
        self.register_steps(dispatcher);
    }

    /// Handler that starts the flow. For callers that guard the entry themselves.
    pub fn entry(&self) -> FlowEntry<D> {
        FlowEntry { flow: self.clone() }
    }

    /// Registers the cancel and capture routes without an entry route.
    pub fn register_steps(&self, dispatcher: &mut Dispatcher<D>) {
        for step in &self.inner.steps {
            dispatcher.on_arc(
                "flow.cancel",
                Route::callback(CANCEL),
                Some(step.tag()),
                Arc::new(CancelHandler),
            );
        }
        for (index, step) in self.inner.steps.iter().enumerate() {
            dispatcher.on_arc(
                self.inner.name,
                step.accepts(),
                Some(step.tag()),
                Arc::new(FlowStep {
                    flow: self.clone(),
                    index,
                }),
            );
        }
    }

    /// Starts the flow from scratch, discarding any previous state.
    pub async fn start(&self, ctx: &Ctx<'_, D>) -> HandlerResult {
        self.start_with(ctx, DataBag::new()).await
    }

    /// Starts the flow with pre-filled data.
    pub async fn start_with(&self, ctx: &Ctx<'_, D>, data: DataBag) -> HandlerResult {
        let Some(first) = self.inner.steps.first() else {
            return self.inner.commit.commit(ctx, data).await;
        };
        ctx.states.clear(ctx.user_id()).await?;
        ctx.states.transition(ctx.user_id(), first.tag(), data.clone()).await?;
        log::debug!("User {} entered flow {}", ctx.user_id(), self.inner.name);
        first.prompt(ctx, &data).await
    }

    async fn advance(&self, index: usize, ctx: &Ctx<'_, D>) -> HandlerResult {
        let step = &self.inner.steps[index];
        let data = ctx.state.data.clone();

        let captured = match step.capture(ctx, &data).await {
            Ok(captured) => captured,
            Err(DispatchError::Validation(message)) => {
                ctx.reply(message).await?;
                return step.prompt(ctx, &data).await;
            }
            Err(e) => return Err(e),
        };

        let mut merged = data;
        merged.extend(captured.clone());

        match self.inner.steps.get(index + 1) {
            Some(next) => {
                ctx.states.transition(ctx.user_id(), next.tag(), captured).await?;
                next.prompt(ctx, &merged).await
            }
            None => {
                self.inner.commit.commit(ctx, merged).await?;
                ctx.states.clear(ctx.user_id()).await?;
                log::info!("User {} completed flow {}", ctx.user_id(), self.inner.name);
                Ok(())
            }
        }
    }
}

/// Starts a [`Flow`] from scratch.
pub struct FlowEntry<D> {
    flow: Flow<D>,
}

#[async_trait]
impl<D: Send + Sync + 'static> Handler<D> for FlowEntry<D> {
    async fn handle(&self, ctx: &Ctx<'_, D>) -> HandlerResult {
        self.flow.start(ctx).await
    }
}

struct FlowStep<D> {
    flow: Flow<D>,
    index: usize,
}

#[async_trait]
impl<D: Send + Sync + 'static> Handler<D> for FlowStep<D> {
    async fn handle(&self, ctx: &Ctx<'_, D>) -> HandlerResult {
        self.flow.advance(self.index, ctx).await
    }
}

/// Clears the user's state without committing and confirms.
pub struct CancelHandler;

#[async_trait]
impl<D: Send + Sync + 'static> Handler<D> for CancelHandler {
    async fn handle(&self, ctx: &Ctx<'_, D>) -> HandlerResult {
        ctx.clear_state().await?;
        if let Some(tag) = &ctx.state.tag {
            log::debug!("User {} cancelled {}", ctx.user_id(), tag);
        }
        ctx.reply_message(&OutboundMessage::text(ctx.t("flow-cancelled"))).await
    }
}
