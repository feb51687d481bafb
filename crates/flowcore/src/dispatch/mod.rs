//! Routes an enriched event to exactly one registered handler.
//!
//! Precedence: routes bound to the user's current state tag are tried before
//! stateless routes; within each group the first registered route wins.

use std::sync::Arc;

use async_trait::async_trait;
use unic_langid::LanguageIdentifier;

use crate::core::error::HandlerResult;
use crate::core::types::{ContentType, EventKind, InboundEvent, UserId};
use crate::gateway::{OutboundMessage, Outbox};
use crate::i18n;
use crate::identity::User;
use crate::state::{ConversationState, StateStore, StateTag};

/// Everything a handler gets for one event.
pub struct Ctx<'a, D> {
    pub event: &'a InboundEvent,
    pub user: &'a User,
    /// Snapshot taken before dispatch; write through `states`
    pub state: &'a ConversationState,
    pub states: &'a dyn StateStore,
    pub outbox: &'a Outbox,
    pub deps: &'a D,
}

impl<D> Ctx<'_, D> {
    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn lang(&self) -> LanguageIdentifier {
        self.user.language()
    }

    /// Localized string in the user's language.
    pub fn t(&self, key: &str) -> String {
        i18n::t(&self.lang(), key)
    }

    pub async fn reply(&self, text: impl Into<String>) -> HandlerResult {
        self.outbox.send_text(self.user.id, text).await?;
        Ok(())
    }

    pub async fn reply_message(&self, message: &OutboundMessage) -> HandlerResult {
        self.outbox.send(self.user.id, message).await?;
        Ok(())
    }

    pub async fn clear_state(&self) -> HandlerResult {
        self.states.clear(self.user.id).await?;
        Ok(())
    }
}

#[async_trait]
pub trait Handler<D>: Send + Sync {
    async fn handle(&self, ctx: &Ctx<'_, D>) -> HandlerResult;
}

/// Match predicate of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/name`, compared case-insensitively
    Command(String),
    /// Callback payload equality
    Callback(String),
    /// Callback payload prefix, e.g. `category_`
    CallbackPrefix(String),
    /// Messages whose content type is in the set; `Text` means non-command text
    Content(Vec<ContentType>),
    /// Anything
    Any,
}

impl Route {
    pub fn command(name: &str) -> Self {
        Route::Command(name.trim_start_matches('/').to_lowercase())
    }

    pub fn callback(data: impl Into<String>) -> Self {
        Route::Callback(data.into())
    }

    pub fn callback_prefix(prefix: impl Into<String>) -> Self {
        Route::CallbackPrefix(prefix.into())
    }

    pub fn text() -> Self {
        Route::Content(vec![ContentType::Text])
    }

    pub fn content(types: impl IntoIterator<Item = ContentType>) -> Self {
        Route::Content(types.into_iter().collect())
    }

    pub fn matches(&self, event: &InboundEvent) -> bool {
        match (self, &event.kind) {
            (Route::Any, _) => true,
            (Route::Command(name), EventKind::Command { name: got, .. }) => name == got,
            (Route::Callback(data), EventKind::Callback { data: got, .. }) => data == got,
            (Route::CallbackPrefix(prefix), EventKind::Callback { data, .. }) => data.starts_with(prefix.as_str()),
            (Route::Content(types), _) => event.content_type().is_some_and(|ct| types.contains(&ct)),
            _ => false,
        }
    }
}

struct Registration<D> {
    name: &'static str,
    route: Route,
    state: Option<StateTag>,
    handler: Arc<dyn Handler<D>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Handled(&'static str),
    Unmatched,
}

pub struct Dispatcher<D> {
    routes: Vec<Registration<D>>,
}

impl<D> Default for Dispatcher<D> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<D: Send + Sync> Dispatcher<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stateless route.
    pub fn on(&mut self, name: &'static str, route: Route, handler: impl Handler<D> + 'static) -> &mut Self {
        self.on_arc(name, route, None, Arc::new(handler))
    }

    /// Registers a route that only matches while the user is in `tag`.
    pub fn on_state(
        &mut self,
        name: &'static str,
        tag: StateTag,
        route: Route,
        handler: impl Handler<D> + 'static,
    ) -> &mut Self {
        self.on_arc(name, route, Some(tag), Arc::new(handler))
    }

    pub fn on_arc(
        &mut self,
        name: &'static str,
        route: Route,
        state: Option<StateTag>,
        handler: Arc<dyn Handler<D>>,
    ) -> &mut Self {
        self.routes.push(Registration {
            name,
            route,
            state,
            handler,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Name of the handler `event` would go to, without running it.
    pub fn select(&self, event: &InboundEvent, state: &ConversationState) -> Option<&'static str> {
        self.find(event, state).map(|reg| reg.name)
    }

    fn find(&self, event: &InboundEvent, state: &ConversationState) -> Option<&Registration<D>> {
        let stateful = state.tag.as_ref().and_then(|tag| {
            self.routes
                .iter()
                .find(|reg| reg.state.as_ref() == Some(tag) && reg.route.matches(event))
        });
        stateful.or_else(|| {
            self.routes
                .iter()
                .find(|reg| reg.state.is_none() && reg.route.matches(event))
        })
    }

    pub async fn dispatch(&self, ctx: &Ctx<'_, D>) -> HandlerResult<Dispatched> {
        let Some(reg) = self.find(ctx.event, ctx.state) else {
            return Ok(Dispatched::Unmatched);
        };
        log::debug!("User {} -> handler {}", ctx.user.id, reg.name);
        reg.handler.handle(ctx).await?;
        Ok(Dispatched::Handled(reg.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MediaRef, Profile};

    struct Noop;

    #[async_trait]
    impl Handler<()> for Noop {
        async fn handle(&self, _ctx: &Ctx<'_, ()>) -> HandlerResult {
            Ok(())
        }
    }

    fn event(kind: EventKind) -> InboundEvent {
        InboundEvent::new(UserId(1), Profile::named("Ann"), kind)
    }

    fn in_state(tag: &'static str) -> ConversationState {
        ConversationState {
            tag: Some(StateTag::from_static(tag)),
            ..ConversationState::default()
        }
    }

    #[test]
    fn test_route_matching() {
        let cmd = event(EventKind::from_text("/start"));
        let text = event(EventKind::Text("hello".into()));
        let cb = event(EventKind::Callback {
            id: "1".into(),
            data: "category_3".into(),
        });
        let photo = event(EventKind::Media {
            media: MediaRef {
                file_id: "f".into(),
                kind: ContentType::Photo,
            },
            caption: None,
        });

        assert!(Route::command("/Start").matches(&cmd));
        assert!(!Route::text().matches(&cmd));
        assert!(Route::text().matches(&text));
        assert!(Route::callback_prefix("category_").matches(&cb));
        assert!(!Route::callback("category_").matches(&cb));
        assert!(Route::content([ContentType::Text, ContentType::Photo]).matches(&photo));
        assert!(!Route::text().matches(&photo));
        assert!(Route::Any.matches(&cb));
    }

    #[test]
    fn test_state_route_wins_over_stateless() {
        let mut dispatcher = Dispatcher::<()>::new();
        dispatcher
            .on("echo", Route::text(), Noop)
            .on_state("awaiting", StateTag::from_static("chat.awaiting"), Route::text(), Noop);

        let text = event(EventKind::Text("hi".into()));
        assert_eq!(dispatcher.select(&text, &in_state("chat.awaiting")), Some("awaiting"));
        assert_eq!(dispatcher.select(&text, &ConversationState::default()), Some("echo"));
        // other states fall back to stateless routes
        assert_eq!(dispatcher.select(&text, &in_state("other")), Some("echo"));
    }

    #[test]
    fn test_first_registered_wins() {
        let mut dispatcher = Dispatcher::<()>::new();
        dispatcher
            .on("first", Route::Any, Noop)
            .on("second", Route::text(), Noop);

        let text = event(EventKind::Text("hi".into()));
        assert_eq!(dispatcher.select(&text, &ConversationState::default()), Some("first"));
    }

    #[test]
    fn test_no_match() {
        let mut dispatcher = Dispatcher::<()>::new();
        dispatcher.on("start", Route::command("start"), Noop);

        let text = event(EventKind::Text("hi".into()));
        assert_eq!(dispatcher.select(&text, &ConversationState::default()), None);
    }
}
