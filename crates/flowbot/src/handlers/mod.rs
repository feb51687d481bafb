//! The bot's handler set, registered into one [`Dispatcher`].

pub mod admin;
pub mod chatgpt;
pub mod items;
pub mod language;
pub mod menu;
pub mod public_message;
pub mod start;

use std::sync::Arc;

use async_trait::async_trait;

use flowcore::assistant::Assistant;
use flowcore::broadcast::BroadcastScheduler;
use flowcore::core::config::Settings;
use flowcore::core::error::HandlerResult;
use flowcore::dispatch::{self, Dispatcher, Handler};
use flowcore::gateway::Button;
use flowcore::identity::IdentityStore;
use flowcore::items::ItemStore;

/// Everything handlers need beyond the per-event context.
pub struct AppDeps {
    pub settings: Arc<Settings>,
    pub identity: Arc<dyn IdentityStore>,
    pub items: Arc<dyn ItemStore>,
    pub assistant: Arc<Assistant>,
    pub scheduler: Arc<BroadcastScheduler>,
}

pub type Ctx<'a> = dispatch::Ctx<'a, AppDeps>;

/// Builds the dispatcher with every route of the bot.
///
/// Order matters only among stateless routes: the first match wins.
pub fn dispatcher() -> Dispatcher<AppDeps> {
    let mut dispatcher = Dispatcher::new();
    start::register(&mut dispatcher);
    menu::register(&mut dispatcher);
    chatgpt::register(&mut dispatcher);
    items::register(&mut dispatcher);
    language::register(&mut dispatcher);
    admin::register(&mut dispatcher);
    public_message::register(&mut dispatcher);
    log::info!("Registered {} routes", dispatcher.len());
    dispatcher
}

/// Row with the "main menu" button.
pub fn menu_row(ctx: &Ctx<'_>) -> Vec<Button> {
    vec![Button::callback(ctx.t("menu-button"), menu::MENU)]
}

/// Runs the inner handler only for admins; everybody else gets a "no rights" notice.
pub struct AdminOnly<H>(pub H);

#[async_trait]
impl<H: Handler<AppDeps>> Handler<AppDeps> for AdminOnly<H> {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        if !ctx.user.is_admin() {
            log::warn!("User {} tried an admin action without rights", ctx.user_id());
            return ctx.reply(ctx.t("admin-no-rights")).await;
        }
        self.0.handle(ctx).await
    }
}
