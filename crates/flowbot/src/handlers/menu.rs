use async_trait::async_trait;

use flowcore::core::error::HandlerResult;
use flowcore::dispatch::{Dispatcher, Handler, Route};
use flowcore::gateway::{Button, OutboundMessage};

use super::{chatgpt, items, language, AppDeps, Ctx};

pub const MENU: &str = "menu";

pub fn register(dispatcher: &mut Dispatcher<AppDeps>) {
    dispatcher
        .on("menu", Route::command("menu"), MainMenu)
        .on("menu", Route::callback(MENU), MainMenu);
}

pub fn main_menu(ctx: &Ctx<'_>) -> OutboundMessage {
    OutboundMessage::text(ctx.t("menu-title")).with_keyboard(vec![
        vec![Button::callback(ctx.t("menu-chatgpt"), chatgpt::CHATGPT)],
        vec![Button::callback(ctx.t("menu-item"), items::ITEM)],
        vec![Button::callback(ctx.t("menu-language"), language::LANGUAGE)],
    ])
}

/// `/menu` and the "main menu" button.
pub struct MainMenu;

#[async_trait]
impl Handler<AppDeps> for MainMenu {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        ctx.clear_state().await?;
        ctx.reply_message(&main_menu(ctx)).await
    }
}
