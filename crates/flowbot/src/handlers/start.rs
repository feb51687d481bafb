use async_trait::async_trait;

use flowcore::core::error::HandlerResult;
use flowcore::dispatch::{Dispatcher, Handler, Route};

use super::{AppDeps, Ctx};

pub fn register(dispatcher: &mut Dispatcher<AppDeps>) {
    dispatcher.on("start", Route::command("start"), Start);
}

/// `/start`: the bot description. Leaves whatever the user was doing.
pub struct Start;

#[async_trait]
impl Handler<AppDeps> for Start {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        ctx.clear_state().await?;
        ctx.reply(ctx.t("start-description")).await
    }
}
