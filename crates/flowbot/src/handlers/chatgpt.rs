//! AI chat mode.
//!
//! While the user is in `chatgpt.awaiting`, text, photos with captions and
//! document captions go to the assistant with the bounded history.

use async_trait::async_trait;

use flowcore::assistant::AskOutcome;
use flowcore::core::error::HandlerResult;
use flowcore::core::types::ContentType;
use flowcore::dispatch::{Dispatcher, Handler, Route};
use flowcore::flow::{cancel_row, CancelHandler, CANCEL};
use flowcore::gateway::OutboundMessage;
use flowcore::llm::ImageInput;
use flowcore::state::StateTag;

use super::{AppDeps, Ctx};

pub const CHATGPT: &str = "chatgpt";
pub const AWAITING: StateTag = StateTag::from_static("chatgpt.awaiting");

pub fn register(dispatcher: &mut Dispatcher<AppDeps>) {
    dispatcher
        .on("chatgpt.enter", Route::callback(CHATGPT), Enter)
        .on_state("chatgpt.stop", AWAITING, Route::command("stop"), Stop)
        .on_state("chatgpt.cancel", AWAITING, Route::callback(CANCEL), CancelHandler)
        .on_state(
            "chatgpt.ask",
            AWAITING,
            Route::content([ContentType::Text, ContentType::Photo, ContentType::Document]),
            Ask,
        )
        .on_state(
            "chatgpt.unsupported",
            AWAITING,
            Route::content([ContentType::Voice, ContentType::Sticker, ContentType::Other]),
            Unsupported,
        );
}

pub struct Enter;

#[async_trait]
impl Handler<AppDeps> for Enter {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        ctx.clear_state().await?;
        ctx.states.set(ctx.user_id(), AWAITING).await?;
        ctx.reply_message(&OutboundMessage::text(ctx.t("chatgpt-start")).with_row(cancel_row(ctx)))
            .await
    }
}

pub struct Stop;

#[async_trait]
impl Handler<AppDeps> for Stop {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        ctx.clear_state().await?;
        ctx.reply(ctx.t("chatgpt-stopped")).await
    }
}

pub struct Ask;

#[async_trait]
impl Handler<AppDeps> for Ask {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        let text = ctx.event.text().unwrap_or_default().trim();

        let image = match ctx.event.media() {
            Some(media) if media.kind == ContentType::Photo => {
                Some(ImageInput::jpeg(ctx.outbox.download(&media.file_id).await?))
            }
            _ => None,
        };

        if text.is_empty() && image.is_none() {
            return ctx.reply(ctx.t("chatgpt-empty")).await;
        }

        match ctx.deps.assistant.ask(ctx.user_id(), text, image).await? {
            AskOutcome::Answered(reply) => ctx.reply(reply).await,
            AskOutcome::LlmFailed(_) => ctx.reply(ctx.t("error-generic")).await,
        }
    }
}

pub struct Unsupported;

#[async_trait]
impl Handler<AppDeps> for Unsupported {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        ctx.reply(ctx.t("chatgpt-unsupported")).await
    }
}
