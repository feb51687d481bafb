use async_trait::async_trait;

use flowcore::core::error::HandlerResult;
use flowcore::dispatch::{Dispatcher, Handler, Route};
use flowcore::gateway::{Button, OutboundMessage};
use flowcore::i18n::{self, SUPPORTED_LANGS};

use super::{AppDeps, Ctx};

pub const LANGUAGE: &str = "language";
pub const LANG_PREFIX: &str = "lang_";

pub fn register(dispatcher: &mut Dispatcher<AppDeps>) {
    dispatcher
        .on("language.menu", Route::callback(LANGUAGE), LanguageMenu)
        .on("language.set", Route::callback_prefix(LANG_PREFIX), SetLanguage);
}

pub struct LanguageMenu;

#[async_trait]
impl Handler<AppDeps> for LanguageMenu {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        let rows = SUPPORTED_LANGS
            .iter()
            .map(|(code, name)| vec![Button::callback(*name, format!("{}{}", LANG_PREFIX, code))])
            .collect();
        ctx.reply_message(&OutboundMessage::text(ctx.t("language-choose")).with_keyboard(rows))
            .await
    }
}

pub struct SetLanguage;

#[async_trait]
impl Handler<AppDeps> for SetLanguage {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        let requested = ctx
            .event
            .callback_data()
            .and_then(|data| data.strip_prefix(LANG_PREFIX))
            .unwrap_or_default();
        let Some(code) = i18n::is_language_supported(requested) else {
            log::warn!("User {} picked unsupported language {:?}", ctx.user_id(), requested);
            return Ok(());
        };

        ctx.deps.identity.set_language(ctx.user_id(), code).await?;
        log::info!("User {} switched language to {}", ctx.user_id(), code);

        // reply in the new language
        let mut args = i18n::FluentArgs::new();
        args.set("language", i18n::language_name(code).to_string());
        ctx.reply(i18n::t_args(&i18n::lang_from_code(code), "language-changed", &args))
            .await
    }
}
