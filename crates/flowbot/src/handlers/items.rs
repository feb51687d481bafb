//! Item creation flow: category, name, content, then one `items` row.

use async_trait::async_trait;

use flowcore::bag;
use flowcore::core::config;
use flowcore::core::error::{DispatchError, HandlerResult};
use flowcore::core::types::EventKind;
use flowcore::dispatch::{Dispatcher, Route};
use flowcore::flow::{cancel_row, Commit, Flow, Step};
use flowcore::gateway::{Button, OutboundMessage};
use flowcore::i18n;
use flowcore::items::NewItem;
use flowcore::state::{DataBag, StateTag};

use super::{menu_row, AppDeps, Ctx};

pub const ITEM: &str = "item";
pub const CATEGORY_PREFIX: &str = "category_";

pub const CATEGORY: StateTag = StateTag::from_static("item.category");
pub const NAME: StateTag = StateTag::from_static("item.name");
pub const CONTENT: StateTag = StateTag::from_static("item.content");

pub fn flow() -> Flow<AppDeps> {
    Flow::builder("item")
        .step(CategoryStep)
        .step(NameStep)
        .step(ContentStep)
        .commit(CreateItem)
}

pub fn register(dispatcher: &mut Dispatcher<AppDeps>) {
    flow().register(dispatcher, Route::callback(ITEM));
}

struct CategoryStep;

#[async_trait]
impl Step<AppDeps> for CategoryStep {
    fn tag(&self) -> StateTag {
        CATEGORY
    }

    fn accepts(&self) -> Route {
        Route::callback_prefix(CATEGORY_PREFIX)
    }

    async fn prompt(&self, ctx: &Ctx<'_>, _data: &DataBag) -> HandlerResult {
        let categories = ctx.deps.items.categories().await?;
        if categories.is_empty() {
            return ctx
                .reply_message(&OutboundMessage::text(ctx.t("item-no-categories")).with_row(cancel_row(ctx)))
                .await;
        }

        let mut rows: Vec<Vec<Button>> = categories
            .into_iter()
            .map(|c| vec![Button::callback(c.name, format!("{}{}", CATEGORY_PREFIX, c.id))])
            .collect();
        rows.push(cancel_row(ctx));
        ctx.reply_message(&OutboundMessage::text(ctx.t("item-choose-category")).with_keyboard(rows))
            .await
    }

    async fn capture(&self, ctx: &Ctx<'_>, _data: &DataBag) -> HandlerResult<DataBag> {
        let id = ctx
            .event
            .callback_data()
            .and_then(|data| data.strip_prefix(CATEGORY_PREFIX))
            .and_then(|id| id.parse::<i64>().ok());

        let category = match id {
            Some(id) => ctx.deps.items.category(id).await?,
            None => None,
        };
        match category {
            Some(category) => Ok(bag! { "category" => category.id }),
            None => Err(DispatchError::Validation(ctx.t("item-unknown-category"))),
        }
    }
}

struct NameStep;

#[async_trait]
impl Step<AppDeps> for NameStep {
    fn tag(&self) -> StateTag {
        NAME
    }

    async fn prompt(&self, ctx: &Ctx<'_>, _data: &DataBag) -> HandlerResult {
        ctx.reply_message(&OutboundMessage::text(ctx.t("item-enter-name")).with_row(cancel_row(ctx)))
            .await
    }

    async fn capture(&self, ctx: &Ctx<'_>, _data: &DataBag) -> HandlerResult<DataBag> {
        let name = ctx.event.text().unwrap_or_default().trim();
        let len = name.chars().count();
        if len == 0 || len > config::items::MAX_NAME_LENGTH {
            let mut args = i18n::FluentArgs::new();
            args.set("max", config::items::MAX_NAME_LENGTH);
            return Err(DispatchError::Validation(i18n::t_args(&ctx.lang(), "item-name-invalid", &args)));
        }
        Ok(bag! { "name" => name })
    }
}

struct ContentStep;

#[async_trait]
impl Step<AppDeps> for ContentStep {
    fn tag(&self) -> StateTag {
        CONTENT
    }

    async fn prompt(&self, ctx: &Ctx<'_>, _data: &DataBag) -> HandlerResult {
        ctx.reply_message(&OutboundMessage::text(ctx.t("item-enter-content")).with_row(cancel_row(ctx)))
            .await
    }

    async fn capture(&self, ctx: &Ctx<'_>, _data: &DataBag) -> HandlerResult<DataBag> {
        let content = match &ctx.event.kind {
            EventKind::Text(text) => text.trim(),
            _ => "",
        };
        if content.is_empty() {
            return Err(DispatchError::Validation(ctx.t("item-content-empty")));
        }
        Ok(bag! { "content" => content })
    }
}

struct CreateItem;

#[async_trait]
impl Commit<AppDeps> for CreateItem {
    async fn commit(&self, ctx: &Ctx<'_>, data: DataBag) -> HandlerResult {
        let field = |key: &str| {
            data.get(key)
                .cloned()
                .ok_or_else(|| DispatchError::Fatal(format!("item flow finished without {}", key)))
        };
        let category_id = field("category")?
            .as_i64()
            .ok_or_else(|| DispatchError::Fatal("item category is not an id".to_string()))?;
        let name = field("name")?.as_str().unwrap_or_default().to_string();
        let content = field("content")?.as_str().unwrap_or_default().to_string();

        let item = ctx
            .deps
            .items
            .create_item(NewItem {
                owner: ctx.user_id(),
                category_id,
                name,
                content,
            })
            .await?;
        log::info!("User {} created item {} in category {}", ctx.user_id(), item.id, category_id);

        let mut args = i18n::FluentArgs::new();
        args.set("name", item.name.clone());
        let text = i18n::t_args(&ctx.lang(), "item-created", &args);
        ctx.reply_message(&OutboundMessage::text(text).with_row(menu_row(ctx))).await
    }
}
