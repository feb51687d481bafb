//! Admin menu, grant/block/unblock flows and the settings summary.
//!
//! Every entry point is wrapped in [`AdminOnly`]; the flow steps themselves
//! are only reachable through those entries.

use async_trait::async_trait;

use flowcore::bag;
use flowcore::core::error::{DispatchError, HandlerResult};
use flowcore::core::types::UserId;
use flowcore::dispatch::{Dispatcher, Handler, Route};
use flowcore::flow::{cancel_row, Commit, Flow, Step};
use flowcore::gateway::{Button, OutboundMessage};
use flowcore::i18n;
use flowcore::identity::Role;
use flowcore::state::{DataBag, StateTag};

use super::{public_message, AdminOnly, AppDeps, Ctx};

pub const ADD_ADMIN: &str = "add_admin";
pub const BLOCK_USER: &str = "block_user";
pub const UNBLOCK_USER: &str = "unblock_user";
pub const ABOUT: &str = "about";

pub fn register(dispatcher: &mut Dispatcher<AppDeps>) {
    dispatcher
        .on("admin.menu", Route::command("admin"), AdminOnly(AdminMenu))
        .on("admin.about", Route::callback(ABOUT), AdminOnly(About));

    for (action, tag, callback) in [
        (UserAction::Grant, "admin.grant.user_id", ADD_ADMIN),
        (UserAction::Block, "admin.block.user_id", BLOCK_USER),
        (UserAction::Unblock, "admin.unblock.user_id", UNBLOCK_USER),
    ] {
        let flow = Flow::builder(action.flow_name())
            .step(UserIdStep(StateTag::from_static(tag)))
            .commit(ApplyUserAction(action));
        dispatcher.on(action.flow_name(), Route::callback(callback), AdminOnly(flow.entry()));
        flow.register_steps(dispatcher);
    }
}

fn admin_menu(ctx: &Ctx<'_>) -> OutboundMessage {
    let option = |key: &str, data: &str| vec![Button::callback(ctx.t(key), data)];
    OutboundMessage::text(ctx.t("admin-menu-title")).with_keyboard(vec![
        option("admin-add", ADD_ADMIN),
        option("admin-block", BLOCK_USER),
        option("admin-unblock", UNBLOCK_USER),
        option("admin-public-message", public_message::PUBLIC_MESSAGE),
        option("admin-about", ABOUT),
    ])
}

pub struct AdminMenu;

#[async_trait]
impl Handler<AppDeps> for AdminMenu {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        ctx.clear_state().await?;
        ctx.reply_message(&admin_menu(ctx)).await
    }
}

/// Non-secret runtime settings.
pub struct About;

#[async_trait]
impl Handler<AppDeps> for About {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        let mut text = ctx.t("about-title");
        for (key, value) in ctx.deps.settings.summary() {
            text.push_str(&format!("\n{}: {}", key, value));
        }
        ctx.reply(text).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserAction {
    Grant,
    Block,
    Unblock,
}

impl UserAction {
    fn flow_name(self) -> &'static str {
        match self {
            UserAction::Grant => "admin.grant",
            UserAction::Block => "admin.block",
            UserAction::Unblock => "admin.unblock",
        }
    }
}

/// Asks for a numeric user id.
struct UserIdStep(StateTag);

#[async_trait]
impl Step<AppDeps> for UserIdStep {
    fn tag(&self) -> StateTag {
        self.0.clone()
    }

    async fn prompt(&self, ctx: &Ctx<'_>, _data: &DataBag) -> HandlerResult {
        ctx.reply_message(&OutboundMessage::text(ctx.t("admin-enter-user-id")).with_row(cancel_row(ctx)))
            .await
    }

    async fn capture(&self, ctx: &Ctx<'_>, _data: &DataBag) -> HandlerResult<DataBag> {
        match parse_user_id(ctx.event.text().unwrap_or_default()) {
            Some(id) => Ok(bag! { "user_id" => id }),
            None => Err(DispatchError::Validation(ctx.t("admin-invalid-user-id"))),
        }
    }
}

fn parse_user_id(input: &str) -> Option<i64> {
    input.trim().parse::<i64>().ok().filter(|id| *id > 0)
}

struct ApplyUserAction(UserAction);

#[async_trait]
impl Commit<AppDeps> for ApplyUserAction {
    async fn commit(&self, ctx: &Ctx<'_>, data: DataBag) -> HandlerResult {
        let target = data
            .get("user_id")
            .and_then(|v| v.as_i64())
            .map(UserId)
            .ok_or_else(|| DispatchError::Fatal("admin flow finished without a user id".to_string()))?;
        let identity = &ctx.deps.identity;

        let key = match self.0 {
            UserAction::Grant => {
                identity.set_role(target, Role::Admin).await?;
                "admin-granted"
            }
            UserAction::Block | UserAction::Unblock => {
                let block = self.0 == UserAction::Block;
                match (identity.set_blocked(target, block).await?, block) {
                    (false, _) => "admin-user-not-found",
                    (true, true) => "admin-blocked",
                    (true, false) => "admin-unblocked",
                }
            }
        };
        log::info!("Admin {} ran {:?} on user {} -> {}", ctx.user_id(), self.0, target, key);

        let mut args = i18n::FluentArgs::new();
        args.set("user_id", target.0.to_string());
        ctx.reply(i18n::t_args(&ctx.lang(), key, &args)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_id() {
        assert_eq!(parse_user_id(" 12345 "), Some(12345));
        assert_eq!(parse_user_id("@ann"), None);
        assert_eq!(parse_user_id("-5"), None);
        assert_eq!(parse_user_id(""), None);
    }
}
