//! Scheduled public messages: sub-menu, scheduling flow and pending list.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

use flowcore::bag;
use flowcore::broadcast::BroadcastPayload;
use flowcore::core::config::scheduler::DATETIME_FORMAT;
use flowcore::core::error::{DispatchError, HandlerResult};
use flowcore::core::types::{ContentType, EventKind};
use flowcore::dispatch::{Dispatcher, Handler, Route};
use flowcore::flow::{cancel_row, Commit, Flow, Step};
use flowcore::gateway::{Button, OutboundMessage};
use flowcore::i18n;
use flowcore::state::{DataBag, StateTag};

use super::{AdminOnly, AppDeps, Ctx};

pub const PUBLIC_MESSAGE: &str = "public_message";
pub const SCHEDULE: &str = "schedule_public_message";
pub const LIST: &str = "list_scheduled_messages";

pub const DATETIME: StateTag = StateTag::from_static("broadcast.datetime");
pub const CONTENT: StateTag = StateTag::from_static("broadcast.content");

const PREVIEW_CHARS: usize = 40;

pub fn flow() -> Flow<AppDeps> {
    Flow::builder("broadcast")
        .step(DatetimeStep)
        .step(ContentStep)
        .commit(ScheduleBroadcast)
}

pub fn register(dispatcher: &mut Dispatcher<AppDeps>) {
    let flow = flow();
    dispatcher
        .on("broadcast.menu", Route::callback(PUBLIC_MESSAGE), AdminOnly(PublicMessageMenu))
        .on("broadcast.list", Route::callback(LIST), AdminOnly(ListScheduled))
        .on("broadcast", Route::callback(SCHEDULE), AdminOnly(flow.entry()));
    flow.register_steps(dispatcher);
}

/// Human label of the configured offset, e.g. `UTC+03:00`.
pub fn timezone_label(tz: &FixedOffset) -> String {
    format!("UTC{}", tz)
}

pub fn format_local(at: DateTime<Utc>, tz: &FixedOffset) -> String {
    at.with_timezone(tz).format(DATETIME_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireAtError {
    Invalid,
    Past,
}

/// Parses `YYYY-MM-DD HH:MM` in `tz`. The result must be after `now`.
pub fn parse_fire_at(input: &str, tz: &FixedOffset, now: DateTime<Utc>) -> Result<DateTime<Utc>, FireAtError> {
    let naive = NaiveDateTime::parse_from_str(input.trim(), DATETIME_FORMAT).map_err(|_| FireAtError::Invalid)?;
    let local = tz.from_local_datetime(&naive).single().ok_or(FireAtError::Invalid)?;
    let at = local.with_timezone(&Utc);
    if at <= now {
        return Err(FireAtError::Past);
    }
    Ok(at)
}

pub struct PublicMessageMenu;

#[async_trait]
impl Handler<AppDeps> for PublicMessageMenu {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        let message = OutboundMessage::text(ctx.t("broadcast-menu-title")).with_keyboard(vec![
            vec![Button::callback(ctx.t("broadcast-schedule-button"), SCHEDULE)],
            vec![Button::callback(ctx.t("broadcast-list-button"), LIST)],
        ]);
        ctx.reply_message(&message).await
    }
}

pub struct ListScheduled;

#[async_trait]
impl Handler<AppDeps> for ListScheduled {
    async fn handle(&self, ctx: &Ctx<'_>) -> HandlerResult {
        let jobs = ctx.deps.scheduler.list_pending().await;
        if jobs.is_empty() {
            return ctx.reply(ctx.t("broadcast-none-scheduled")).await;
        }

        let tz = ctx.deps.settings.timezone;
        let mut text = ctx.t("broadcast-list-title");
        for job in &jobs {
            let preview = match job.payload.text.as_deref().filter(|t| !t.is_empty()) {
                Some(body) => body.chars().take(PREVIEW_CHARS).collect(),
                None => ctx.t("broadcast-photo"),
            };
            text.push_str(&format!(
                "\n- {} ({}): {} [{}]",
                format_local(job.fire_at, &tz),
                timezone_label(&tz),
                preview,
                job.recipients.len()
            ));
        }
        ctx.reply(text).await
    }
}

struct DatetimeStep;

#[async_trait]
impl Step<AppDeps> for DatetimeStep {
    fn tag(&self) -> StateTag {
        DATETIME
    }

    async fn prompt(&self, ctx: &Ctx<'_>, _data: &DataBag) -> HandlerResult {
        let mut args = i18n::FluentArgs::new();
        args.set("timezone", timezone_label(&ctx.deps.settings.timezone));
        let text = i18n::t_args(&ctx.lang(), "broadcast-enter-datetime", &args);
        ctx.reply_message(&OutboundMessage::text(text).with_row(cancel_row(ctx)))
            .await
    }

    async fn capture(&self, ctx: &Ctx<'_>, _data: &DataBag) -> HandlerResult<DataBag> {
        let input = ctx.event.text().unwrap_or_default();
        match parse_fire_at(input, &ctx.deps.settings.timezone, Utc::now()) {
            Ok(at) => Ok(bag! { "fire_at" => at.timestamp() }),
            Err(FireAtError::Invalid) => Err(DispatchError::Validation(ctx.t("broadcast-invalid-datetime"))),
            Err(FireAtError::Past) => Err(DispatchError::Validation(ctx.t("broadcast-past-datetime"))),
        }
    }
}

struct ContentStep;

#[async_trait]
impl Step<AppDeps> for ContentStep {
    fn tag(&self) -> StateTag {
        CONTENT
    }

    fn accepts(&self) -> Route {
        Route::content([ContentType::Text, ContentType::Photo])
    }

    async fn prompt(&self, ctx: &Ctx<'_>, _data: &DataBag) -> HandlerResult {
        ctx.reply_message(&OutboundMessage::text(ctx.t("broadcast-enter-content")).with_row(cancel_row(ctx)))
            .await
    }

    async fn capture(&self, ctx: &Ctx<'_>, _data: &DataBag) -> HandlerResult<DataBag> {
        let mut data = DataBag::new();
        match &ctx.event.kind {
            EventKind::Text(text) if !text.trim().is_empty() => {
                data.insert("text".to_string(), text.clone().into());
            }
            EventKind::Media { media, caption } if media.kind == ContentType::Photo => {
                data.insert("photo".to_string(), media.file_id.clone().into());
                if let Some(caption) = caption.as_ref().filter(|c| !c.is_empty()) {
                    data.insert("text".to_string(), caption.clone().into());
                }
            }
            _ => return Err(DispatchError::Validation(ctx.t("broadcast-empty-content"))),
        }
        Ok(data)
    }
}

struct ScheduleBroadcast;

#[async_trait]
impl Commit<AppDeps> for ScheduleBroadcast {
    async fn commit(&self, ctx: &Ctx<'_>, data: DataBag) -> HandlerResult {
        let fire_at = data
            .get("fire_at")
            .and_then(|v| v.as_i64())
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .ok_or_else(|| DispatchError::Fatal("broadcast flow finished without a time".to_string()))?;
        let payload = BroadcastPayload {
            text: data.get("text").and_then(|v| v.as_str()).map(str::to_string),
            photo: data.get("photo").and_then(|v| v.as_str()).map(str::to_string),
        };
        if payload.is_empty() {
            return Err(DispatchError::Validation(ctx.t("broadcast-empty-content")));
        }

        // recipients are fixed now, not at fire time
        let recipients = ctx.deps.identity.list_active_ids().await?;
        let count = recipients.len();
        ctx.deps
            .scheduler
            .schedule(fire_at, recipients, payload, Some(ctx.user_id()))
            .await?;

        let tz = ctx.deps.settings.timezone;
        let lang = ctx.lang();
        let mut args = i18n::FluentArgs::new();
        args.set("count", count);
        let mut text = i18n::t_args(&lang, "broadcast-scheduled", &args);

        let mut args = i18n::FluentArgs::new();
        args.set("datetime", format_local(fire_at, &tz));
        args.set("timezone", timezone_label(&tz));
        text.push('\n');
        text.push_str(&i18n::t_args(&lang, "broadcast-scheduled-at", &args));
        ctx.reply(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn moscow() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).unwrap()
    }

    #[test]
    fn test_parse_fire_at_in_offset() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let at = parse_fire_at("2026-01-02 12:30", &moscow(), now).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 1, 2, 9, 30, 0).unwrap());
        assert_eq!(format_local(at, &moscow()), "2026-01-02 12:30");
    }

    #[test]
    fn test_parse_fire_at_rejects_bad_input() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_fire_at("tomorrow", &moscow(), now), Err(FireAtError::Invalid));
        assert_eq!(parse_fire_at("2026-13-01 10:00", &moscow(), now), Err(FireAtError::Invalid));
        assert_eq!(parse_fire_at("2025-12-31 10:00", &moscow(), now), Err(FireAtError::Past));
    }

    #[test]
    fn test_timezone_label() {
        assert_eq!(timezone_label(&moscow()), "UTC+03:00");
    }
}
