//! Shared helpers: the full handler set over a temporary database.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use flowbot::handlers::{self, AppDeps};
use flowcore::assistant::Assistant;
use flowcore::broadcast::BroadcastScheduler;
use flowcore::core::config::{RawSettings, Settings};
use flowcore::core::types::{ContentType, EventKind, InboundEvent, MediaRef, Profile, UserId};
use flowcore::gateway::Outbox;
use flowcore::identity::{IdentityStore, Role};
use flowcore::state::MemoryStateStore;
use flowcore::storage::SqliteStorage;
use flowcore::testing::{RecordingGateway, ScriptedLlm};
use flowcore::{Engine, EngineParts};
use tempfile::TempDir;

pub const TEST_TOKEN: &str = "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw";
pub const ADMIN: i64 = 1;
pub const USER: i64 = 2;

pub fn settings() -> Settings {
    let raw = RawSettings {
        bot_token: Some(TEST_TOKEN.to_string()),
        antiflood_enabled: false,
        ..RawSettings::default()
    };
    Settings::from_raw(raw).unwrap()
}

pub struct Bot {
    pub engine: Engine<AppDeps>,
    pub db: SqliteStorage,
    pub gateway: Arc<RecordingGateway>,
    pub llm: Arc<ScriptedLlm>,
    pub states: Arc<MemoryStateStore>,
    _dir: TempDir,
}

impl Bot {
    /// Bot whose assistant always answers `reply`. User [`ADMIN`] is an admin.
    pub async fn new(reply: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bot.sqlite");
        let db = SqliteStorage::open(path.to_str().unwrap()).unwrap();
        db.set_role(UserId(ADMIN), Role::Admin).await.unwrap();

        let settings = Arc::new(settings());
        let gateway = Arc::new(RecordingGateway::new());
        let outbox = Outbox::new(gateway.clone(), Duration::from_secs(2));
        let llm = Arc::new(ScriptedLlm::new(reply));
        let states = Arc::new(MemoryStateStore::new());

        let deps = AppDeps {
            settings: Arc::clone(&settings),
            identity: Arc::new(db.clone()),
            items: Arc::new(db.clone()),
            assistant: Arc::new(Assistant::new(llm.clone(), Arc::new(db.clone()), &settings)),
            scheduler: Arc::new(BroadcastScheduler::new(outbox.clone()).with_store(Arc::new(db.clone()))),
        };
        let engine = Engine::new(
            &settings,
            EngineParts {
                identity: Arc::new(db.clone()),
                states: states.clone(),
                events: Some(Arc::new(db.clone())),
                outbox,
                dispatcher: handlers::dispatcher(),
                deps,
            },
        );

        Self {
            engine,
            db,
            gateway,
            llm,
            states,
            _dir: dir,
        }
    }

    pub fn last_text(&self, user: i64) -> String {
        self.gateway.last_text(UserId(user)).unwrap_or_default()
    }
}

pub fn profile(user: i64) -> Profile {
    Profile {
        username: Some(format!("user{}", user)),
        language_code: Some("en".to_string()),
        ..Profile::named("Ann")
    }
}

pub fn text(user: i64, text: &str) -> InboundEvent {
    InboundEvent::new(UserId(user), profile(user), EventKind::from_text(text))
}

pub fn callback(user: i64, data: &str) -> InboundEvent {
    InboundEvent::new(
        UserId(user),
        profile(user),
        EventKind::Callback {
            id: format!("cb-{}-{}", user, data),
            data: data.to_string(),
        },
    )
}

pub fn photo(user: i64, file_id: &str, caption: Option<&str>) -> InboundEvent {
    InboundEvent::new(
        UserId(user),
        profile(user),
        EventKind::Media {
            media: MediaRef {
                file_id: file_id.to_string(),
                kind: ContentType::Photo,
            },
            caption: caption.map(str::to_string),
        },
    )
}

pub fn voice(user: i64) -> InboundEvent {
    InboundEvent::new(
        UserId(user),
        profile(user),
        EventKind::Media {
            media: MediaRef {
                file_id: "voice-1".to_string(),
                kind: ContentType::Voice,
            },
            caption: None,
        },
    )
}
