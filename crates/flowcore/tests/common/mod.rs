//! Shared helpers for flowcore integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use flowcore::core::config::{RawSettings, Settings};
use flowcore::core::types::{EventKind, InboundEvent, Profile, UserId};
use flowcore::dispatch::Dispatcher;
use flowcore::gateway::Outbox;
use flowcore::state::MemoryStateStore;
use flowcore::storage::SqliteStorage;
use flowcore::testing::RecordingGateway;
use flowcore::{Engine, EngineParts};
use tempfile::TempDir;

pub const TEST_TOKEN: &str = "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw";

/// Settings for tests: antiflood off unless a test turns it on.
pub fn settings() -> Settings {
    settings_with(|raw| raw.antiflood_enabled = false)
}

pub fn settings_with(tweak: impl FnOnce(&mut RawSettings)) -> Settings {
    let mut raw = RawSettings {
        bot_token: Some(TEST_TOKEN.to_string()),
        ..RawSettings::default()
    };
    tweak(&mut raw);
    Settings::from_raw(raw).unwrap()
}

/// Temporary SQLite database, in-memory state and a recording gateway.
pub struct Harness {
    pub db: SqliteStorage,
    pub gateway: Arc<RecordingGateway>,
    pub outbox: Outbox,
    pub states: Arc<MemoryStateStore>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.sqlite");
        let db = SqliteStorage::open(path.to_str().unwrap()).unwrap();
        let gateway = Arc::new(RecordingGateway::new());
        let outbox = Outbox::new(gateway.clone(), Duration::from_secs(2));
        Self {
            db,
            gateway,
            outbox,
            states: Arc::new(MemoryStateStore::new()),
            _dir: dir,
        }
    }

    pub fn engine<D: Send + Sync + 'static>(&self, settings: &Settings, dispatcher: Dispatcher<D>, deps: D) -> Engine<D> {
        Engine::new(
            settings,
            EngineParts {
                identity: Arc::new(self.db.clone()),
                states: self.states.clone(),
                events: Some(Arc::new(self.db.clone())),
                outbox: self.outbox.clone(),
                dispatcher,
                deps,
            },
        )
    }
}

pub fn profile() -> Profile {
    Profile {
        username: Some("ann".to_string()),
        language_code: Some("en".to_string()),
        ..Profile::named("Ann")
    }
}

pub fn text(user: i64, text: &str) -> InboundEvent {
    InboundEvent::new(UserId(user), profile(), EventKind::from_text(text))
}

pub fn callback(user: i64, data: &str) -> InboundEvent {
    InboundEvent::new(
        UserId(user),
        profile(),
        EventKind::Callback {
            id: format!("cb-{}-{}", user, data),
            data: data.to_string(),
        },
    )
}
