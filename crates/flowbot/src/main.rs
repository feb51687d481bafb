use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use teloxide::dispatching::Dispatcher;
use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::update_listeners::Polling;
use tokio_util::sync::CancellationToken;

use flowbot::cli::{Cli, Commands};
use flowbot::handlers::{self, AppDeps};
use flowbot::telegram::{create_bot, schema, setup_bot_commands, TelegramGateway};
use flowcore::assistant::Assistant;
use flowcore::broadcast::{BroadcastScheduler, DeliveryReport};
use flowcore::core::config::{self, Settings};
use flowcore::core::init_logger;
use flowcore::core::types::UserId;
use flowcore::gateway::Outbox;
use flowcore::i18n;
use flowcore::identity::{IdentityStore, Role};
use flowcore::llm;
use flowcore::state::MemoryStateStore;
use flowcore::storage::SqliteStorage;
use flowcore::{Engine, EngineParts};

/// Main entry point for the Telegram bot
///
/// # Errors
/// Returns an error on fatal startup misconfiguration (missing or malformed
/// token, unreadable settings), or when the database cannot be opened.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present
    let _ = dotenv();

    match cli.command() {
        Commands::Run => run_bot().await,
        Commands::Migrate => migrate(),
        Commands::CheckConfig => check_config(),
    }
}

fn load_settings() -> Result<Settings> {
    Settings::load().context("Invalid configuration, refusing to start")
}

fn check_config() -> Result<()> {
    let settings = load_settings()?;
    println!("Configuration OK");
    for (key, value) in settings.summary() {
        println!("  {}: {}", key, value);
    }
    Ok(())
}

fn migrate() -> Result<()> {
    let settings = load_settings()?;
    init_logger(&settings.log_file_path)?;
    SqliteStorage::open(&settings.database_path)
        .with_context(|| format!("Failed to migrate {}", settings.database_path))?;
    log::info!("Migrations applied to {}", settings.database_path);
    Ok(())
}

async fn run_bot() -> Result<()> {
    let settings = Arc::new(load_settings()?);
    init_logger(&settings.log_file_path)?;
    log::info!("Starting flowbot");
    i18n::set_default_language(&settings.default_language);

    let storage = SqliteStorage::open(&settings.database_path)
        .with_context(|| format!("Failed to open database {}", settings.database_path))?;
    bootstrap_superuser(&storage, &settings).await;

    let bot = create_bot(&settings)?;
    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    let outbox = Outbox::new(Arc::new(TelegramGateway::new(bot.clone())), settings.send_timeout);
    let identity: Arc<dyn IdentityStore> = Arc::new(storage.clone());
    let cancel = CancellationToken::new();

    let scheduler = Arc::new(
        BroadcastScheduler::new(outbox.clone())
            .with_store(Arc::new(storage.clone()))
            .with_concurrency(config::scheduler::MAX_CONCURRENT_DELIVERIES),
    );
    match scheduler.restore().await {
        Ok(restored) => log::info!("Restored {} pending broadcasts", restored),
        Err(e) => log::error!("Failed to restore pending broadcasts: {}", e),
    }
    let reports = Arc::clone(&scheduler).start(settings.scheduler_tick, cancel.clone());
    tokio::spawn(forward_reports(reports, outbox.clone(), Arc::clone(&identity)));

    let assistant = Assistant::new(
        llm::client_from_settings(&settings)?,
        Arc::new(storage.clone()),
        &settings,
    );

    let deps = AppDeps {
        settings: Arc::clone(&settings),
        identity: Arc::clone(&identity),
        items: Arc::new(storage.clone()),
        assistant: Arc::new(assistant),
        scheduler,
    };
    let engine = Arc::new(Engine::new(
        &settings,
        EngineParts {
            identity,
            states: Arc::new(MemoryStateStore::new()),
            events: Some(Arc::new(storage.clone())),
            outbox,
            dispatcher: handlers::dispatcher(),
            deps,
        },
    ));
    engine.spawn_rate_limit_cleanup(config::rate_limit::cleanup_interval(), cancel.clone());

    log::info!("Bot started, waiting for updates");
    let listener = Polling::builder(bot.clone()).drop_pending_updates().build();
    Dispatcher::builder(bot, schema(engine))
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("An error from the update listener"),
        )
        .await;

    cancel.cancel();
    log::info!("Bot stopped");
    Ok(())
}

/// Grants the admin role to the configured superuser, by id and by username.
async fn bootstrap_superuser(storage: &SqliteStorage, settings: &Settings) {
    if let Some(id) = settings.superuser_id {
        match storage.set_role(UserId(id), Role::Admin).await {
            Ok(()) => log::info!("Superuser {} has the admin role", id),
            Err(e) => log::error!("Failed to bootstrap superuser {}: {}", id, e),
        }
    }

    if let Some(username) = &settings.superuser_username {
        match storage.find_by_username(username).await {
            Ok(Some(user)) => {
                if let Err(e) = storage.set_role(user.id, Role::Admin).await {
                    log::error!("Failed to grant admin to @{}: {}", username, e);
                }
            }
            Ok(None) => log::warn!("Superuser @{} has not talked to the bot yet", username),
            Err(e) => log::error!("Failed to look up superuser @{}: {}", username, e),
        }
    }
}

/// Tells the author of each broadcast how delivery went.
async fn forward_reports(
    mut reports: tokio::sync::mpsc::UnboundedReceiver<DeliveryReport>,
    outbox: Outbox,
    identity: Arc<dyn IdentityStore>,
) {
    while let Some(report) = reports.recv().await {
        let Some(author) = report.created_by else {
            continue;
        };
        let lang = match identity.get(author).await {
            Ok(Some(user)) => user.language(),
            _ => i18n::default_language().clone(),
        };
        let mut args = i18n::FluentArgs::new();
        args.set("delivered", report.delivered);
        args.set("failed", report.failed);
        let text = i18n::t_args(&lang, "broadcast-delivered", &args);
        if let Err(e) = outbox.send_text(author, text).await {
            log::warn!("Failed to send broadcast report to {}: {}", author, e);
        }
    }
}
