//! Dispatcher schema: every update goes through the [`Engine`].

use std::sync::Arc;

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, Message};

use flowcore::Engine;

use super::adapter::{event_from_callback, event_from_message};
use crate::handlers::AppDeps;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Creates the teloxide handler tree. The engine never fails, so neither does the tree.
pub fn schema(engine: Arc<Engine<AppDeps>>) -> UpdateHandler<HandlerError> {
    dptree::entry()
        .branch(message_handler(Arc::clone(&engine)))
        .branch(callback_handler(engine))
}

fn message_handler(engine: Arc<Engine<AppDeps>>) -> UpdateHandler<HandlerError> {
    Update::filter_message().endpoint(move |msg: Message| {
        let engine = Arc::clone(&engine);
        async move {
            match event_from_message(&msg) {
                Some(event) => {
                    engine.handle(event).await;
                }
                None => log::debug!("Ignoring message {} in chat {}", msg.id.0, msg.chat.id.0),
            }
            Ok(())
        }
    })
}

fn callback_handler(engine: Arc<Engine<AppDeps>>) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(move |q: CallbackQuery| {
        let engine = Arc::clone(&engine);
        async move {
            if let Some(event) = event_from_callback(&q) {
                engine.handle(event).await;
            }
            Ok(())
        }
    })
}
