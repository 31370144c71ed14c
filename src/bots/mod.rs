//! Chat bots: command parsing on the chat side, and the registry a bot
//! worker uses to answer commands.

mod dispatcher;
mod parser;
pub mod stock;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::payload::{BotCommandPayload, MessagePayload};

pub use dispatcher::{BotDispatcher, NOT_CONFIGURED};
pub use parser::BotCommandParser;
pub use stock::StockBot;

/// A user-facing failure. The text is shown verbatim in the room.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BotError(pub String);

impl BotError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[async_trait]
pub trait Bot: Send + Sync {
    /// The command name this bot answers to, without the prefix symbol.
    fn command(&self) -> &str;

    async fn process_command(&self, argument: &str) -> Result<String, BotError>;
}

/// Bots keyed by command name.
#[derive(Default, Clone)]
pub struct BotRegistry {
    bots: HashMap<String, Arc<dyn Bot>>,
}

impl BotRegistry {
    pub fn register(&mut self, bot: impl Bot + 'static) {
        self.bots.insert(bot.command().to_owned(), Arc::new(bot));
    }

    pub fn with(mut self, bot: impl Bot + 'static) -> Self {
        self.register(bot);
        self
    }

    pub fn get(&self, command: &str) -> Option<&Arc<dyn Bot>> {
        self.bots.get(command)
    }

    /// Runs the matching bot and wraps the outcome as a frame for the
    /// originating room.
    pub async fn respond(&self, request: &BotCommandPayload) -> MessagePayload {
        let Some(bot) = self.get(&request.command) else {
            return MessagePayload::error(
                request.room_id,
                format!("{} is not a recognized bot command", request.command),
            );
        };

        match bot.process_command(&request.argument).await {
            Ok(answer) => MessagePayload::bot_response(request.room_id, answer),
            Err(err) => MessagePayload::error(request.room_id, err.to_string()),
        }
    }
}
