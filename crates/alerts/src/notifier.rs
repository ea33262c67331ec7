//! Outbound delivery of scheduler notifications.

use async_trait::async_trait;
use pricebot_engine::{Notifier, NotifyError};
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::requests::Request;
use teloxide::types::ParseMode;
use teloxide::{ApiError, RequestError};
use tracing::debug;

/// Sends scheduler notifications through the Telegram Bot API.
///
/// Every send carries its own timeout; an expired deadline is that
/// delivery's failure, never a cycle-wide one.
pub struct TelegramNotifier {
    bot: Bot,
    timeout: Duration,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, timeout: Duration) -> Self {
        Self { bot, timeout }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        let request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);

        match tokio::time::timeout(self.timeout, request.send()).await {
            Err(_) => Err(NotifyError::Timeout),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(RequestError::Api(api))) => match api {
                ApiError::BotBlocked
                | ApiError::ChatNotFound
                | ApiError::UserDeactivated
                | ApiError::BotKicked
                | ApiError::BotKickedFromSupergroup => {
                    debug!(chat = chat_id, error = %api, "chat unreachable");
                    Err(NotifyError::Blocked)
                }
                other => Err(NotifyError::Send(other.to_string())),
            },
            Ok(Err(e)) => Err(NotifyError::Send(e.to_string())),
        }
    }
}
