use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use teloxide::dispatching::ShutdownToken;
use teloxide::error_handlers::ErrorHandler;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile};
use teloxide::update_listeners;
use teloxide::RequestError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::platform::{
    IncomingMessage, MessageHandler, MessagingPlatform, OutgoingResponse, PlatformType,
};

/// Telegram rejects messages over 4096 chars; leave some headroom.
const MAX_MESSAGE_LEN: usize = 4000;

type HandlerSlot = Arc<RwLock<Option<MessageHandler>>>;

/// Split an explanation into Telegram-sized chunks, breaking after a newline
/// or space where possible and never inside a UTF-8 character.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Convert a conversation ID back into Telegram's numeric chat ID.
fn parse_chat_id(conversation_id: &str) -> Result<ChatId> {
    let id = conversation_id
        .trim()
        .parse::<i64>()
        .with_context(|| format!("Invalid Telegram chat ID: {:?}", conversation_id))?;
    Ok(ChatId(id))
}

/// Normalize a Telegram message into the platform-agnostic shape.
fn to_incoming(msg: &Message) -> IncomingMessage {
    IncomingMessage {
        sender_id: msg
            .from
            .as_ref()
            .map(|user| user.id.0.to_string())
            .unwrap_or_default(),
        conversation_id: msg.chat.id.0.to_string(),
        text: msg.text().unwrap_or_default().to_string(),
        timestamp: msg.date,
        platform: PlatformType::Telegram,
    }
}

/// Polling failures are transient; log them and let the listener retry.
struct PollingErrorLogger;

impl ErrorHandler<RequestError> for PollingErrorLogger {
    fn handle_error(self: Arc<Self>, error: RequestError) -> BoxFuture<'static, ()> {
        warn!("Telegram polling error: {}", error);
        Box::pin(async {})
    }
}

async fn dispatch_message(msg: Message, slot: HandlerSlot) -> ResponseResult<()> {
    let handler = slot.read().unwrap_or_else(|e| e.into_inner()).clone();
    let Some(handler) = handler else {
        warn!("Telegram message received but no handler registered");
        return Ok(());
    };

    handler(to_incoming(&msg)).await;
    Ok(())
}

/// Telegram adapter over teloxide long polling.
pub struct TelegramPlatform {
    bot: Bot,
    allowed_user_ids: HashSet<u64>,
    handler: HandlerSlot,
    shutdown_token: Mutex<Option<ShutdownToken>>,
    polling: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramPlatform {
    pub fn new(bot_token: &str, allowed_user_ids: &[u64]) -> Result<Self> {
        if bot_token.trim().is_empty() {
            bail!("Telegram bot token is required");
        }
        if allowed_user_ids.is_empty() {
            bail!("At least one whitelisted user ID is required");
        }

        Ok(Self {
            bot: Bot::new(bot_token),
            allowed_user_ids: allowed_user_ids.iter().copied().collect(),
            handler: Arc::new(RwLock::new(None)),
            shutdown_token: Mutex::new(None),
            polling: Mutex::new(None),
        })
    }
}

#[async_trait]
impl MessagingPlatform for TelegramPlatform {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Telegram
    }

    async fn initialize(&self) -> Result<()> {
        // Fail here rather than inside the polling loop when the token is bad.
        let me = self
            .bot
            .get_me()
            .await
            .context("Failed to connect to Telegram (check the bot token)")?;
        info!("Connected to Telegram as @{}", me.username());

        let handler = Update::filter_message().endpoint(dispatch_message);

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![self.handler.clone()])
            .default_handler(|upd| async move {
                debug!("Unhandled update: {:?}", upd.id);
            })
            .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
            // No per-chat queue: a slow analysis must not hold back the next question
            .distribution_function(|_| None::<std::convert::Infallible>)
            .build();

        *self.shutdown_token.lock().await = Some(dispatcher.shutdown_token());

        let bot = self.bot.clone();
        let task = tokio::spawn(async move {
            let listener = update_listeners::polling_default(bot).await;
            dispatcher
                .dispatch_with_listener(listener, Arc::new(PollingErrorLogger))
                .await;
        });
        *self.polling.lock().await = Some(task);

        info!("Telegram bot is listening for messages...");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let token = self.shutdown_token.lock().await.take();
        let task = self.polling.lock().await.take();

        let graceful = match &token {
            Some(token) => match token.shutdown() {
                Ok(done) => {
                    done.await;
                    true
                }
                // Dispatcher hasn't started polling yet
                Err(_) => false,
            },
            None => false,
        };

        if let Some(task) = task {
            if !graceful {
                task.abort();
            }
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    return Err(e).context("Telegram polling task failed");
                }
            }
        }

        info!("Telegram bot stopped polling");
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.handler.write().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    async fn send_response(
        &self,
        conversation_id: &str,
        response: &OutgoingResponse,
    ) -> Result<()> {
        let chat_id = parse_chat_id(conversation_id)?;

        if let Some(text) = response.text.as_deref().filter(|t| !t.is_empty()) {
            for chunk in split_message(text, MAX_MESSAGE_LEN) {
                if let Err(e) = self.bot.send_message(chat_id, chunk).await {
                    error!("Failed to send text message to {}: {}", chat_id, e);
                    return Err(e).context("Failed to send Telegram text message");
                }
            }
        }

        for image in &response.images {
            let caption = image.caption.as_deref().unwrap_or("(untitled)");
            let photo = InputFile::memory(image.data.clone()).file_name("chart.png");
            let mut request = self.bot.send_photo(chat_id, photo);
            if let Some(c) = &image.caption {
                request = request.caption(c.clone());
            }

            match request.await {
                Ok(_) => info!("Chart sent successfully: {}", caption),
                // Keep going; one bad image must not drop the rest
                Err(e) => error!("Failed to send image {:?}: {}", caption, e),
            }
        }

        Ok(())
    }

    async fn send_typing_indicator(&self, conversation_id: &str) -> Result<()> {
        let chat_id = match parse_chat_id(conversation_id) {
            Ok(id) => id,
            Err(e) => {
                warn!("Skipping typing indicator: {:#}", e);
                return Ok(());
            }
        };

        if let Err(e) = self.bot.send_chat_action(chat_id, ChatAction::Typing).await {
            warn!("Failed to send typing indicator: {}", e);
        }
        Ok(())
    }

    fn is_authorized(&self, sender_id: &str) -> bool {
        match sender_id.trim().parse::<u64>() {
            Ok(id) => self.allowed_user_ids.contains(&id),
            Err(_) => {
                warn!("Invalid Telegram user ID format: {:?}", sender_id);
                false
            }
        }
    }
}
