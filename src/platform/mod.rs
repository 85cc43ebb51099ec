pub mod telegram;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Chat transports the relay knows about. Used as the registry key, so at
/// most one adapter per variant can be live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(dead_code)]
pub enum PlatformType {
    Telegram,
    Whatsapp,
    Signal,
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformType::Telegram => write!(f, "telegram"),
            PlatformType::Whatsapp => write!(f, "whatsapp"),
            PlatformType::Signal => write!(f, "signal"),
        }
    }
}

/// A message received from any platform
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Platform-specific user ID as string
    pub sender_id: String,
    /// Platform-specific chat/channel ID as string
    pub conversation_id: String,
    /// The message text, empty when the event carried none
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub platform: PlatformType,
}

/// An image to deliver after the response text.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub data: Vec<u8>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingResponse {
    pub text: Option<String>,
    pub images: Vec<ImageAttachment>,
}

impl OutgoingResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            images: Vec::new(),
        }
    }
}

/// Callback invoked for every normalized inbound message.
pub type MessageHandler = Arc<dyn Fn(IncomingMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Capability contract every chat transport implements.
///
/// Adapters own their connection; the router only talks to them through this
/// trait, so adding a transport never touches routing code.
#[async_trait]
pub trait MessagingPlatform: Send + Sync {
    fn platform_type(&self) -> PlatformType;

    /// Start receiving inbound events. Called once.
    async fn initialize(&self) -> Result<()>;

    /// Release the connection. Must tolerate a failed or missing `initialize`.
    async fn shutdown(&self) -> Result<()>;

    /// Install the inbound handler, replacing any previous one.
    fn on_message(&self, handler: MessageHandler);

    /// Send the text (if any), then each image in order. A failing image is
    /// logged and skipped; a failing text fails the call.
    async fn send_response(
        &self,
        conversation_id: &str,
        response: &OutgoingResponse,
    ) -> Result<()>;

    /// Best-effort typing indicator. Transport failures are logged, not returned.
    async fn send_typing_indicator(&self, conversation_id: &str) -> Result<()>;

    /// Whitelist membership. Unparsable IDs are unauthorized.
    fn is_authorized(&self, sender_id: &str) -> bool;
}
