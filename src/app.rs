use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use tracing::{error, info, warn};

use crate::analyst::AnalysisService;
use crate::platform::{
    IncomingMessage, MessageHandler, MessagingPlatform, OutgoingResponse, PlatformType,
};
use crate::processor::MessageProcessor;

pub const UNAUTHORIZED_REPLY: &str = "You are not authorized to use this bot.";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("platform {0} is already registered")]
    AlreadyRegistered(PlatformType),

    #[error("no platforms registered; register at least one platform before starting")]
    NoPlatforms,
}

/// Owns the platform registry and routes every inbound message through the
/// authorization check and the shared [`MessageProcessor`].
///
/// Registration happens during startup only; afterwards the registry is
/// read-only, so no locking is needed.
pub struct MessagingApp {
    platforms: Vec<Arc<dyn MessagingPlatform>>,
    processor: Arc<MessageProcessor>,
}

impl MessagingApp {
    pub fn new(analyst: Arc<dyn AnalysisService>) -> Self {
        Self {
            platforms: Vec::new(),
            processor: Arc::new(MessageProcessor::new(analyst)),
        }
    }

    /// Add a platform and install its inbound handler. At most one adapter
    /// per [`PlatformType`]; a duplicate leaves the registry untouched.
    pub fn register_platform(
        &mut self,
        platform: Arc<dyn MessagingPlatform>,
    ) -> Result<(), RegistryError> {
        let platform_type = platform.platform_type();
        if self.platforms().contains(&platform_type) {
            return Err(RegistryError::AlreadyRegistered(platform_type));
        }

        // Weak so the adapter holding this handler doesn't keep itself alive.
        let weak = Arc::downgrade(&platform);
        let processor = Arc::clone(&self.processor);
        let handler: MessageHandler =
            Arc::new(move |message: IncomingMessage| -> BoxFuture<'static, ()> {
                let weak = weak.clone();
                let processor = Arc::clone(&processor);
                Box::pin(async move {
                    if let Some(platform) = weak.upgrade() {
                        route_message(&processor, platform.as_ref(), message).await;
                    }
                })
            });
        platform.on_message(handler);

        self.platforms.push(platform);
        info!("{} platform registered", platform_type);
        Ok(())
    }

    /// Registered platform types, in registration order.
    pub fn platforms(&self) -> Vec<PlatformType> {
        self.platforms.iter().map(|p| p.platform_type()).collect()
    }

    /// Initialize every platform in registration order. The first failure
    /// aborts startup; later platforms are not attempted.
    pub async fn start(&self) -> Result<()> {
        info!("Starting messaging platforms...");

        if self.platforms.is_empty() {
            return Err(RegistryError::NoPlatforms.into());
        }

        for platform in &self.platforms {
            let platform_type = platform.platform_type();
            if let Err(e) = platform.initialize().await {
                error!("Failed to initialize {} platform: {:#}", platform_type, e);
                return Err(e)
                    .with_context(|| format!("Failed to initialize {} platform", platform_type));
            }
            info!("{} platform initialized", platform_type);
        }

        info!("All platforms started successfully");
        Ok(())
    }

    /// Shut down every platform. Failures are logged and never stop the rest.
    pub async fn shutdown(&self) {
        info!("Shutting down messaging platforms...");

        for platform in &self.platforms {
            let platform_type = platform.platform_type();
            match platform.shutdown().await {
                Ok(()) => info!("{} platform shut down", platform_type),
                Err(e) => error!("Failed to shut down {} platform: {:#}", platform_type, e),
            }
        }

        info!("All platforms shut down");
    }
}

async fn route_message(
    processor: &MessageProcessor,
    platform: &dyn MessagingPlatform,
    message: IncomingMessage,
) {
    let platform_type = platform.platform_type();

    if !platform.is_authorized(&message.sender_id) {
        warn!(
            "Unauthorized access attempt: {} on {}",
            message.sender_id, platform_type
        );
        let reply = OutgoingResponse::text(UNAUTHORIZED_REPLY);
        if let Err(e) = platform.send_response(&message.conversation_id, &reply).await {
            error!("Failed to send unauthorized reply: {:#}", e);
        }
        return;
    }

    info!("Authorized user: {} on {}", message.sender_id, platform_type);
    processor.process_message(&message, platform).await;
}
