use std::sync::Arc;

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, error, info, warn};

use crate::analyst::{AnalysisResponse, AnalysisService, AnalystError, MSG_UNEXPECTED};
use crate::platform::{ImageAttachment, IncomingMessage, MessagingPlatform, OutgoingResponse};

pub const EMPTY_PROMPT_REPLY: &str = "Please send a question about the data.";

/// Turn an analysis into something a platform can deliver. Charts keep their
/// order; a chart whose payload is not valid base64 is dropped.
pub fn to_outgoing(analysis: AnalysisResponse) -> OutgoingResponse {
    let images = analysis
        .charts
        .into_iter()
        .filter_map(|chart| match STANDARD.decode(chart.image_base64.trim()) {
            Ok(data) => Some(ImageAttachment {
                data,
                caption: Some(chart.title),
            }),
            Err(e) => {
                warn!("Skipping chart {:?} with invalid image data: {}", chart.title, e);
                None
            }
        })
        .collect();

    OutgoingResponse {
        text: Some(analysis.explanation).filter(|t| !t.is_empty()),
        images,
    }
}

/// User-facing text for a failed message: classified service errors verbatim,
/// everything else collapses to the generic fallback.
fn error_reply(err: &anyhow::Error) -> &str {
    match err.downcast_ref::<AnalystError>() {
        Some(analyst_err) => &analyst_err.message,
        None => MSG_UNEXPECTED,
    }
}

/// Platform-agnostic pipeline: validate, analyze, deliver. Stateless apart
/// from the analysis service handle.
pub struct MessageProcessor {
    analyst: Arc<dyn AnalysisService>,
}

impl MessageProcessor {
    pub fn new(analyst: Arc<dyn AnalysisService>) -> Self {
        Self { analyst }
    }

    /// Handle one inbound message end to end. Never fails; every error ends
    /// up as a reply to the user or a log line.
    pub async fn process_message(
        &self,
        message: &IncomingMessage,
        platform: &dyn MessagingPlatform,
    ) {
        info!(
            "Processing {} message from {} in {}",
            message.platform, message.sender_id, message.conversation_id
        );
        debug!("Message ({}): {}", message.timestamp, message.text);

        if message.text.trim().is_empty() {
            let reply = OutgoingResponse::text(EMPTY_PROMPT_REPLY);
            if let Err(e) = platform.send_response(&message.conversation_id, &reply).await {
                error!("Failed to send empty-prompt reply: {:#}", e);
            }
            return;
        }

        match self.analyze_and_reply(message, platform).await {
            Ok(()) => info!("Message from {} processed successfully", message.sender_id),
            Err(e) => {
                match e.downcast_ref::<AnalystError>() {
                    Some(analyst_err) => error!(
                        "Analysis failed ({:?}, status {:?}): {}",
                        analyst_err.kind,
                        analyst_err.status,
                        analyst_err.detail.as_deref().unwrap_or("-")
                    ),
                    None => error!("Error processing message: {:#}", e),
                }

                let reply = OutgoingResponse::text(error_reply(&e));
                if let Err(send_err) = platform
                    .send_response(&message.conversation_id, &reply)
                    .await
                {
                    error!("Failed to send error message to user: {:#}", send_err);
                }
            }
        }
    }

    async fn analyze_and_reply(
        &self,
        message: &IncomingMessage,
        platform: &dyn MessagingPlatform,
    ) -> Result<()> {
        if let Err(e) = platform.send_typing_indicator(&message.conversation_id).await {
            warn!("Typing indicator failed: {:#}", e);
        }

        let analysis = self.analyst.analyze_prompt(&message.text).await?;
        let response = to_outgoing(analysis);

        platform.send_response(&message.conversation_id, &response).await
    }
}
