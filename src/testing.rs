//! In-memory fakes shared by unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::analyst::{AnalysisResponse, AnalysisService, AnalystError, AnalystResult};
use crate::platform::{
    IncomingMessage, MessageHandler, MessagingPlatform, OutgoingResponse, PlatformType,
};

/// One outbound call observed by [`RecordingPlatform`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(String, String),
    Photo(String, Vec<u8>, Option<String>),
    Typing(String),
}

/// A platform that records every send instead of talking to a network.
pub struct RecordingPlatform {
    platform: PlatformType,
    allowed: HashSet<String>,
    pub sent: Mutex<Vec<Sent>>,
    handler: Mutex<Option<MessageHandler>>,
    /// Number of upcoming text sends that fail.
    pub fail_texts: AtomicUsize,
    pub fail_initialize: bool,
    pub fail_shutdown: bool,
    pub initialized: AtomicUsize,
    pub shut_down: AtomicUsize,
}

impl RecordingPlatform {
    pub fn new(platform: PlatformType, allowed: &[&str]) -> Self {
        Self {
            platform,
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
            sent: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            fail_texts: AtomicUsize::new(0),
            fail_initialize: false,
            fail_shutdown: false,
            initialized: AtomicUsize::new(0),
            shut_down: AtomicUsize::new(0),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Feed a message through the installed handler, as the transport would.
    pub async fn deliver(&self, sender_id: &str, text: &str) {
        let handler = self.handler.lock().unwrap().clone();
        let handler = handler.expect("no handler installed");
        handler(incoming(self.platform, sender_id, text)).await;
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }
}

pub fn incoming(platform: PlatformType, sender_id: &str, text: &str) -> IncomingMessage {
    IncomingMessage {
        sender_id: sender_id.to_string(),
        conversation_id: sender_id.to_string(),
        text: text.to_string(),
        timestamp: Utc::now(),
        platform,
    }
}

#[async_trait]
impl MessagingPlatform for RecordingPlatform {
    fn platform_type(&self) -> PlatformType {
        self.platform
    }

    async fn initialize(&self) -> Result<()> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        if self.fail_initialize {
            bail!("connection refused");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shut_down.fetch_add(1, Ordering::SeqCst);
        if self.fail_shutdown {
            bail!("already closed");
        }
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    async fn send_response(
        &self,
        conversation_id: &str,
        response: &OutgoingResponse,
    ) -> Result<()> {
        if let Some(text) = &response.text {
            let failing = self
                .fail_texts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                bail!("text send failed");
            }
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Text(conversation_id.to_string(), text.clone()));
        }
        for image in &response.images {
            self.sent.lock().unwrap().push(Sent::Photo(
                conversation_id.to_string(),
                image.data.clone(),
                image.caption.clone(),
            ));
        }
        Ok(())
    }

    async fn send_typing_indicator(&self, conversation_id: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Typing(conversation_id.to_string()));
        Ok(())
    }

    fn is_authorized(&self, sender_id: &str) -> bool {
        self.allowed.contains(sender_id)
    }
}

/// Analysis service returning a canned result and counting calls.
pub struct ScriptedAnalyst {
    result: AnalystResult<AnalysisResponse>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedAnalyst {
    pub fn ok(response: AnalysisResponse) -> Self {
        Self {
            result: Ok(response),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn err(error: AnalystError) -> Self {
        Self {
            result: Err(error),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AnalysisService for ScriptedAnalyst {
    async fn analyze_prompt(&self, prompt: &str) -> AnalystResult<AnalysisResponse> {
        self.calls.lock().unwrap().push(prompt.to_string());
        self.result.clone()
    }
}
