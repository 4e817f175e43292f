//! Messages exchanged with the extension runtime and the runtime handle the
//! content script talks through.

use crate::config::ScanConfigPatch;
use crate::detection::DetectionResult;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Inbound messages from the popup or background process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeMessage {
    ScanPage,
    ToggleExtension { enabled: bool },
    UpdateConfig { config: ScanConfigPatch },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Fire-and-forget notifications sent to the background process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    DetectionResult { data: DetectionResult },
}

#[async_trait]
pub trait ExtensionRuntime: Send + Sync {
    /// The extension id. Fails or yields nothing once the extension has been
    /// reloaded underneath the page.
    fn runtime_id(&self) -> Result<Option<String>>;

    async fn send_message(&self, message: OutboundMessage) -> Result<()>;

    fn open_options_page(&self) -> Result<()>;
}

/// Runtime whose outbound messages land on a tokio channel.
pub struct ChannelRuntime {
    id: String,
    tx: mpsc::Sender<OutboundMessage>,
    invalidated: AtomicBool,
    options_opened: AtomicUsize,
}

impl ChannelRuntime {
    pub fn new(id: impl Into<String>, buffer: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: id.into(),
                tx,
                invalidated: AtomicBool::new(false),
                options_opened: AtomicUsize::new(0),
            },
            rx,
        )
    }

    /// Simulates the extension being reloaded or updated.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    pub fn options_opened(&self) -> usize {
        self.options_opened.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> Result<()> {
        if self.invalidated.load(Ordering::SeqCst) {
            return Err(anyhow!("Extension context invalidated"));
        }
        Ok(())
    }
}

#[async_trait]
impl ExtensionRuntime for ChannelRuntime {
    fn runtime_id(&self) -> Result<Option<String>> {
        self.check_alive()?;
        Ok(Some(self.id.clone()))
    }

    async fn send_message(&self, message: OutboundMessage) -> Result<()> {
        self.check_alive()?;
        self.tx
            .send(message)
            .await
            .map_err(|_| anyhow!("Receiving end does not exist"))
    }

    fn open_options_page(&self) -> Result<()> {
        self.check_alive()?;
        self.options_opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
