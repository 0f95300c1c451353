//! Realtime voice protocol shared by the session controller and providers.
//!
//! A provider turns a [`LiveConfig`] into a [`RealtimeConnection`]: an
//! outbound frame sender plus an inbound stream of [`ProviderEvent`]s.
//! Dropping the outbound sender closes the connection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Response modality requested from the realtime model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
}

/// Everything a provider needs to open a realtime session.
///
/// The system instruction is passed through unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    pub model: String,
    pub voice: String,
    pub response_modalities: Vec<Modality>,
    pub system_instruction: String,
}

/// One encoded chunk of microphone audio, ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    pub mime_type: String,
    /// Base64-encoded little-endian 16-bit PCM.
    pub data: String,
}

/// The parts of a server message the session reacts to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMessage {
    /// Base64-encoded reply audio, if the message carried any.
    pub audio: Option<String>,
    /// The user barged in; queued reply audio must stop.
    pub interrupted: bool,
    pub turn_complete: bool,
}

impl ServerMessage {
    pub fn audio(data: impl Into<String>) -> Self {
        Self {
            audio: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Self::default()
        }
    }
}

/// Lifecycle callbacks delivered by a realtime provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Open,
    Message(ServerMessage),
    Error(String),
    Close,
}

/// A connected (or connecting) realtime session.
pub struct RealtimeConnection {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub events: mpsc::UnboundedReceiver<ProviderEvent>,
}

/// A realtime voice provider.
#[async_trait]
pub trait RealtimeProvider: Send + Sync {
    /// Provider identifier (e.g., "google").
    fn id(&self) -> &str;

    /// Start connecting. `ProviderEvent::Open` arrives once the channel is ready.
    async fn connect(&self, config: &LiveConfig) -> anyhow::Result<RealtimeConnection>;
}
