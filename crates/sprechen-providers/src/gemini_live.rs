//! Gemini Live realtime provider.
//!
//! Opens a WebSocket to `BidiGenerateContent`, sends the `setup` message,
//! and bridges the socket to the session's channels: a writer task drains
//! outbound frames into `realtimeInput` messages, and a reader task turns
//! server messages into [`ProviderEvent`]s.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use sprechen_core::protocol::{
    LiveConfig, Modality, OutboundFrame, ProviderEvent, RealtimeConnection, RealtimeProvider,
    ServerMessage,
};

use crate::GeminiClient;
use crate::wire::{Content, Part, SpeechConfig, first_inline_data};

pub struct GeminiLiveProvider {
    client: GeminiClient,
}

impl GeminiLiveProvider {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

// --- Live wire types ---

#[derive(Debug, Serialize)]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: String,
    generation_config: LiveGenerationConfig<'a>,
    system_instruction: Content,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LiveGenerationConfig<'a> {
    response_modalities: &'a [Modality],
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: [&'a OutboundFrame; 1],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<Content>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

/// The `setup` message that opens a Live session.
pub fn setup_message(config: &LiveConfig) -> serde_json::Result<String> {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };
    serde_json::to_string(&SetupMessage {
        setup: Setup {
            model,
            generation_config: LiveGenerationConfig {
                response_modalities: &config.response_modalities,
                speech_config: SpeechConfig::voice(&config.voice),
            },
            system_instruction: Content::new(vec![Part::text(&config.system_instruction)]),
        },
    })
}

/// One captured frame as a `realtimeInput` message.
pub fn realtime_input_message(frame: &OutboundFrame) -> serde_json::Result<String> {
    serde_json::to_string(&RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [frame],
        },
    })
}

/// Map a server message to a provider event. Shapes the session does not use yield `None`.
pub fn parse_server_message(text: &str) -> Option<ProviderEvent> {
    let message: LiveServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            trace!(%e, "Unparseable Live message");
            return None;
        }
    };

    if message.setup_complete.is_some() {
        return Some(ProviderEvent::Open);
    }

    let content = message.server_content?;
    let audio = content
        .model_turn
        .as_ref()
        .and_then(|turn| first_inline_data(&turn.parts))
        .map(|inline| inline.data.clone());
    Some(ProviderEvent::Message(ServerMessage {
        audio,
        interrupted: content.interrupted,
        turn_complete: content.turn_complete,
    }))
}

#[async_trait]
impl RealtimeProvider for GeminiLiveProvider {
    fn id(&self) -> &str {
        "google"
    }

    async fn connect(&self, config: &LiveConfig) -> anyhow::Result<RealtimeConnection> {
        let setup = setup_message(config)?;

        debug!(model = %config.model, voice = %config.voice, "Connecting to Gemini Live");
        let (ws, _) = connect_async(self.client.live_url())
            .await
            .map_err(|e| anyhow::anyhow!("Gemini Live connect failed: {e}"))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        ws_tx.send(Message::Text(setup.into())).await?;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<ProviderEvent>();

        // Writer: runs until the session drops its sender.
        tokio::spawn(async move {
            let mut sent: u64 = 0;
            while let Some(frame) = outbound_rx.recv().await {
                let text = match realtime_input_message(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(%e, "Failed to encode realtime input");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
                sent += 1;
            }
            let _ = ws_tx.send(Message::Close(None)).await;
            debug!(sent, "Gemini Live writer finished");
        });

        // Reader
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => parse_server_message(text.as_str()),
                    Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => parse_server_message(text),
                        Err(_) => {
                            trace!(bytes = bytes.len(), "Ignoring non-UTF-8 binary frame");
                            None
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        info!(?frame, "Gemini Live closed by server");
                        break;
                    }
                    Ok(_) => None,
                    Err(e) => {
                        let _ = events_tx.send(ProviderEvent::Error(e.to_string()));
                        return;
                    }
                };
                if let Some(event) = event {
                    if events_tx.send(event).is_err() {
                        return;
                    }
                }
            }
            let _ = events_tx.send(ProviderEvent::Close);
        });

        Ok(RealtimeConnection {
            outbound: outbound_tx,
            events: events_rx,
        })
    }
}
