//! WebSocket transport to the Gemini Live endpoint.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use growthlab_core::GeminiSettings;
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{LiveError, LiveResult};
use crate::frame::AudioFrame;
use crate::message::{
    parse_server_message, realtime_audio_message, setup_message, InboundMessage, SessionEventKind,
};
use crate::session::{LinkEvent, LiveConnector, LiveLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the bidirectional generate-content socket. The session reports `Open` once
/// the server acknowledges the setup message.
#[derive(Clone)]
pub struct GeminiLiveConnector {
    url: String,
    api_key: String,
    model: String,
    system_instruction: Option<String>,
}

impl std::fmt::Debug for GeminiLiveConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveConnector")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiLiveConnector {
    pub fn new(settings: &GeminiSettings, api_key: impl Into<String>) -> LiveResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LiveError::Config("live session requires an API key".to_string()));
        }
        Ok(Self {
            url: settings.live_url.clone(),
            api_key,
            model: settings.live_model.clone(),
            system_instruction: None,
        })
    }

    /// Key from `GROWTHLAB_API_KEY`, `GEMINI_API_KEY` or `API_KEY`.
    pub fn from_env(settings: &GeminiSettings) -> LiveResult<Self> {
        let key = GeminiSettings::api_key_from_env().ok_or_else(|| {
            LiveError::Config("set GROWTHLAB_API_KEY or GEMINI_API_KEY".to_string())
        })?;
        Self::new(settings, key)
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    fn endpoint(&self) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.url, sep, self.api_key)
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, events: mpsc::UnboundedSender<LinkEvent>) -> LiveResult<Arc<dyn LiveLink>> {
        let (ws, _response) = connect_async(self.endpoint()).await?;
        let (mut writer, reader) = ws.split();

        let setup = setup_message(&self.model, self.system_instruction.as_deref());
        writer.send(Message::Text(setup.to_string())).await?;
        info!(target: "growthlab::live", model = %self.model, "live socket connected; setup sent");

        let reader = tokio::spawn(read_loop(reader, events));
        Ok(Arc::new(WebSocketLink {
            writer: tokio::sync::Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
        }))
    }
}

/// Translate socket frames into link events until the socket ends.
async fn read_loop(mut reader: SplitStream<WsStream>, events: mpsc::UnboundedSender<LinkEvent>) {
    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    let _ = events.send(LinkEvent::Error("binary frame is not UTF-8 JSON".to_string()));
                    return;
                }
            },
            Ok(Message::Close(close)) => {
                debug!(target: "growthlab::live", ?close, "server closed socket");
                let _ = events.send(LinkEvent::Closed);
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = events.send(LinkEvent::Error(e.to_string()));
                return;
            }
        };

        let messages = match parse_server_message(&text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(target: "growthlab::live", error = %e, "unparseable server message");
                let _ = events.send(LinkEvent::Error(e.to_string()));
                return;
            }
        };
        for message in messages {
            let event = match message {
                InboundMessage::SessionEvent(SessionEventKind::SetupComplete) => LinkEvent::Open,
                other => LinkEvent::Message(other),
            };
            if events.send(event).is_err() {
                return;
            }
        }
    }
    let _ = events.send(LinkEvent::Closed);
}

pub struct WebSocketLink {
    writer: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl LiveLink for WebSocketLink {
    async fn send_audio(&self, frame: &AudioFrame) -> LiveResult<()> {
        let payload = realtime_audio_message(frame).to_string();
        self.writer.lock().await.send(Message::Text(payload)).await?;
        Ok(())
    }

    async fn close(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::Close(None)).await {
            debug!(target: "growthlab::live", error = %e, "close frame not sent");
        }
        let _ = writer.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_carries_key() {
        let settings = GeminiSettings {
            live_url: "wss://example.test/ws".to_string(),
            ..GeminiSettings::default()
        };
        let connector = GeminiLiveConnector::new(&settings, "k123").unwrap();
        assert_eq!(connector.endpoint(), "wss://example.test/ws?key=k123");
        assert!(!format!("{:?}", connector).contains("k123"));
    }

    #[test]
    fn test_empty_key_rejected() {
        let err = GeminiLiveConnector::new(&GeminiSettings::default(), "  ").unwrap_err();
        assert!(matches!(err, LiveError::Config(_)));
    }
}
