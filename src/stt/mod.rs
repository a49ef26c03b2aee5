//! STTClient (C3, §4.3)
//!
//! Streaming speech-to-text connection. Audio goes out as binary WebSocket
//! frames; transcripts come back as JSON text frames `{is_final, transcript}`.
//! Reconnection policy itself lives in `supervisor` (C10); this module only
//! knows how to open one connection and drive it until it drops.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::SttConfig;
use crate::error::{GatewayError, Outcome};

/// One decoded transcript event from the provider.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
}

/// Events the STT receive loop surfaces to its owner (AudioIngress/Session).
#[derive(Debug, Clone)]
pub enum SttEvent {
    Transcript(Transcript),
    Disconnected { error: Option<String> },
}

#[derive(Serialize)]
struct StartConfigFrame<'a> {
    language: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    model: &'a str,
    interim_results: bool,
    encoding: &'static str,
    sample_rate: u32,
}

#[derive(Deserialize)]
struct TranscriptFrame {
    is_final: bool,
    transcript: String,
}

/// Abstraction over the streaming STT connection so the controller and
/// tests can swap in a mock without touching real sockets. `&self` methods
/// throughout (backed by interior mutability) so a single client can be
/// shared between the ingress loop (feeding audio in) and the controller
/// (owning lifecycle) without an exclusive borrow.
#[async_trait]
pub trait SttClient: Send + Sync {
    async fn start(&self) -> Outcome<()>;
    fn send_audio(&self, bytes: Vec<u8>) -> Outcome<()>;
    async fn close(&self);
    fn is_connected(&self) -> bool;
}

/// Real streaming client backed by `tokio-tungstenite`.
pub struct WsSttClient {
    config: SttConfig,
    api_key: String,
    audio_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    event_tx: mpsc::UnboundedSender<SttEvent>,
    connected: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl WsSttClient {
    pub fn new(config: SttConfig, api_key: String, event_tx: mpsc::UnboundedSender<SttEvent>) -> Self {
        Self {
            config,
            api_key,
            audio_tx: std::sync::Mutex::new(None),
            event_tx,
            connected: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl SttClient for WsSttClient {
    async fn start(&self) -> Outcome<()> {
        let url = format!("{}?token={}", self.config.ws_url, self.api_key);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| GatewayError::transport_lost(format!("stt connect failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let start_frame = StartConfigFrame {
            language: &self.config.language,
            model: &self.config.model,
            interim_results: self.config.interim_results,
            encoding: "mulaw",
            sample_rate: 8000,
        };
        let start_json = serde_json::to_string(&start_frame)
            .map_err(|e| GatewayError::fatal(format!("stt start frame serialization failed: {e}")))?;
        write
            .send(WsMessage::Text(start_json.into()))
            .await
            .map_err(|e| GatewayError::transport_lost(format!("stt start frame send failed: {e}")))?;

        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        *self.audio_tx.lock().unwrap() = Some(audio_tx);
        self.connected.store(true, std::sync::atomic::Ordering::SeqCst);

        let event_tx = self.event_tx.clone();
        let connected = self.connected.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    audio = audio_rx.recv() => {
                        match audio {
                            Some(bytes) => {
                                if write.send(WsMessage::Binary(bytes.into())).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    frame = read.next() => {
                        match frame {
                            Some(Ok(WsMessage::Text(text))) => {
                                match serde_json::from_str::<TranscriptFrame>(&text) {
                                    Ok(parsed) => {
                                        let _ = event_tx.send(SttEvent::Transcript(Transcript {
                                            text: parsed.transcript,
                                            is_final: parsed.is_final,
                                        }));
                                    }
                                    Err(_) => {
                                        tracing::warn!("stt: unparseable transcript frame, discarding");
                                    }
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Err(e)) => {
                                let _ = event_tx.send(SttEvent::Disconnected { error: Some(e.to_string()) });
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            connected.store(false, std::sync::atomic::Ordering::SeqCst);
            let _ = event_tx.send(SttEvent::Disconnected { error: None });
        });

        Ok(())
    }

    fn send_audio(&self, bytes: Vec<u8>) -> Outcome<()> {
        match self.audio_tx.lock().unwrap().as_ref() {
            Some(tx) => tx.send(bytes).map_err(|_| GatewayError::transport_lost("stt audio channel closed")),
            None => Err(GatewayError::invalid_state("send_audio called before start")),
        }
    }

    async fn close(&self) {
        *self.audio_tx.lock().unwrap() = None;
        self.connected.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_frame_parses_is_final_and_text() {
        let raw = r#"{"is_final":true,"transcript":"hola, que tal"}"#;
        let parsed: TranscriptFrame = serde_json::from_str(raw).unwrap();
        assert!(parsed.is_final);
        assert_eq!(parsed.transcript, "hola, que tal");
    }

    #[test]
    fn malformed_transcript_frame_fails_to_parse() {
        let raw = r#"{"unexpected":true}"#;
        assert!(serde_json::from_str::<TranscriptFrame>(raw).is_err());
    }
}
