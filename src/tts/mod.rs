//! TTSClient (C4, §4.4)
//!
//! Streaming text-to-speech connection with first-chunk deadline, stall
//! detection, HTTP batch fallback, and idle keepalive. This is the heaviest
//! single component (12% of the core budget) because it owns the only path
//! with a hard external failure mode the caller actually hears.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::TtsConfig;
use crate::error::{GatewayError, Outcome};

pub const FIRST_CHUNK_DEADLINE: Duration = Duration::from_secs(2);
pub const STALL_TIMEOUT: Duration = Duration::from_secs(3);
pub const KEEPALIVE_IDLE: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct TextFrame<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_settings: Option<VoiceSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct VoiceSettings {}

#[derive(Serialize)]
struct GenerationConfig {
    auto_mode: bool,
}

#[derive(Deserialize)]
struct AudioFrame {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default, rename = "isFinal")]
    is_final: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

/// Outcome of one `speak` call, reported to the controller so it can decide
/// whether to advance the state machine or trigger fallback/teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    Completed,
    Stalled,
    TransportError,
}

pub struct TtsClient {
    config: TtsConfig,
    api_key: String,
    http: reqwest::Client,
    in_flight_text: std::sync::Mutex<Option<String>>,
    connected: Arc<AtomicBool>,
}

impl TtsClient {
    pub fn new(config: TtsConfig, api_key: String, http: reqwest::Client) -> Self {
        Self {
            config,
            api_key,
            http,
            in_flight_text: std::sync::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// De-duplication guard (§4.4): a speak call whose text exactly equals
    /// the in-flight utterance is ignored.
    fn is_duplicate(&self, text: &str) -> bool {
        self.in_flight_text.lock().unwrap().as_deref() == Some(text)
    }

    fn mark_in_flight(&self, text: Option<&str>) {
        *self.in_flight_text.lock().unwrap() = text.map(|s| s.to_string());
    }

    /// Stream `text` through the TTS connection, invoking `on_chunk` for
    /// every decoded μ-law chunk. Falls back to the HTTP batch endpoint on
    /// stream failure or stall. Caller (controller) must hold the Session's
    /// `speak_lock` for the duration of this call (Invariant 2).
    pub async fn speak<F>(&self, text: &str, mut on_chunk: F) -> Outcome<SpeakOutcome>
    where
        F: FnMut(Vec<u8>) + Send,
    {
        if self.is_duplicate(text) {
            return Err(GatewayError::invalid_state("duplicate speak call for in-flight utterance"));
        }
        self.mark_in_flight(Some(text));

        let result = self.speak_streaming(text, &mut on_chunk).await;
        let outcome = match result {
            Ok(outcome) if outcome == SpeakOutcome::Completed => outcome,
            _ => {
                tracing::warn!("tts streaming path failed or stalled, falling back to http");
                self.speak_http_fallback(text, &mut on_chunk).await?
            }
        };

        self.mark_in_flight(None);
        Ok(outcome)
    }

    async fn speak_streaming<F>(&self, text: &str, on_chunk: &mut F) -> Outcome<SpeakOutcome>
    where
        F: FnMut(Vec<u8>) + Send,
    {
        let url = format!(
            "{}?output_format={}&optimize_streaming_latency={}&token={}",
            self.config.ws_url, self.config.output_format, self.config.optimize_latency as u8, self.api_key
        );
        eprintln!("DEBUG url: {url}");
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| { eprintln!("DEBUG connect failed: {e}"); GatewayError::transport_lost(format!("tts connect failed: {e}")) })?;
        eprintln!("DEBUG connected ok");
        let (mut write, mut read) = ws_stream.split();
        self.connected.store(true, Ordering::SeqCst);

        // Leading empty-text priming frame, then the real text, then the
        // end-of-sequence marker (§6 TTS provider wire contract).
        for chunk in [" ", text, ""] {
            let frame = TextFrame {
                text: chunk,
                voice_settings: Some(VoiceSettings {}),
                generation_config: Some(GenerationConfig { auto_mode: true }),
            };
            let json = serde_json::to_string(&frame).map_err(|e| GatewayError::fatal(e.to_string()))?;
            write
                .send(WsMessage::Text(json.into()))
                .await
                .map_err(|e| { eprintln!("DEBUG send failed: {e}"); GatewayError::transport_lost(format!("tts text frame send failed: {e}")) })?;
            eprintln!("DEBUG sent frame: {chunk:?}");
        }

        let mut first_chunk_seen = false;
        let mut stall_count = 0u8;

        loop {
            let deadline = if first_chunk_seen { STALL_TIMEOUT } else { FIRST_CHUNK_DEADLINE };
            match timeout(deadline, read.next()).await {
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    let frame: AudioFrame = match serde_json::from_str(&text) {
                        Ok(f) => f,
                        Err(_) => continue,
                    };
                    if let Some(err) = frame.error {
                        return Err(GatewayError::transport_lost(format!("tts provider error: {err}")));
                    }
                    if let Some(audio) = frame.audio {
                        if let Ok(bytes) = BASE64.decode(audio.as_bytes()) {
                            on_chunk(bytes);
                            first_chunk_seen = true;
                            stall_count = 0;
                        }
                    }
                    if frame.is_final == Some(true) {
                        return Ok(SpeakOutcome::Completed);
                    }
                }
                Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) => return Ok(SpeakOutcome::Completed),
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => return Err(GatewayError::transport_lost(e.to_string())),
                Err(_) => {
                    // No chunk within the deadline.
                    if !first_chunk_seen {
                        return Ok(SpeakOutcome::TransportError);
                    }
                    stall_count += 1;
                    if stall_count >= 2 {
                        return Ok(SpeakOutcome::Stalled);
                    }
                }
            }
        }
    }

    async fn speak_http_fallback<F>(&self, text: &str, on_chunk: &mut F) -> Outcome<SpeakOutcome>
    where
        F: FnMut(Vec<u8>) + Send,
    {
        let response = self
            .http
            .post(&self.config.http_fallback_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "text": text, "voice_id": self.config.voice_id, "output_format": self.config.output_format }))
            .send()
            .await
            .map_err(|e| GatewayError::transport_lost(format!("tts http fallback failed: {e}")))?;

        if !response.status().is_success() {
            return Err(GatewayError::transport_lost(format!("tts http fallback rejected: {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::transport_lost(format!("tts http fallback body read failed: {e}")))?;
        on_chunk(bytes.to_vec());
        Ok(SpeakOutcome::Completed)
    }
}

/// Spawn the idle keepalive task: pings with a zero-length text frame if the
/// connection sits idle for `KEEPALIVE_IDLE`. Runs independently of `speak`.
pub fn spawn_keepalive(ping_tx: mpsc::UnboundedSender<()>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(KEEPALIVE_IDLE).await;
            if ping_tx.send(()).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_guard_rejects_identical_in_flight_text() {
        let config = TtsConfig::default();
        let client = TtsClient::new(config, "key".to_string(), reqwest::Client::new());
        client.mark_in_flight(Some("hola"));
        assert!(client.is_duplicate("hola"));
        assert!(!client.is_duplicate("adios"));
    }

    #[test]
    fn audio_frame_with_error_field_parses() {
        let raw = r#"{"error":"quota exceeded"}"#;
        let frame: AudioFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.error.as_deref(), Some("quota exceeded"));
        assert!(frame.audio.is_none());
    }

    #[test]
    fn audio_frame_decodes_base64_payload() {
        let raw = r#"{"audio":"AQID","isFinal":false}"#;
        let frame: AudioFrame = serde_json::from_str(raw).unwrap();
        let bytes = BASE64.decode(frame.audio.unwrap()).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }
}
