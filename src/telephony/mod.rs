//! TelephonyLink (C1, §4.1)
//!
//! One bidirectional frame channel with the telephony provider. Demuxes the
//! inbound JSON event stream and frames outbound media/clear/mark events.
//! The axum WebSocket handler in `server::ws` owns the raw socket; this
//! module owns the wire encoding/decoding and the out-of-band hang-up call.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{GatewayError, Outcome};

/// A demuxed inbound event from the telephony WebSocket.
#[derive(Debug, Clone)]
pub enum TelephonyEvent {
    Start { stream_id: String, call_id: String },
    Media { payload: Vec<u8> },
    Mark { name: String },
    Stop,
}

/// Raw wire envelope as sent by the provider. `event` discriminates the shape.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(rename = "streamSid", default)]
    stream_sid: Option<String>,
    #[serde(rename = "callSid", default)]
    call_sid: Option<String>,
    #[serde(default)]
    media: Option<InboundMedia>,
    #[serde(default)]
    mark: Option<InboundMark>,
}

#[derive(Debug, Deserialize)]
struct InboundMedia {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct InboundMark {
    name: String,
}

/// Parse one raw text frame from the telephony socket into a `TelephonyEvent`.
/// Decode errors are reported as `parse_error`; the caller (the receive
/// loop) logs and skips the frame rather than terminating the link (§4.1
/// failure semantics).
pub fn decode_frame(raw: &str) -> Outcome<Option<TelephonyEvent>> {
    let frame: InboundFrame = serde_json::from_str(raw)
        .map_err(|e| GatewayError::parse_error(format!("malformed telephony frame: {e}")))?;

    match frame.event.as_str() {
        "start" => {
            let stream_id = frame.stream_sid.ok_or_else(|| GatewayError::parse_error("start frame missing streamSid"))?;
            let call_id = frame.call_sid.unwrap_or_default();
            Ok(Some(TelephonyEvent::Start { stream_id, call_id }))
        }
        "media" => {
            let media = frame.media.ok_or_else(|| GatewayError::parse_error("media frame missing media object"))?;
            let payload = BASE64
                .decode(media.payload.as_bytes())
                .map_err(|e| GatewayError::parse_error(format!("invalid base64 media payload: {e}")))?;
            Ok(Some(TelephonyEvent::Media { payload }))
        }
        "mark" => {
            let mark = frame.mark.ok_or_else(|| GatewayError::parse_error("mark frame missing mark object"))?;
            Ok(Some(TelephonyEvent::Mark { name: mark.name }))
        }
        "stop" => Ok(Some(TelephonyEvent::Stop)),
        "connected" => Ok(None),
        other => Err(GatewayError::parse_error(format!("unknown telephony event: {other}"))),
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "event")]
enum OutboundFrame<'a> {
    #[serde(rename = "media")]
    Media { #[serde(rename = "streamSid")] stream_sid: &'a str, media: OutboundMedia },
    #[serde(rename = "clear")]
    Clear { #[serde(rename = "streamSid")] stream_sid: &'a str },
    #[serde(rename = "mark")]
    Mark { #[serde(rename = "streamSid")] stream_sid: &'a str, mark: OutboundMark },
}

#[derive(Debug, Serialize)]
struct OutboundMedia {
    payload: String,
}

#[derive(Debug, Serialize)]
struct OutboundMark {
    name: String,
}

/// The outbound half of the link: encodes frames and pushes them onto the
/// channel the WebSocket write task drains. Kept as a plain `Sender` so it
/// is `Clone` and can be handed to C5 without sharing the socket itself.
#[derive(Clone)]
pub struct TelephonyLink {
    stream_id: String,
    outbound: mpsc::UnboundedSender<String>,
}

impl TelephonyLink {
    pub fn new(stream_id: impl Into<String>, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self { stream_id: stream_id.into(), outbound }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Encode raw μ-law bytes as a media event and enqueue it.
    pub fn send_media(&self, payload: &[u8]) -> Outcome<()> {
        let frame = OutboundFrame::Media {
            stream_sid: &self.stream_id,
            media: OutboundMedia { payload: BASE64.encode(payload) },
        };
        self.enqueue(&frame)
    }

    /// Instruct the provider to drop its outbound jitter buffer.
    pub fn send_clear(&self) -> Outcome<()> {
        let frame = OutboundFrame::Clear { stream_sid: &self.stream_id };
        self.enqueue(&frame)
    }

    /// Boundary marker, used by C5 to detect end-of-utterance acknowledgement.
    pub fn send_mark(&self, name: impl Into<String>) -> Outcome<()> {
        let frame = OutboundFrame::Mark { stream_sid: &self.stream_id, mark: OutboundMark { name: name.into() } };
        self.enqueue(&frame)
    }

    fn enqueue(&self, frame: &OutboundFrame<'_>) -> Outcome<()> {
        let text = serde_json::to_string(frame).map_err(|e| GatewayError::fatal(format!("frame serialization failed: {e}")))?;
        self.outbound
            .send(text)
            .map_err(|_| GatewayError::transport_lost("telephony outbound channel closed"))
    }
}

/// Out-of-band control: request the provider hang up the call. Used only by
/// the farewell flow (§4.9). Failure is logged and does not block teardown.
pub async fn hang_up(
    http: &reqwest::Client,
    base_url: &str,
    account_sid: &str,
    auth_token: &str,
    call_id: &str,
) -> Outcome<()> {
    let url = format!("{base_url}/Accounts/{account_sid}/Calls/{call_id}.json");
    let response = http
        .post(&url)
        .basic_auth(account_sid, Some(auth_token))
        .form(&[("Status", "completed")])
        .send()
        .await
        .map_err(|e| GatewayError::transport_lost(format!("hang-up request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(GatewayError::transport_lost(format!("hang-up rejected: {}", response.status())));
    }
    Ok(())
}
