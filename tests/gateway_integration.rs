//! End-to-end coverage of one call through the gateway: greeting, simple
//! Q&A, tool dispatch with synthetic narration, termination via tool, STT
//! spill/reconnect, and TTS stall -> HTTP fallback.
//!
//! STT is never driven over a real socket here: `SttClient` is a trait
//! object decoupled from the event channel the controller reads, so a
//! no-op client plus direct injection on that channel reproduces exactly
//! what the real provider socket would do. TTS and the LLM are concrete
//! structs that make real HTTP/WS calls, so those get small local mock
//! servers instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use voice_gateway::audio_egress::AudioEgress;
use voice_gateway::audio_ingress::{self, SpillBuffer};
use voice_gateway::config::{LimitsConfig, LlmConfig, PromptsConfig, TelephonyConfig, TtsConfig};
use voice_gateway::controller::ConversationController;
use voice_gateway::decision::DecisionEngine;
use voice_gateway::error::Outcome;
use voice_gateway::session::Session;
use voice_gateway::stt::{SttClient, SttEvent, Transcript};
use voice_gateway::supervisor::IntegrationSupervisor;
use voice_gateway::telephony::TelephonyLink;
use voice_gateway::tools::{ToolExecutor, ToolRegistry};
use voice_gateway::transcript::TranscriptAggregator;
use voice_gateway::tts::{SpeakOutcome, TtsClient};
use voice_gateway::types::{EndReason, ToolResult};

/// Stand-in for the provider STT socket. Transcripts are injected directly
/// on the event channel in these tests, so this only needs to satisfy the
/// lifecycle calls the controller makes.
struct NoopSttClient;

#[async_trait]
impl SttClient for NoopSttClient {
    async fn start(&self) -> Outcome<()> {
        Ok(())
    }
    fn send_audio(&self, _bytes: Vec<u8>) -> Outcome<()> {
        Ok(())
    }
    async fn close(&self) {}
    fn is_connected(&self) -> bool {
        true
    }
}

/// Returns a fixed slot list so the synthetic-narration path has something
/// concrete to substitute.
struct SlotListExecutor;

#[async_trait]
impl ToolExecutor for SlotListExecutor {
    async fn execute(&self, _arguments: &HashMap<String, Value>) -> ToolResult {
        let mut result = serde_json::Map::new();
        result.insert("status".to_string(), Value::String("SLOT_LIST".to_string()));
        result.insert("pretty_date".to_string(), Value::String("jueves".to_string()));
        result.insert("available_pretty".to_string(), json!(["10:00", "11:00", "14:00"]));
        result
    }
}

/// One mock TTS WebSocket server: accepts a fresh connection per `speak`
/// call, drains the priming/text/terminator frames, then replies with a
/// single final audio chunk.
async fn spawn_mock_tts_ws() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else { return };
                let (mut write, mut read) = ws.split();
                for _ in 0..3 {
                    if read.next().await.is_none() {
                        return;
                    }
                }
                let audio = BASE64.encode([0xABu8; 160]);
                let frame = json!({ "audio": audio, "isFinal": true }).to_string();
                let _ = write.send(tokio_tungstenite::tungstenite::Message::Text(frame.into())).await;
            });
        }
    });
    format!("ws://{addr}")
}

/// Sends one chunk, then holds the connection open in silence past the
/// stall timeout so `speak` falls back to the HTTP synthesis endpoint.
async fn spawn_stalling_tts_ws() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else { return };
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else { return };
        let (mut write, mut read) = ws.split();
        for _ in 0..3 {
            if read.next().await.is_none() {
                return;
            }
        }
        let audio = BASE64.encode([0x11u8; 80]);
        let frame = json!({ "audio": audio, "isFinal": false }).to_string();
        let _ = write.send(tokio_tungstenite::tungstenite::Message::Text(frame.into())).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    format!("ws://{addr}")
}

/// Mock LLM SSE endpoint: always replies with one fixed chunk of content,
/// matching `DecisionEngine::stream_completion`'s `data: ...\n\n` framing.
async fn spawn_mock_llm(reply: impl Into<String>) -> String {
    let reply: Arc<str> = Arc::from(reply.into());
    let app = Router::new().route(
        "/chat/completions",
        post(move || {
            let reply = reply.clone();
            async move {
                let body = format!(
                    "data: {}\n\ndata: [DONE]\n\n",
                    json!({ "choices": [{ "delta": { "content": &*reply } }] })
                );
                axum::response::Response::builder()
                    .status(200)
                    .header("content-type", "text/event-stream")
                    .body(axum::body::Body::from(body))
                    .unwrap()
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Mock TTS HTTP batch-synthesis fallback: always returns a fixed audio blob.
async fn spawn_mock_tts_http_fallback() -> String {
    let app = Router::new().route("/synthesize", post(|| async { vec![0xCDu8; 80] }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/synthesize")
}

/// Mock telephony control API: accepts the out-of-band hang-up POST.
async fn spawn_mock_hangup() -> String {
    let app = Router::new().route("/Accounts/{*rest}", post(|| async { StatusCode::OK }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn test_prompts() -> PromptsConfig {
    PromptsConfig {
        greeting: "Hola, gracias por llamar.".to_string(),
        farewell: "Gracias por su llamada, hasta luego.".to_string(),
        llm_failure_apology: "Disculpe, hubo un problema.".to_string(),
        system_prompt: "Eres un asistente telefónico.".to_string(),
    }
}

struct Stack {
    outbound_rx: mpsc::UnboundedReceiver<String>,
    stt_event_tx: mpsc::UnboundedSender<SttEvent>,
    controller: tokio::task::JoinHandle<EndReason>,
}

async fn spawn_stack(llm_base: String, tts_ws_url: String, tts_http_url: String, hangup_base: String, registry: ToolRegistry) -> Stack {
    let session = Arc::new(Session::new("call-1", "stream-1"));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
    let link = TelephonyLink::new("stream-1", outbound_tx);

    let stt: Arc<dyn SttClient> = Arc::new(NoopSttClient);
    let (stt_event_tx, stt_event_rx) = mpsc::unbounded_channel::<SttEvent>();

    let tts_config = TtsConfig { ws_url: tts_ws_url, http_fallback_url: tts_http_url, ..TtsConfig::default() };
    let tts = Arc::new(TtsClient::new(tts_config, "tts-key".to_string(), reqwest::Client::new()));

    let egress = AudioEgress::new(link.clone(), session.clone());
    let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
    let aggregator = TranscriptAggregator::new(session.clone(), utterance_tx);

    let llm_config = LlmConfig { endpoint: llm_base, ..LlmConfig::default() };
    let decision =
        Arc::new(DecisionEngine::new(reqwest::Client::new(), llm_config, test_prompts(), "llm-key".to_string(), registry));

    let supervisor = Arc::new(IntegrationSupervisor::new());
    let limits = LimitsConfig { silence_timeout_secs: 30, max_call_duration_secs: 600, ..LimitsConfig::default() };
    let telephony_config = TelephonyConfig { account_sid: "AC1".to_string(), control_base_url: hangup_base };

    let controller = ConversationController::new(
        session.clone(),
        link,
        stt,
        tts,
        egress,
        aggregator,
        decision,
        supervisor,
        limits,
        test_prompts(),
        telephony_config,
        "tel-auth-token".to_string(),
        reqwest::Client::new(),
    );

    let controller = tokio::spawn(controller.run(stt_event_rx, utterance_rx));
    Stack { outbound_rx, stt_event_tx, controller }
}

async fn recv_json(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
    let raw = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("outbound frame timed out")
        .expect("outbound channel closed");
    serde_json::from_str(&raw).unwrap()
}

/// Drains one full clear/media.../mark cycle and returns the media count.
async fn drain_utterance(rx: &mut mpsc::UnboundedReceiver<String>) -> usize {
    let clear = recv_json(rx).await;
    assert_eq!(clear["event"], "clear");

    let mut media_count = 0;
    loop {
        let frame = recv_json(rx).await;
        match frame["event"].as_str().unwrap() {
            "media" => media_count += 1,
            "mark" => {
                assert_eq!(frame["mark"]["name"], "end_of_tts");
                break;
            }
            other => panic!("unexpected outbound frame event: {other}"),
        }
    }
    media_count
}

#[tokio::test]
async fn greeting_plays_then_call_settles_into_listening() {
    let _ = tracing_subscriber::fmt().with_env_filter("trace").try_init();
    let tts_ws = spawn_mock_tts_ws().await;
    let llm_base = spawn_mock_llm("no debería llamarse").await;
    let hangup_base = spawn_mock_hangup().await;

    let mut stack = spawn_stack(llm_base, tts_ws, "http://127.0.0.1:1/unused".to_string(), hangup_base, ToolRegistry::new(1)).await;

    let media_count = drain_utterance(&mut stack.outbound_rx).await;
    assert!(media_count >= 1);

    stack.controller.abort();
}

#[tokio::test]
async fn simple_question_gets_spoken_llm_reply() {
    let tts_ws = spawn_mock_tts_ws().await;
    let llm_base = spawn_mock_llm("Hoy estamos abiertos de nueve a seis.").await;
    let hangup_base = spawn_mock_hangup().await;

    let mut stack = spawn_stack(llm_base, tts_ws, "http://127.0.0.1:1/unused".to_string(), hangup_base, ToolRegistry::new(1)).await;

    drain_utterance(&mut stack.outbound_rx).await; // greeting

    stack
        .stt_event_tx
        .send(SttEvent::Transcript(Transcript { text: "¿Cuál es su horario?".to_string(), is_final: true }))
        .unwrap();

    let media_count = drain_utterance(&mut stack.outbound_rx).await; // reply
    assert!(media_count >= 1);

    stack.controller.abort();
}

#[tokio::test]
async fn tool_call_without_spoken_text_uses_synthetic_narration() {
    let tts_ws = spawn_mock_tts_ws().await;
    let llm_base = spawn_mock_llm("[process_appointment_request(date=jueves)]").await;
    let hangup_base = spawn_mock_hangup().await;

    let mut registry = ToolRegistry::new(1);
    registry.register("process_appointment_request", Arc::new(SlotListExecutor));

    let mut stack = spawn_stack(llm_base, tts_ws, "http://127.0.0.1:1/unused".to_string(), hangup_base, registry).await;

    drain_utterance(&mut stack.outbound_rx).await; // greeting

    stack
        .stt_event_tx
        .send(SttEvent::Transcript(Transcript { text: "quiero agendar una cita".to_string(), is_final: true }))
        .unwrap();

    let media_count = drain_utterance(&mut stack.outbound_rx).await; // synthetic narration
    assert!(media_count >= 1);

    stack.controller.abort();
}

#[tokio::test]
async fn end_call_tool_triggers_farewell_and_hangup() {
    let tts_ws = spawn_mock_tts_ws().await;
    let llm_base = spawn_mock_llm("Gracias por llamar. [end_call(reason=user_request)]").await;
    let hangup_base = spawn_mock_hangup().await;

    let stack = spawn_stack(llm_base, tts_ws, "http://127.0.0.1:1/unused".to_string(), hangup_base, ToolRegistry::new(1)).await;
    let Stack { mut outbound_rx, stt_event_tx, controller } = stack;

    drain_utterance(&mut outbound_rx).await; // greeting

    stt_event_tx
        .send(SttEvent::Transcript(Transcript { text: "ya no necesito nada más".to_string(), is_final: true }))
        .unwrap();

    drain_utterance(&mut outbound_rx).await; // farewell

    let end_reason = tokio::time::timeout(Duration::from_secs(15), controller)
        .await
        .expect("controller did not finish")
        .expect("controller task panicked");
    assert_eq!(end_reason, EndReason::AssistantRequest);
}

#[tokio::test]
async fn stalled_tts_stream_falls_back_to_http_synthesis() {
    let tts_ws = spawn_stalling_tts_ws().await;
    let tts_http = spawn_mock_tts_http_fallback().await;

    let config = TtsConfig { ws_url: tts_ws, http_fallback_url: tts_http, ..TtsConfig::default() };
    let client = TtsClient::new(config, "key".to_string(), reqwest::Client::new());

    let chunks = Mutex::new(Vec::new());
    let outcome = client.speak("hola", |chunk| chunks.lock().unwrap().push(chunk)).await.unwrap();

    assert_eq!(outcome, SpeakOutcome::Completed);
    let chunks = chunks.into_inner().unwrap();
    assert!(chunks.len() >= 2, "expected the one streamed chunk plus the http-fallback chunk");
}

/// Stand-in `SttClient` that records every forwarded batch without opening
/// a socket, so the spill/reconnect composition can be checked directly.
struct RecordingSttClient {
    connected: AtomicBool,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSttClient {
    fn new() -> Self {
        Self { connected: AtomicBool::new(false), sent: Mutex::new(Vec::new()) }
    }

    fn set_connected(&self, value: bool) {
        self.connected.store(value, Ordering::SeqCst);
    }
}

#[async_trait]
impl SttClient for RecordingSttClient {
    async fn start(&self) -> Outcome<()> {
        Ok(())
    }
    fn send_audio(&self, bytes: Vec<u8>) -> Outcome<()> {
        self.sent.lock().unwrap().push(bytes);
        Ok(())
    }
    async fn close(&self) {}
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Mirrors the media-ingress loop's per-frame handling: drain any spilled
/// backlog the instant STT reconnects, then apply the ingress matrix.
fn ingress_step(spill: &SpillBuffer, stt: &RecordingSttClient, payload: Vec<u8>) {
    let connected = stt.is_connected();
    if connected && !spill.is_empty() {
        let backlog = spill.drain();
        stt.send_audio(backlog).unwrap();
    }
    if let audio_ingress::IngressAction::Forwarded(bytes) = audio_ingress::ingest(spill, false, connected, payload) {
        stt.send_audio(bytes).unwrap();
    }
}

#[tokio::test]
async fn stt_reconnect_drains_spilled_audio_before_forwarding_new_frame() {
    let spill = SpillBuffer::new();
    let stt = RecordingSttClient::new();

    ingress_step(&spill, &stt, vec![1, 2, 3]);
    ingress_step(&spill, &stt, vec![4, 5]);
    assert_eq!(spill.len(), 5);
    assert!(stt.sent.lock().unwrap().is_empty());

    stt.set_connected(true);
    ingress_step(&spill, &stt, vec![6, 7]);

    let sent = stt.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], vec![1, 2, 3, 4, 5]);
    assert_eq!(sent[1], vec![6, 7]);
    assert!(spill.is_empty());
}
