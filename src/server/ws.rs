//! Telephony WebSocket entry point: wires one inbound connection into a
//! fresh Session + ConversationController pipeline (C1 → C9).

use std::sync::Arc;

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::audio_egress::AudioEgress;
use crate::audio_ingress::{self, SpillBuffer};
use crate::controller::ConversationController;
use crate::decision::DecisionEngine;
use crate::session::Session;
use crate::stt::{SttClient, SttEvent, WsSttClient};
use crate::supervisor::Service;
use crate::telephony::{self, TelephonyEvent, TelephonyLink};
use crate::transcript::TranscriptAggregator;
use crate::tts::TtsClient;

use super::ServerState;

pub async fn telephony_ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(|socket| handle_call(socket, state))
}

async fn handle_call(socket: WebSocket, state: ServerState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let forward_task = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if ws_sink.send(AxumMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Wait for the `start` frame before anything else can be constructed;
    // everything downstream needs the stream id and the provider's call id
    // (the latter is what the out-of-band hang-up call must target).
    let (stream_id, call_id) = loop {
        match ws_stream.next().await {
            Some(Ok(AxumMessage::Text(text))) => match telephony::decode_frame(&text) {
                Ok(Some(TelephonyEvent::Start { stream_id, call_id })) => break (stream_id, call_id),
                Ok(_) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "malformed telephony frame before start");
                    continue;
                }
            },
            Some(Ok(AxumMessage::Close(_))) | None => return,
            _ => continue,
        }
    };

    if !state.registry.try_admit_call() {
        tracing::warn!("daily call cap reached, rejecting inbound call");
        forward_task.abort();
        return;
    }

    // Snapshot config once per call; a concurrent `/admin/reload` affects
    // only calls that start after it, not this one.
    let config = state.config.read().unwrap().clone();

    let session = Arc::new(Session::new(call_id.clone(), stream_id.clone()));
    let link = TelephonyLink::new(stream_id, outbound_tx);
    let supervisor = state.supervisor.clone();

    let (stt_event_tx, stt_event_rx) = mpsc::unbounded_channel::<SttEvent>();
    let stt: Arc<dyn SttClient> =
        Arc::new(WsSttClient::new(config.stt.clone(), state.stt_api_key.clone(), stt_event_tx));
    let stt_for_ingress = stt.clone();

    let tts = Arc::new(TtsClient::new(config.tts.clone(), state.tts_api_key.clone(), state.http_client.clone()));
    let egress = AudioEgress::new(link.clone(), session.clone());

    let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
    let aggregator = TranscriptAggregator::new(session.clone(), utterance_tx);

    let tools = crate::tools::default_registry(config.limits.tool_worker_pool_size);
    let decision = Arc::new(DecisionEngine::new(
        state.http_client.clone(),
        config.llm.clone(),
        config.prompts.clone(),
        state.llm_api_key.clone(),
        tools,
    ));

    let controller = ConversationController::new(
        session.clone(),
        link.clone(),
        stt,
        tts,
        egress,
        aggregator.clone(),
        decision,
        supervisor,
        config.limits.clone(),
        config.prompts.clone(),
        config.telephony.clone(),
        state.telephony_auth_token.clone(),
        state.http_client.clone(),
    );

    let spill = Arc::new(SpillBuffer::new());
    let ingress_session = session.clone();

    state.registry.session_started();
    let controller_handle = tokio::spawn(controller.run(stt_event_rx, utterance_rx));

    while let Some(frame) = ws_stream.next().await {
        let text = match frame {
            Ok(AxumMessage::Text(text)) => text,
            Ok(AxumMessage::Close(_)) | Err(_) => break,
            _ => continue,
        };

        match telephony::decode_frame(&text) {
            Ok(Some(TelephonyEvent::Media { payload })) => {
                let connected = stt_for_ingress.is_connected();
                if connected && !spill.is_empty() {
                    let backlog = spill.drain();
                    if let Err(err) = stt_for_ingress.send_audio(backlog) {
                        tracing::warn!(error = %err, "failed to forward spilled audio to stt");
                    }
                }
                let action = audio_ingress::ingest(&spill, ingress_session.audio.suppress_stt(), connected, payload);
                if let audio_ingress::IngressAction::Forwarded(bytes) = action {
                    if let Err(err) = stt_for_ingress.send_audio(bytes) {
                        tracing::warn!(error = %err, "failed to forward audio to stt");
                    }
                }
            }
            Ok(Some(TelephonyEvent::Mark { .. })) | Ok(Some(TelephonyEvent::Start { .. })) | Ok(None) => {}
            Ok(Some(TelephonyEvent::Stop)) => {
                ingress_session.mark_ended(crate::types::EndReason::CallerHangup);
                break;
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed telephony frame");
            }
        }
    }

    let end_reason = controller_handle.await.unwrap_or(crate::types::EndReason::Fatal);
    forward_task.abort();

    let stt_health = state.supervisor.snapshot(Service::Stt);
    let tts_health = state.supervisor.snapshot(Service::Tts);
    state.registry.session_ended(super::registry::CallRecord {
        call_id,
        duration_secs: session.call_duration().as_secs(),
        end_reason,
        total_reconnects: stt_health.total_reconnects + tts_health.total_reconnects,
    });
}
