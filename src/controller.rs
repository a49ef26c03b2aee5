//! ConversationController (C9, §4.9) — the state machine that owns one
//! call end to end: greeting, turn-taking between listening and speaking,
//! farewell, and teardown.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::audio_egress::AudioEgress;
use crate::config::{LimitsConfig, PromptsConfig, TelephonyConfig};
use crate::decision::{DecisionEngine, END_CALL};
use crate::session::Session;
use crate::stt::{SttClient, SttEvent};
use crate::supervisor::{IntegrationSupervisor, Service};
use crate::telephony::{self, TelephonyLink};
use crate::transcript::{TranscriptAggregator, UtteranceEvent};
use crate::tts::TtsClient;
use crate::types::EndReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Greeting,
    Listening,
    Thinking,
    Speaking,
    Farewell,
    Closed,
}

static PHONE_KEYWORDS: &[&str] = &["número", "telefono", "teléfono", "celular", "whatsapp", "contacto"];
static TEN_DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{10,}").unwrap());

const FAREWELL_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TICK: Duration = Duration::from_secs(5);

pub struct ConversationController {
    session: Arc<Session>,
    link: TelephonyLink,
    stt: Arc<dyn SttClient>,
    tts: Arc<TtsClient>,
    egress: AudioEgress,
    aggregator: TranscriptAggregator,
    decision: Arc<DecisionEngine>,
    supervisor: Arc<IntegrationSupervisor>,
    limits: LimitsConfig,
    prompts: PromptsConfig,
    telephony_config: TelephonyConfig,
    telephony_auth_token: String,
    http: reqwest::Client,
    state: Mutex<ControllerState>,
}

impl ConversationController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<Session>,
        link: TelephonyLink,
        stt: Arc<dyn SttClient>,
        tts: Arc<TtsClient>,
        egress: AudioEgress,
        aggregator: TranscriptAggregator,
        decision: Arc<DecisionEngine>,
        supervisor: Arc<IntegrationSupervisor>,
        limits: LimitsConfig,
        prompts: PromptsConfig,
        telephony_config: TelephonyConfig,
        telephony_auth_token: String,
        http: reqwest::Client,
    ) -> Self {
        Self {
            session,
            link,
            stt,
            tts,
            egress,
            aggregator,
            decision,
            supervisor,
            limits,
            prompts,
            telephony_config,
            telephony_auth_token,
            http,
            state: Mutex::new(ControllerState::Idle),
        }
    }

    fn set_state(&self, state: ControllerState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock().unwrap()
    }

    /// Run the call end to end: greeting, the listen/think/speak loop, and
    /// teardown. Returns the reason the call ended.
    pub async fn run(
        mut self,
        mut stt_events: tokio::sync::mpsc::UnboundedReceiver<SttEvent>,
        mut utterances: tokio::sync::mpsc::UnboundedReceiver<UtteranceEvent>,
    ) -> EndReason {
        self.supervisor.record_connecting(Service::Stt);
        if self.stt.start().await.is_ok() {
            self.supervisor.record_connected(Service::Stt);
        } else {
            self.supervisor.record_disconnected(Service::Stt, Some("initial connect failed".to_string()));
        }

        self.set_state(ControllerState::Greeting);
        self.speak_blocking(self.prompts.greeting.clone()).await;
        self.set_state(ControllerState::Listening);

        let mut health_tick = tokio::time::interval(HEALTH_TICK);
        let end_reason = loop {
            tokio::select! {
                _ = health_tick.tick() => {
                    if self.session.call_duration() >= Duration::from_secs(self.limits.max_call_duration_secs) {
                        break EndReason::MaxDuration;
                    }
                    if self.session.audio.silence_duration() >= Duration::from_secs(self.limits.silence_timeout_secs) {
                        break EndReason::SilenceTimeout;
                    }
                    if self.supervisor.stt_exhausted() {
                        break EndReason::SttLost;
                    }
                }
                event = stt_events.recv() => {
                    match event {
                        Some(SttEvent::Transcript(transcript)) if transcript.is_final => {
                            self.session.audio.touch_audio_activity();
                            self.aggregator.on_final(transcript.text);
                        }
                        Some(SttEvent::Transcript(_)) => {
                            self.session.audio.touch_audio_activity();
                            self.aggregator.on_partial();
                        }
                        Some(SttEvent::Disconnected { error }) => {
                            self.supervisor.record_disconnected(Service::Stt, error);
                            if self.supervisor.stt_exhausted() {
                                break EndReason::SttLost;
                            }
                        }
                        None => break EndReason::Fatal,
                    }
                }
                utterance = utterances.recv() => {
                    match utterance {
                        Some(UtteranceEvent::Ready(text)) if !self.session.audio.tts_in_progress() => {
                            self.apply_phone_capture_clear();
                            self.session.audio.set_suppress_stt(true);
                            self.set_state(ControllerState::Thinking);
                            let reply = self.decision.run_turn(&self.session, &text).await.unwrap_or_else(|_| {
                                self.prompts.llm_failure_apology.clone()
                            });
                            if reply == END_CALL {
                                self.set_state(ControllerState::Farewell);
                                break EndReason::AssistantRequest;
                            }
                            self.apply_phone_capture_detect(&reply);
                            self.set_state(ControllerState::Speaking);
                            self.speak_blocking(reply).await;
                            self.set_state(ControllerState::Listening);
                        }
                        Some(UtteranceEvent::Ready(_)) => {}
                        None => break EndReason::Fatal,
                    }
                }
            }

            if self.session.is_ended() {
                break self.session.end_reason.lock().unwrap().unwrap_or(EndReason::Fatal);
            }
        };

        if end_reason == EndReason::AssistantRequest {
            self.speak_blocking(self.prompts.farewell.clone()).await;
            let _ = tokio::time::timeout(FAREWELL_TIMEOUT, self.hang_up()).await;
        }

        self.session.mark_ended(end_reason);
        self.stt.close().await;
        self.set_state(ControllerState::Closed);
        end_reason
    }

    /// Speak one utterance end to end, holding the Session's serialization
    /// lock for the duration (Invariant 2: at most one utterance in flight).
    async fn speak_blocking(&self, text: String) {
        let _guard = self.session.speak_lock.lock().await;
        self.session.audio.begin_speaking();
        if self.egress.begin_utterance().is_err() {
            self.session.audio.end_speaking();
            return;
        }

        let egress = &self.egress;
        let result = self.tts.speak(&text, |chunk| {
            let _ = egress.on_chunk(chunk);
        }).await;

        if result.is_err() {
            self.supervisor.record_disconnected(Service::Tts, Some("speak failed".to_string()));
        } else {
            self.supervisor.record_connected(Service::Tts);
        }

        let _ = self.egress.end_utterance();
    }

    async fn hang_up(&self) {
        let result = telephony::hang_up(
            &self.http,
            &self.telephony_config.control_base_url,
            &self.telephony_config.account_sid,
            &self.telephony_auth_token,
            &self.session.id,
        )
        .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "out-of-band hang-up failed, relying on caller/provider timeout");
        }
    }

    /// §4.9 phone-capture heuristic: the reply mentioning a phone-related
    /// keyword flips C6 into the longer pause mode for the caller's next
    /// utterance (likely a dictated phone number).
    fn apply_phone_capture_detect(&self, reply: &str) {
        let lower = reply.to_lowercase();
        if PHONE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            self.session.set_phone_capture(true);
        }
    }

    /// Clear phone-capture mode once a 10-digit run appears in recent
    /// history (the caller dictated the number; go back to normal pacing).
    fn apply_phone_capture_clear(&self) {
        let history = self.session.history_snapshot();
        let recent = history.iter().rev().take(3);
        for message in recent {
            if TEN_DIGIT_RUN.is_match(&message.content) {
                self.session.set_phone_capture(false);
                return;
            }
        }
    }
}
