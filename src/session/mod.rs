//! Session (§3 DATA MODEL) — the per-call state the controller owns
//! exclusively. Components hold only a logical `Arc` back into it for
//! reading state and appending history; they never mutate `history` or
//! `AudioState` flags directly (see §5 "Shared resources").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::Mutex as AsyncMutex;

use crate::types::{EndReason, Message, Mode};

/// Flags shared between the controller (writer) and the ingress/aggregator
/// tasks (readers). Each field is independently atomic; no compound
/// transaction ever needs more than one field (§5).
pub struct AudioState {
    is_speaking: AtomicBool,
    suppress_stt: AtomicBool,
    tts_in_progress: AtomicBool,
    last_audio_activity: Mutex<Instant>,
}

impl AudioState {
    pub fn new() -> Self {
        Self {
            is_speaking: AtomicBool::new(false),
            suppress_stt: AtomicBool::new(false),
            tts_in_progress: AtomicBool::new(false),
            last_audio_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking.load(Ordering::SeqCst)
    }

    pub fn suppress_stt(&self) -> bool {
        self.suppress_stt.load(Ordering::SeqCst)
    }

    pub fn tts_in_progress(&self) -> bool {
        self.tts_in_progress.load(Ordering::SeqCst)
    }

    /// Enter the speaking state. Invariant: `is_speaking ⇒ suppress_stt`, so
    /// `suppress_stt` is always set first.
    pub fn begin_speaking(&self) {
        self.suppress_stt.store(true, Ordering::SeqCst);
        self.is_speaking.store(true, Ordering::SeqCst);
        self.tts_in_progress.store(true, Ordering::SeqCst);
    }

    /// Leave the speaking state, resuming STT.
    pub fn end_speaking(&self) {
        self.is_speaking.store(false, Ordering::SeqCst);
        self.suppress_stt.store(false, Ordering::SeqCst);
        self.tts_in_progress.store(false, Ordering::SeqCst);
    }

    /// Pre-warm suppression ahead of the LLM turn (pause-then-speak, §4.9),
    /// without yet claiming `is_speaking`.
    pub fn set_suppress_stt(&self, value: bool) {
        self.suppress_stt.store(value, Ordering::SeqCst);
    }

    pub fn touch_audio_activity(&self) {
        if let Ok(mut guard) = self.last_audio_activity.lock() {
            *guard = Instant::now();
        }
    }

    pub fn silence_duration(&self) -> std::time::Duration {
        self.last_audio_activity
            .lock()
            .map(|guard| guard.elapsed())
            .unwrap_or_default()
    }
}

impl Default for AudioState {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates finalized STT partials while waiting for the pause timer
/// (§4.6). Owned by the Session; driven by `transcript::TranscriptAggregator`.
pub struct TranscriptBuffer {
    finals: Vec<String>,
    accumulation_started_at: Option<Instant>,
    pub phone_capture: bool,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self { finals: Vec::new(), accumulation_started_at: None, phone_capture: false }
    }

    pub fn push_final(&mut self, text: String) {
        if self.accumulation_started_at.is_none() {
            self.accumulation_started_at = Some(Instant::now());
        }
        self.finals.push(text);
    }

    pub fn is_empty(&self) -> bool {
        self.finals.is_empty()
    }

    pub fn accumulated_for(&self) -> std::time::Duration {
        self.accumulation_started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Atomically drains the buffer and returns the joined text, or `None`
    /// if nothing was accumulated or the joined text is shorter than the
    /// minimum utterance length (§4.6: utterances under 2 characters are
    /// dropped rather than submitted).
    pub fn take_joined(&mut self) -> Option<String> {
        if self.finals.is_empty() {
            return None;
        }
        let joined = self.finals.join(" ");
        self.finals.clear();
        self.accumulation_started_at = None;
        if joined.chars().count() < 2 {
            return None;
        }
        Some(joined)
    }
}

impl Default for TranscriptBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// One live call. Created on `start`, destroyed on `stop`/shutdown.
pub struct Session {
    pub id: String,
    pub stream_id: String,
    pub started_at: Instant,
    pub ended: AtomicBool,
    pub end_reason: Mutex<Option<EndReason>>,
    pub audio: AudioState,
    pub transcript: Mutex<TranscriptBuffer>,
    pub history: Mutex<Vec<Message>>,
    pub mode: Mutex<Mode>,
    /// Serializes TTS "speak" operations: at most one utterance in flight (Invariant 2).
    pub speak_lock: AsyncMutex<()>,
    /// The text of the utterance currently in flight, for the de-duplication guard (§4.4).
    pub in_flight_utterance: Mutex<Option<String>>,
}

impl Session {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            started_at: Instant::now(),
            ended: AtomicBool::new(false),
            end_reason: Mutex::new(None),
            audio: AudioState::new(),
            transcript: Mutex::new(TranscriptBuffer::new()),
            history: Mutex::new(Vec::new()),
            mode: Mutex::new(Mode::None),
            speak_lock: AsyncMutex::new(()),
            in_flight_utterance: Mutex::new(None),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn mark_ended(&self, reason: EndReason) {
        self.ended.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.end_reason.lock() {
            if guard.is_none() {
                *guard = Some(reason);
            }
        }
    }

    pub fn append_message(&self, message: Message) {
        if let Ok(mut history) = self.history.lock() {
            history.push(message);
        }
    }

    pub fn history_snapshot(&self) -> Vec<Message> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn set_mode(&self, mode: Mode) {
        if let Ok(mut guard) = self.mode.lock() {
            *guard = mode;
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode.lock().map(|g| *g).unwrap_or_default()
    }

    pub fn set_phone_capture(&self, enabled: bool) {
        if let Ok(mut t) = self.transcript.lock() {
            t.phone_capture = enabled;
        }
    }

    pub fn call_duration(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_speaking_sets_suppress_stt_first_by_construction() {
        let audio = AudioState::new();
        audio.begin_speaking();
        assert!(audio.is_speaking());
        assert!(audio.suppress_stt());
    }

    #[test]
    fn end_speaking_clears_both_flags() {
        let audio = AudioState::new();
        audio.begin_speaking();
        audio.end_speaking();
        assert!(!audio.is_speaking());
        assert!(!audio.suppress_stt());
    }

    #[test]
    fn transcript_buffer_joins_and_clears() {
        let mut buffer = TranscriptBuffer::new();
        buffer.push_final("hola".to_string());
        buffer.push_final("que tal".to_string());
        let joined = buffer.take_joined().unwrap();
        assert_eq!(joined, "hola que tal");
        assert!(buffer.is_empty());
        assert!(buffer.take_joined().is_none());
    }

    #[test]
    fn session_append_message_preserves_order() {
        let session = Session::new("C1", "S1");
        session.append_message(Message::user("hola"));
        session.append_message(Message::assistant("hola de vuelta"));
        let history = session.history_snapshot();
        assert_eq!(history[0].role, crate::types::Role::User);
        assert_eq!(history[1].role, crate::types::Role::Assistant);
    }
}
