//! TranscriptAggregator (C6, §4.6)
//!
//! Coalesces a burst of STT finals into one utterance. Each final restarts a
//! pause timer (700ms normal, 1000ms during phone-number capture); once the
//! timer elapses with no new final, the buffered text is emitted. A 15s hard
//! ceiling forces emission even under a chatty caller who never pauses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::session::Session;

pub const PAUSE_NORMAL: Duration = Duration::from_millis(700);
pub const PAUSE_PHONE_CAPTURE: Duration = Duration::from_millis(1000);
pub const HARD_CEILING: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub enum UtteranceEvent {
    Ready(String),
}

/// Debounces STT finals against the Session's shared `TranscriptBuffer`.
/// Cheap to clone: the generation counter and channel are the only state
/// that needs to survive across `on_final` calls.
#[derive(Clone)]
pub struct TranscriptAggregator {
    session: Arc<Session>,
    generation: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<UtteranceEvent>,
}

impl TranscriptAggregator {
    pub fn new(session: Arc<Session>, events: mpsc::UnboundedSender<UtteranceEvent>) -> Self {
        Self { session, generation: Arc::new(AtomicU64::new(0)), events }
    }

    /// Feed one STT final transcript. Ignored while the agent is speaking
    /// (barge-in suppression, Invariant 1).
    pub fn on_final(&self, text: String) {
        if self.session.audio.suppress_stt() {
            return;
        }

        let (accumulated_for, forced_by_ceiling) = {
            let mut buffer = self.session.transcript.lock().unwrap();
            buffer.push_final(text);
            let elapsed = buffer.accumulated_for();
            (elapsed, elapsed >= HARD_CEILING)
        };

        if forced_by_ceiling {
            self.emit_if_current(self.generation.fetch_add(1, Ordering::SeqCst) + 1);
            return;
        }
        let _ = accumulated_for;

        self.arm_timer();
    }

    /// Feed one STT partial transcript. Partials never add text to the
    /// buffer, but §4.6 restarts the pause timer on every STT event, not
    /// just finals, so a caller still speaking between slow finals doesn't
    /// trip the timer early. A no-op while nothing has accumulated yet,
    /// since there would be nothing to emit.
    pub fn on_partial(&self) {
        if self.session.audio.suppress_stt() {
            return;
        }
        let has_accumulated = !self.session.transcript.lock().unwrap().is_empty();
        if !has_accumulated {
            return;
        }
        self.arm_timer();
    }

    /// Bump the generation counter and arm a fresh pause timer for it.
    fn arm_timer(&self) {
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pause = if self.session.transcript.lock().unwrap().phone_capture {
            PAUSE_PHONE_CAPTURE
        } else {
            PAUSE_NORMAL
        };

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(pause).await;
            this.emit_if_current(my_generation);
        });
    }

    /// Emit only if no newer final has arrived since this timer was armed.
    fn emit_if_current(&self, expected_generation: u64) {
        if self.generation.load(Ordering::SeqCst) != expected_generation {
            return;
        }
        let joined = self.session.transcript.lock().unwrap().take_joined();
        if let Some(text) = joined {
            let _ = self.events.send(UtteranceEvent::Ready(text));
        }
    }
}
