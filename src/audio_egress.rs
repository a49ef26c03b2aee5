//! AudioEgress (C5, §4.5)
//!
//! Takes μ-law chunks produced by TTSClient and serializes them onto the
//! TelephonyLink, then settles the Session back into listening state once
//! the provider acknowledges the boundary mark.

use std::sync::Arc;

use crate::error::Outcome;
use crate::session::Session;
use crate::telephony::TelephonyLink;

pub const END_OF_TTS_MARK: &str = "end_of_tts";

/// Drives one utterance out to the telephony link. Called with `speak_lock`
/// already held by the caller (the controller).
pub struct AudioEgress {
    link: TelephonyLink,
    session: Arc<Session>,
}

impl AudioEgress {
    pub fn new(link: TelephonyLink, session: Arc<Session>) -> Self {
        Self { link, session }
    }

    /// Invoked once before the first chunk of a new utterance: flush
    /// whatever the provider still has queued from any prior (now stale)
    /// utterance.
    pub fn begin_utterance(&self) -> Outcome<()> {
        self.link.send_clear()
    }

    /// Invoked by TTSClient's `on_chunk` callback for every decoded frame.
    pub fn on_chunk(&self, chunk: Vec<u8>) -> Outcome<()> {
        self.link.send_media(&chunk)
    }

    /// Invoked once TTSClient reports the utterance finished (successfully,
    /// stalled, or via HTTP fallback). Emits the boundary mark and restores
    /// listening state (§4.9 turn-taking).
    pub fn end_utterance(&self) -> Outcome<()> {
        self.link.send_mark(END_OF_TTS_MARK)?;
        self.session.audio.end_speaking();
        Ok(())
    }
}
