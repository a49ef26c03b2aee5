//! AudioIngress (C2, §4.2)
//!
//! Receives `Media` bytes from C1 and forwards them to STTClient, spilling
//! to a bounded buffer when STT isn't connected yet and discarding while the
//! agent is speaking (barge-in suppression).

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::warn;

const SPILL_CAP_BYTES: usize = 40 * 1024;

pub enum IngressAction {
    Discarded,
    Spilled,
    SpillFull,
    Forwarded(Vec<u8>),
}

/// Bounded FIFO spill buffer used while STT is not yet connected.
pub struct SpillBuffer {
    inner: Mutex<VecDeque<u8>>,
}

impl SpillBuffer {
    pub fn new() -> Self {
        Self { inner: Mutex::new(VecDeque::new()) }
    }

    fn push(&self, bytes: &[u8]) -> bool {
        let mut guard = self.inner.lock().unwrap();
        if guard.len() + bytes.len() > SPILL_CAP_BYTES {
            return false;
        }
        guard.extend(bytes.iter().copied());
        true
    }

    /// Drain the whole buffer in FIFO order.
    pub fn drain(&self) -> Vec<u8> {
        let mut guard = self.inner.lock().unwrap();
        guard.drain(..).collect()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SpillBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies the C2 behavior matrix to one inbound media frame.
///
/// | AudioState | Action |
/// |---|---|
/// | `suppress_stt = true` | discard |
/// | STT not connected | append to spill buffer (cap 40 KB), drop newest with warning when full |
/// | STT connected | forward |
pub fn ingest(spill: &SpillBuffer, suppress_stt: bool, stt_connected: bool, payload: Vec<u8>) -> IngressAction {
    if suppress_stt {
        return IngressAction::Discarded;
    }

    if !stt_connected {
        if spill.push(&payload) {
            return IngressAction::Spilled;
        }
        warn!(dropped_bytes = payload.len(), "audio ingress spill buffer full, dropping newest frame");
        return IngressAction::SpillFull;
    }

    IngressAction::Forwarded(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppress_stt_discards_regardless_of_connection() {
        let spill = SpillBuffer::new();
        match ingest(&spill, true, true, vec![1, 2, 3]) {
            IngressAction::Discarded => {}
            _ => panic!("expected discard"),
        }
        assert!(spill.is_empty());
    }

    #[test]
    fn disconnected_stt_spills_in_fifo_order() {
        let spill = SpillBuffer::new();
        ingest(&spill, false, false, vec![1, 2, 3]);
        ingest(&spill, false, false, vec![4, 5]);
        assert_eq!(spill.drain(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn spill_buffer_drops_newest_when_full() {
        let spill = SpillBuffer::new();
        let chunk = vec![0u8; SPILL_CAP_BYTES];
        ingest(&spill, false, false, chunk);
        match ingest(&spill, false, false, vec![1, 2, 3]) {
            IngressAction::SpillFull => {}
            _ => panic!("expected spill-full"),
        }
        assert_eq!(spill.len(), SPILL_CAP_BYTES);
    }

    #[test]
    fn connected_stt_forwards_directly() {
        let spill = SpillBuffer::new();
        match ingest(&spill, false, true, vec![9, 9]) {
            IngressAction::Forwarded(bytes) => assert_eq!(bytes, vec![9, 9]),
            _ => panic!("expected forward"),
        }
        assert!(spill.is_empty());
    }
}
