//! Ambient admin-surface bookkeeping (§3.1 ADDED): active call count, a
//! capped diagnostic log of recent calls, and the calls-per-day cap. None of
//! this is persisted; it resets when the process restarts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::types::EndReason;

const CALL_LOG_CAP: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub call_id: String,
    pub duration_secs: u64,
    pub end_reason: EndReason,
    pub total_reconnects: u32,
}

struct RateLimitState {
    day: NaiveDate,
    count: u32,
}

pub struct CallRegistry {
    active_sessions: AtomicUsize,
    rate_limit: Mutex<RateLimitState>,
    log: Mutex<VecDeque<CallRecord>>,
    cap: u32,
}

impl CallRegistry {
    pub fn new(calls_per_day_cap: u32) -> Self {
        Self {
            active_sessions: AtomicUsize::new(0),
            rate_limit: Mutex::new(RateLimitState { day: Utc::now().date_naive(), count: 0 }),
            log: Mutex::new(VecDeque::with_capacity(CALL_LOG_CAP)),
            cap: calls_per_day_cap,
        }
    }

    /// `true` if a new call may start; also advances the day window and
    /// books the attempt. Checked by the ingress handler before a Session
    /// is constructed (§3.1 RateLimitState).
    pub fn try_admit_call(&self) -> bool {
        let mut state = self.rate_limit.lock().unwrap();
        let today = Utc::now().date_naive();
        if state.day != today {
            state.day = today;
            state.count = 0;
        }
        if state.count >= self.cap {
            return false;
        }
        state.count += 1;
        true
    }

    pub fn calls_today(&self) -> u32 {
        let mut state = self.rate_limit.lock().unwrap();
        let today = Utc::now().date_naive();
        if state.day != today {
            state.day = today;
            state.count = 0;
        }
        state.count
    }

    pub fn session_started(&self) {
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn session_ended(&self, record: CallRecord) {
        self.active_sessions.fetch_sub(1, Ordering::SeqCst);
        let mut log = self.log.lock().unwrap();
        if log.len() == CALL_LOG_CAP {
            log.pop_front();
        }
        log.push_back(record);
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    pub fn recent_calls(&self) -> Vec<CallRecord> {
        self.log.lock().unwrap().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_calls_up_to_the_daily_cap() {
        let registry = CallRegistry::new(2);
        assert!(registry.try_admit_call());
        assert!(registry.try_admit_call());
        assert!(!registry.try_admit_call());
        assert_eq!(registry.calls_today(), 2);
    }

    #[test]
    fn session_lifecycle_tracks_active_count_and_log() {
        let registry = CallRegistry::new(10);
        registry.session_started();
        registry.session_started();
        assert_eq!(registry.active_sessions(), 2);

        registry.session_ended(CallRecord {
            call_id: "call-1".to_string(),
            duration_secs: 42,
            end_reason: EndReason::CallerHangup,
            total_reconnects: 0,
        });
        assert_eq!(registry.active_sessions(), 1);
        assert_eq!(registry.recent_calls().len(), 1);
    }

    #[test]
    fn call_log_is_capped_and_drops_oldest() {
        let registry = CallRegistry::new(1000);
        for i in 0..(CALL_LOG_CAP + 5) {
            registry.session_started();
            registry.session_ended(CallRecord {
                call_id: format!("call-{i}"),
                duration_secs: 1,
                end_reason: EndReason::CallerHangup,
                total_reconnects: 0,
            });
        }
        let calls = registry.recent_calls();
        assert_eq!(calls.len(), CALL_LOG_CAP);
        assert_eq!(calls.first().unwrap().call_id, "call-5");
    }
}
