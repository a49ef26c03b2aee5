//! IntegrationSupervisor (C10, §4.10)
//!
//! Tracks connectivity health for STT and TTS and owns the reconnect
//! policy: exponential backoff, base 1s, capped at 3 attempts for STT (TTS
//! reconnects on demand on the next `speak` call instead of proactively).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use crate::types::{HealthStatus, ServiceHealth};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Stt,
    Tts,
}

impl Service {
    fn as_str(self) -> &'static str {
        match self {
            Service::Stt => "stt",
            Service::Tts => "tts",
        }
    }
}

pub const STT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

pub struct IntegrationSupervisor {
    health: Mutex<HashMap<Service, ServiceHealth>>,
}

impl IntegrationSupervisor {
    pub fn new() -> Self {
        let mut health = HashMap::new();
        health.insert(Service::Stt, ServiceHealth::default());
        health.insert(Service::Tts, ServiceHealth::default());
        Self { health: Mutex::new(health) }
    }

    pub fn record_connecting(&self, service: Service) {
        self.update(service, |entry| entry.status = HealthStatus::Connecting);
    }

    pub fn record_connected(&self, service: Service) {
        self.update(service, |entry| {
            if entry.status == HealthStatus::Reconnecting {
                entry.total_reconnects += 1;
            }
            entry.status = HealthStatus::Connected;
            entry.last_connected = Some(Utc::now());
            entry.reconnect_attempts = 0;
            entry.last_error = None;
        });
    }

    pub fn record_disconnected(&self, service: Service, error: Option<String>) {
        self.update(service, |entry| {
            entry.status = HealthStatus::Reconnecting;
            entry.reconnect_attempts += 1;
            entry.last_error = error;
        });
    }

    pub fn record_failed(&self, service: Service) {
        self.update(service, |entry| entry.status = HealthStatus::Failed);
    }

    fn update(&self, service: Service, f: impl FnOnce(&mut ServiceHealth)) {
        if let Ok(mut guard) = self.health.lock() {
            if let Some(entry) = guard.get_mut(&service) {
                f(entry);
            }
        }
    }

    pub fn snapshot(&self, service: Service) -> ServiceHealth {
        self.health.lock().unwrap().get(&service).cloned().unwrap_or_default()
    }

    /// `true` once STT has exhausted its reconnect budget; the controller
    /// treats this as a fatal Session-ending condition (`stt_lost`).
    pub fn stt_exhausted(&self) -> bool {
        self.snapshot(Service::Stt).reconnect_attempts > STT_MAX_RECONNECT_ATTEMPTS
    }

    /// Exponential backoff delay before reconnect attempt `attempt` (1-indexed).
    pub fn backoff_delay(attempt: u32) -> Duration {
        BACKOFF_BASE.saturating_mul(1u32 << attempt.saturating_sub(1).min(4))
    }

    /// JSON-serializable health report for the admin surface.
    pub fn health_report(&self) -> HashMap<&'static str, ServiceHealth> {
        let guard = self.health.lock().unwrap();
        guard.iter().map(|(service, health)| (service.as_str(), health.clone())).collect()
    }
}

impl Default for IntegrationSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_supervisor_reports_disconnected_for_both_services() {
        let supervisor = IntegrationSupervisor::new();
        assert_eq!(supervisor.snapshot(Service::Stt).status, HealthStatus::Disconnected);
        assert_eq!(supervisor.snapshot(Service::Tts).status, HealthStatus::Disconnected);
    }

    #[test]
    fn disconnect_then_reconnect_increments_total_reconnects_once() {
        let supervisor = IntegrationSupervisor::new();
        supervisor.record_connected(Service::Stt);
        supervisor.record_disconnected(Service::Stt, Some("closed".to_string()));
        supervisor.record_connected(Service::Stt);
        let health = supervisor.snapshot(Service::Stt);
        assert_eq!(health.total_reconnects, 1);
        assert_eq!(health.reconnect_attempts, 0);
    }

    #[test]
    fn stt_exhausted_after_budget_overrun() {
        let supervisor = IntegrationSupervisor::new();
        for _ in 0..=STT_MAX_RECONNECT_ATTEMPTS {
            supervisor.record_disconnected(Service::Stt, None);
        }
        assert!(supervisor.stt_exhausted());
    }

    #[test]
    fn backoff_delay_doubles_per_attempt() {
        assert_eq!(IntegrationSupervisor::backoff_delay(1), Duration::from_secs(1));
        assert_eq!(IntegrationSupervisor::backoff_delay(2), Duration::from_secs(2));
        assert_eq!(IntegrationSupervisor::backoff_delay(3), Duration::from_secs(4));
    }
}
