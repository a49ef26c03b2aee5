//! Configuration management
//!
//! Loads gateway settings from a TOML file. Provider credentials are never
//! stored in this file: each config section holds only a keyring lookup key,
//! and the actual secret is resolved through `security::keyring` at connect
//! time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub telephony: TelephonyConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            telephony: TelephonyConfig::default(),
            stt: SttConfig::default(),
            tts: TtsConfig::default(),
            llm: LlmConfig::default(),
            limits: LimitsConfig::default(),
            prompts: PromptsConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// Account identifier used with the out-of-band hang-up REST call.
    #[serde(default)]
    pub account_sid: String,
    /// Base URL of the telephony provider's REST API.
    #[serde(default = "default_telephony_base_url")]
    pub control_base_url: String,
}

fn default_telephony_base_url() -> String {
    "https://api.telephony.example.com".to_string()
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self { account_sid: String::new(), control_base_url: default_telephony_base_url() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "default_stt_url")]
    pub ws_url: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_true")]
    pub interim_results: bool,
    /// Reconnect attempts before the Session terminates with `stt_lost`.
    #[serde(default = "default_stt_max_reconnects")]
    pub max_reconnect_attempts: u32,
}

fn default_stt_url() -> String {
    "wss://stt.example.com/v1/stream".to_string()
}

fn default_language() -> String {
    "es-MX".to_string()
}

fn default_stt_max_reconnects() -> u32 {
    3
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            ws_url: default_stt_url(),
            language: default_language(),
            model: String::new(),
            interim_results: true,
            max_reconnect_attempts: default_stt_max_reconnects(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_tts_http_url")]
    pub http_fallback_url: String,
    #[serde(default)]
    pub voice_id: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_true")]
    pub optimize_latency: bool,
}

fn default_tts_ws_url() -> String {
    "wss://tts.example.com/v1/stream".to_string()
}

fn default_tts_http_url() -> String {
    "https://tts.example.com/v1/synthesize".to_string()
}

fn default_output_format() -> String {
    "ulaw_8000".to_string()
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            ws_url: default_tts_ws_url(),
            http_fallback_url: default_tts_http_url(),
            voice_id: String::new(),
            output_format: default_output_format(),
            optimize_latency: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

fn default_llm_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_prompt_chars() -> usize {
    // tokens (~2500) * 3 chars/token, matching the collaborator's derivation.
    7500
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_silence_timeout_secs")]
    pub silence_timeout_secs: u64,
    #[serde(default = "default_max_call_duration_secs")]
    pub max_call_duration_secs: u64,
    #[serde(default = "default_calls_per_day")]
    pub calls_per_day_cap: u32,
    #[serde(default = "default_worker_pool_size")]
    pub tool_worker_pool_size: usize,
}

fn default_silence_timeout_secs() -> u64 {
    30
}

fn default_max_call_duration_secs() -> u64 {
    600
}

fn default_calls_per_day() -> u32 {
    500
}

fn default_worker_pool_size() -> usize {
    8
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            silence_timeout_secs: default_silence_timeout_secs(),
            max_call_duration_secs: default_max_call_duration_secs(),
            calls_per_day_cap: default_calls_per_day(),
            tool_worker_pool_size: default_worker_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_farewell")]
    pub farewell: String,
    #[serde(default = "default_apology")]
    pub llm_failure_apology: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_greeting() -> String {
    "Hola, gracias por llamar. ¿En qué puedo ayudarle hoy?".to_string()
}

fn default_farewell() -> String {
    "Gracias por su llamada, que tenga un excelente día. Hasta luego.".to_string()
}

fn default_apology() -> String {
    "Lo siento, hay un problema con la conexión al asistente. Por favor, intente de nuevo.".to_string()
}

fn default_system_prompt() -> String {
    "Eres un asistente telefónico. Responde de forma breve y natural para voz.".to_string()
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            farewell: default_farewell(),
            llm_failure_apology: default_apology(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_bind")]
    pub bind_address: String,
    /// Keyring lookup key for the admin bearer token; the token itself is
    /// never written here.
    #[serde(default = "default_admin_token_key")]
    pub token_keyring_key: String,
}

fn default_admin_bind() -> String {
    "0.0.0.0:8088".to_string()
}

fn default_admin_token_key() -> String {
    "admin-bearer-token".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self { bind_address: default_admin_bind(), token_keyring_key: default_admin_token_key() }
    }
}

fn default_true() -> bool {
    true
}

impl GatewayConfig {
    /// Load configuration from file, writing defaults on first run.
    pub fn load() -> Result<Self> {
        let path = config_path()?;

        if path.exists() {
            let contents = std::fs::read_to_string(&path).context("Failed to read config file")?;
            let config: GatewayConfig = toml::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = GatewayConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path()?;
        let parent = path.parent().context("Config path has no parent")?;
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, contents).context("Failed to write config file")?;
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "voice-gateway", "voice-gateway")
        .context("Failed to resolve project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = GatewayConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: GatewayConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.limits.max_call_duration_secs, 600);
    }

    #[test]
    fn prompts_default_to_configured_greeting_and_farewell() {
        let prompts = PromptsConfig::default();
        assert!(!prompts.greeting.is_empty());
        assert!(!prompts.farewell.is_empty());
    }
}
