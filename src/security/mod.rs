//! Security module
//!
//! Provides OS keyring-backed storage for provider credentials (STT, TTS,
//! LLM API keys, telephony auth token, admin bearer token). Nothing else in
//! this gateway touches raw secrets directly.

pub mod keyring;

pub use keyring::{delete_secret, get_secret, has_secret, set_secret};
