//! Voice gateway — bridges a telephony WebSocket with streaming STT, an LLM,
//! and streaming TTS to run one real-time phone conversation end to end.

pub mod types;
pub mod error;
pub mod config;
pub mod security;
pub mod session;
pub mod telephony;
pub mod audio_ingress;
pub mod stt;
pub mod tts;
pub mod audio_egress;
pub mod transcript;
pub mod decision;
pub mod tools;
pub mod controller;
pub mod supervisor;
pub mod server;
pub mod cli;

pub use config::GatewayConfig;
pub use controller::ConversationController;
pub use error::{ErrorKind, GatewayError, Outcome};
pub use server::{start as start_server, ServerState};
pub use session::Session;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
