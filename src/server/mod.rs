//! Gateway HTTP/WS server: the telephony WebSocket ingress plus a small
//! bearer-gated admin surface.

pub mod admin;
pub mod auth;
pub mod registry;
pub mod ws;

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use reqwest::Client;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::security::keyring;
use crate::supervisor::IntegrationSupervisor;
use registry::CallRegistry;

/// Shared server state, cloned into every axum handler.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<RwLock<GatewayConfig>>,
    pub http_client: Client,
    pub admin_token: String,
    pub stt_api_key: String,
    pub tts_api_key: String,
    pub llm_api_key: String,
    pub telephony_auth_token: String,
    pub supervisor: Arc<IntegrationSupervisor>,
    pub registry: Arc<CallRegistry>,
}

pub async fn start(host: &str, port: u16, https: bool, cert: Option<String>, key: Option<String>) -> Result<()> {
    let config = GatewayConfig::load()?;

    let admin_token = keyring::get_secret(&config.admin.token_keyring_key)
        .context("admin bearer token not configured; run 'voice-gateway key set admin-bearer-token <value>'")?;
    let stt_api_key = keyring::get_secret("stt-api-key").context("STT API key not configured")?;
    let tts_api_key = keyring::get_secret("tts-api-key").context("TTS API key not configured")?;
    let llm_api_key = keyring::get_secret("llm-api-key").context("LLM API key not configured")?;
    let telephony_auth_token =
        keyring::get_secret("telephony-auth-token").context("telephony auth token not configured")?;

    let registry = Arc::new(CallRegistry::new(config.limits.calls_per_day_cap));

    let state = ServerState {
        http_client: Client::new(),
        admin_token,
        stt_api_key,
        tts_api_key,
        llm_api_key,
        telephony_auth_token,
        supervisor: Arc::new(IntegrationSupervisor::new()),
        registry,
        config: Arc::new(RwLock::new(config)),
    };

    let addr: SocketAddr = format!("{host}:{port}").parse().context("invalid bind address")?;

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let admin_routes = Router::new()
        .route("/admin/status", get(admin::status))
        .route("/admin/reload", post(admin::reload))
        .layer(middleware::from_fn_with_state(state.clone(), auth::admin_auth_middleware));

    let app = Router::new()
        .route("/healthz", get(admin::healthz))
        .route("/telephony-ws", get(ws::telephony_ws_handler))
        .merge(admin_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(%addr, https, "voice gateway listening");

    if https {
        if let (Some(cert_path), Some(key_path)) = (cert, key) {
            let cert_data = tokio::fs::read(&cert_path).await.context("failed to read certificate file")?;
            let key_data = tokio::fs::read(&key_path).await.context("failed to read key file")?;
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem(cert_data, key_data).await?;
            axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
            return Ok(());
        }
        anyhow::bail!("https requested but cert/key path missing");
    }

    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind listener")?;
    axum::serve(listener, app).await?;
    Ok(())
}
