//! Admin bearer-token auth.
//!
//! The admin surface (`/admin/status`, `/admin/reload`) is a single
//! operator endpoint, not a multi-user system: constant-time bearer token
//! comparison is the whole auth model. The token itself is stored via
//! `security::keyring`, never in the config file.

use axum::extract::{Request, State};
use axum::http::{header::AUTHORIZATION, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use super::ServerState;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn admin_auth_middleware(State(state): State<ServerState>, request: Request, next: Next) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .unwrap_or("");

    if state.admin_token.is_empty() || !constant_time_eq(token.as_bytes(), state.admin_token.as_bytes()) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_identical_tokens() {
        assert!(constant_time_eq(b"secret-token", b"secret-token"));
    }

    #[test]
    fn constant_time_eq_rejects_mismatched_tokens() {
        assert!(!constant_time_eq(b"secret-token", b"wrong-token"));
        assert!(!constant_time_eq(b"short", b"longer-token"));
    }
}
