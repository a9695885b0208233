//! Authentication middleware and client identity resolution.
//!
//! # Design
//! - A configured bearer token wins; otherwise an `X-Signature` HMAC-SHA256 of
//!   the raw body is checked against the shared secret.
//! - Signed callers are keyed by the socket peer, never by forwarding headers.
//! - The resolved [`Identity`] is stored as a request extension for handlers.
//! - With authentication disabled every caller is anonymous and keyed by IP.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use proxyseed_config::SecuritySettings;
use proxyseed_core::Identity;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::http::constants::{
    HEADER_FORWARDED_FOR, HEADER_REAL_IP, HEADER_SIGNATURE, MAX_REQUEST_BODY_BYTES,
    UNKNOWN_CLIENT_IP,
};
use crate::http::errors::ApiError;
use crate::state::ApiState;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_PREFIX_LEN: usize = 8;

pub(crate) async fn require_identity(
    State(state): State<Arc<ApiState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let ip = client_ip(req.headers(), peer.as_deref());

    let (mut parts, body) = req.into_parts();
    let (identity, body) = if state.security.auth_enabled {
        authenticate(&state.security, &parts.headers, body, ip, peer.as_deref()).await?
    } else {
        (Identity::anonymous(ip), body)
    };
    debug!(user = identity.user_id.as_deref().unwrap_or("anonymous"), ip = %identity.client_ip, "request authenticated");
    parts.extensions.insert(identity);
    Ok(next.run(Request::from_parts(parts, body)).await)
}

async fn authenticate(
    security: &SecuritySettings,
    headers: &HeaderMap,
    body: Body,
    client_ip: String,
    peer: Option<&str>,
) -> Result<(Identity, Body), ApiError> {
    if let Some(token) = bearer_token(headers)
        && security.bearer_tokens.iter().any(|known| known == token)
    {
        let principal = format!("token:{}", token_prefix(token));
        return Ok((Identity::user(principal, client_ip), body));
    }

    if let Some(signature) = headers
        .get(HEADER_SIGNATURE)
        .and_then(|value| value.to_str().ok())
        && !security.hmac_secret.is_empty()
    {
        let bytes = to_bytes(body, MAX_REQUEST_BODY_BYTES)
            .await
            .map_err(|_| ApiError::bad_request("request body could not be read"))?;
        if signature_matches(&security.hmac_secret, &bytes, signature)? {
            let principal = format!("hmac:{}", peer.unwrap_or(UNKNOWN_CLIENT_IP));
            return Ok((Identity::user(principal, client_ip), Body::from(bytes)));
        }
        warn!(ip = %client_ip, "rejected request with invalid signature");
    }

    Err(ApiError::unauthorized("Invalid or missing authentication"))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn token_prefix(token: &str) -> &str {
    token
        .char_indices()
        .nth(TOKEN_PREFIX_LEN)
        .map_or(token, |(idx, _)| &token[..idx])
}

fn signature_matches(secret: &str, body: &[u8], signature: &str) -> Result<bool, ApiError> {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return Ok(false);
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ApiError::internal("signature key is invalid"))?;
    mac.update(body);
    Ok(mac.verify_slice(&expected).is_ok())
}

/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the peer address.
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<&str>) -> String {
    header_value(headers, HEADER_FORWARDED_FOR)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| header_value(headers, HEADER_REAL_IP))
        .or(peer)
        .unwrap_or(UNKNOWN_CLIENT_IP)
        .to_string()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
