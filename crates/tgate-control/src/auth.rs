//! HTTP basic auth.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::config::ControlConfig;

pub(crate) fn check_basic_auth(headers: &HeaderMap, config: &ControlConfig) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    match base64_decode(encoded.trim()) {
        Some(decoded) => decoded == format!("{}:{}", config.username, config.password),
        None => false,
    }
}

/// Standard-alphabet base64 decode. Returns `None` on any invalid character.
fn base64_decode(input: &str) -> Option<String> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let input = input.trim_end_matches('=');
    let mut result = Vec::with_capacity(input.len() * 3 / 4);
    let mut buf = 0u32;
    let mut bits = 0;

    for c in input.bytes() {
        let val = ALPHABET.iter().position(|&x| x == c)? as u32;
        buf = (buf << 6) | val;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            result.push(((buf >> bits) & 0xFF) as u8);
        }
    }

    String::from_utf8(result).ok()
}

pub(crate) fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"tgate\"")],
        "Unauthorized",
    )
        .into_response()
}
