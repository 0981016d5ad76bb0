//! IP hashing, client IP extraction and session tokens

use axum::http::HeaderMap;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Hash an IP address so the raw address never reaches storage
pub fn hash_ip(ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hex::encode(hasher.finalize())
}

/// Get the client IP from proxy headers.
/// Priority: X-Forwarded-For (first IP) > X-Real-IP > CF-Connecting-IP
///
/// Header values are taken on trust, nothing checks that they came from a proxy.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = header_value(headers, "x-forwarded-for") {
        if let Some(first_ip) = forwarded.split(',').next() {
            let ip = first_ip.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }

    ["x-real-ip", "cf-connecting-ip"]
        .iter()
        .filter_map(|name| header_value(headers, name))
        .map(str::trim)
        .find(|ip| !ip.is_empty())
        .map(str::to_string)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Reuse the client's session token, or mint a new 128-bit one
pub fn session_id(existing: Option<&str>) -> String {
    if let Some(token) = existing.map(str::trim).filter(|t| !t.is_empty()) {
        return token.to_string();
    }

    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
