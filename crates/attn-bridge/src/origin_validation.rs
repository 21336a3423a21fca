//! WebSocket Origin header validation.
//!
//! Adapted from the teacher's localhost-only allowlist
//! (`at-bridge::origin_validation`), extended for a desktop companion
//! app: `tauri://localhost` is a legitimate origin for a Tauri
//! webview, and a missing Origin header is allowed rather than
//! rejected, since some embedded webviews and most non-browser
//! WebSocket clients never send one.

use axum::http::{HeaderMap, StatusCode};

pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost",
    "https://localhost",
    "http://127.0.0.1",
    "https://127.0.0.1",
    "http://[::1]",
    "https://[::1]",
    "tauri://localhost",
];

/// Validates the Origin header of a WebSocket upgrade request against
/// an allowlist. A missing Origin header is accepted: unlike a
/// browser tab, there's no ambient cross-site request to forge here.
pub fn validate_websocket_origin(headers: &HeaderMap, allowed_origins: &[String]) -> Result<(), StatusCode> {
    let Some(origin_header) = headers.get("origin") else {
        return Ok(());
    };
    let origin = origin_header.to_str().map_err(|_| StatusCode::FORBIDDEN)?;

    let is_allowed = allowed_origins.iter().any(|allowed| {
        if origin == allowed {
            return true;
        }
        if let Some(remainder) = origin.strip_prefix(allowed.as_str()) {
            if let Some(port) = remainder.strip_prefix(':') {
                return port.chars().all(|c| c.is_ascii_digit());
            }
        }
        false
    });

    if is_allowed {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

pub fn get_default_allowed_origins() -> Vec<String> {
    DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        get_default_allowed_origins()
    }

    #[test]
    fn missing_origin_is_allowed() {
        let headers = HeaderMap::new();
        assert!(validate_websocket_origin(&headers, &allowed()).is_ok());
    }

    #[test]
    fn tauri_origin_is_allowed() {
        let mut headers = HeaderMap::new();
        headers.insert("origin", "tauri://localhost".parse().unwrap());
        assert!(validate_websocket_origin(&headers, &allowed()).is_ok());
    }

    #[test]
    fn localhost_with_port_is_allowed() {
        let mut headers = HeaderMap::new();
        headers.insert("origin", "http://localhost:5173".parse().unwrap());
        assert!(validate_websocket_origin(&headers, &allowed()).is_ok());
    }

    #[test]
    fn foreign_origin_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("origin", "https://evil.example".parse().unwrap());
        assert!(validate_websocket_origin(&headers, &allowed()).is_err());
    }
}
