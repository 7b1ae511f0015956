// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Sub-protocol authentication.
//!
//! Browsers cannot set arbitrary headers on a WebSocket handshake, so the
//! client smuggles its credentials through `Sec-WebSocket-Protocol`:
//!
//! - `ads-token.<base64url(token)>`, `ads-token:<token>`, or the pair
//!   `["ads-token", "<token>"]`
//! - `ads-session.<id>` or `ads-session:<id>`
//!
//! Token comparison is constant-time.

use base64::Engine;
use subtle::ConstantTimeEq;

/// Credentials extracted from the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHello {
    pub token: Option<String>,
    pub session_id: Option<String>,
}

/// Parse a `Sec-WebSocket-Protocol` header value (comma-separated list).
pub fn parse_subprotocols(header: &str) -> ClientHello {
    let entries: Vec<&str> = header.split(',').map(str::trim).filter(|e| !e.is_empty()).collect();
    let mut hello = ClientHello::default();

    let mut i = 0;
    while i < entries.len() {
        let entry = entries[i];
        if let Some(encoded) = entry.strip_prefix("ads-token.") {
            hello.token = decode_b64url(encoded).or_else(|| Some(encoded.to_string()));
        } else if let Some(raw) = entry.strip_prefix("ads-token:") {
            hello.token = Some(raw.to_string());
        } else if entry == "ads-token" {
            // Pair form: the token travels as the next list entry.
            if let Some(next) = entries.get(i + 1) {
                hello.token = Some(next.to_string());
                i += 1;
            }
        } else if let Some(id) = entry.strip_prefix("ads-session.") {
            hello.session_id = Some(id.to_string());
        } else if let Some(id) = entry.strip_prefix("ads-session:") {
            hello.session_id = Some(id.to_string());
        }
        i += 1;
    }
    hello
}

fn decode_b64url(encoded: &str) -> Option<String> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Constant-time token check.  A `None` configured token disables auth.
pub fn token_accepted(configured: Option<&str>, presented: Option<&str>) -> bool {
    let Some(expected) = configured else {
        return true;
    };
    let Some(presented) = presented else {
        return false;
    };
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
