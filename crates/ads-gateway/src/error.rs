// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// WebSocket close code for a rejected auth token.
pub const CLOSE_AUTH: u16 = 4401;

/// WebSocket close code when the client cap is exceeded.
pub const CLOSE_CAPACITY: u16 = 4409;

/// WebSocket close code for an expired idle timer.
pub const CLOSE_IDLE: u16 = 4400;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed frame or payload.  Reported as an `error` frame; the
    /// socket stays open.
    #[error("validation error: {0}")]
    Validation(String),

    /// Token mismatch — the socket is closed with [`CLOSE_AUTH`].
    #[error("authentication rejected")]
    Auth,

    /// Client cap exceeded — the socket is closed with [`CLOSE_CAPACITY`].
    #[error("too many clients")]
    Capacity,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for GatewayError {
    fn from(e: anyhow::Error) -> Self {
        GatewayError::Internal(e.to_string())
    }
}
