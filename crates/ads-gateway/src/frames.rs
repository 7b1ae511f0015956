// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! JSON frame schema.  Inbound frames are `{type, payload?, id?}`; outbound
//! frames are tagged by `type` and serialized with snake_case payloads.

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Per-image cap: 25 MiB.
pub const MAX_IMAGE_BYTES: usize = 25 * 1024 * 1024;

/// Accepted attachment MIME subtypes (with or without the `image/` prefix).
pub const IMAGE_MIME_ALLOWLIST: &[&str] = &["jpeg", "png", "gif", "webp", "bmp", "svg+xml"];

/// An inbound image attachment (base64 payload).
#[derive(Debug, Clone, Deserialize)]
pub struct ImagePayload {
    pub name: String,
    pub mime: String,
    pub data: String,
    #[serde(default)]
    pub size: Option<usize>,
}

/// A validated inbound frame.
#[derive(Debug)]
pub enum Inbound {
    Prompt {
        text: String,
        images: Vec<ImagePayload>,
        client_id: Option<String>,
    },
    Command {
        line: String,
    },
    Interrupt,
    ClearHistory,
}

/// Parse and validate one inbound text frame.
pub fn parse_frame(raw: &str) -> Result<Inbound, GatewayError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| GatewayError::Validation(format!("frame is not JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| GatewayError::Validation("frame must be a JSON object".into()))?;
    let frame_type = obj
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| GatewayError::Validation("frame is missing \"type\"".into()))?;

    let client_id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| {
            obj.get("payload")
                .and_then(|p| p.get("id"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });

    match frame_type {
        "prompt" => {
            let payload = obj
                .get("payload")
                .ok_or_else(|| GatewayError::Validation("prompt needs a payload".into()))?;
            match payload {
                serde_json::Value::String(text) => Ok(Inbound::Prompt {
                    text: text.clone(),
                    images: Vec::new(),
                    client_id,
                }),
                serde_json::Value::Object(map) => {
                    let text = map
                        .get("text")
                        .and_then(|t| t.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let images: Vec<ImagePayload> = match map.get("images") {
                        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
                            GatewayError::Validation(format!("bad images payload: {e}"))
                        })?,
                        None => Vec::new(),
                    };
                    if text.is_empty() && images.is_empty() {
                        return Err(GatewayError::Validation(
                            "prompt payload is empty".into(),
                        ));
                    }
                    Ok(Inbound::Prompt {
                        text,
                        images,
                        client_id,
                    })
                }
                _ => Err(GatewayError::Validation(
                    "prompt payload must be text or an object".into(),
                )),
            }
        }
        "command" => {
            let line = obj
                .get("payload")
                .and_then(|p| p.as_str())
                .ok_or_else(|| GatewayError::Validation("command payload must be a string".into()))?
                .trim()
                .to_string();
            if !line.starts_with('/') {
                return Err(GatewayError::Validation(
                    "commands must start with '/'".into(),
                ));
            }
            Ok(Inbound::Command { line })
        }
        "interrupt" => Ok(Inbound::Interrupt),
        "clear_history" => Ok(Inbound::ClearHistory),
        other => Err(GatewayError::Validation(format!(
            "unknown frame type {other:?}"
        ))),
    }
}

/// Validate an image attachment's MIME and size before it touches disk.
pub fn validate_image(image: &ImagePayload, decoded_len: usize) -> Result<(), GatewayError> {
    let subtype = image
        .mime
        .strip_prefix("image/")
        .unwrap_or(image.mime.as_str());
    if !IMAGE_MIME_ALLOWLIST.contains(&subtype) {
        return Err(GatewayError::Validation(format!(
            "unsupported image type {:?}",
            image.mime
        )));
    }
    let declared = image.size.unwrap_or(decoded_len);
    if decoded_len > MAX_IMAGE_BYTES || declared > MAX_IMAGE_BYTES {
        return Err(GatewayError::Validation(format!(
            "image {:?} exceeds the 25 MiB cap",
            image.name
        )));
    }
    Ok(())
}

// ─── Outbound ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct AgentView {
    pub id: String,
    pub name: String,
    pub ready: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceSnapshot {
    pub root: String,
    pub cwd: String,
    pub agents: Vec<AgentView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryItem {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub text: String,
    pub ts: i64,
}

/// Every frame the gateway sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Welcome {
        workspace: WorkspaceSnapshot,
    },
    Workspace {
        workspace: WorkspaceSnapshot,
    },
    History {
        items: Vec<HistoryItem>,
    },
    Delta {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    Command {
        id: String,
        line: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i64>,
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    Plan {
        items: Vec<PlanItemView>,
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    Patch {
        diff: String,
        files: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    /// Internal-reasoning excerpts streamed on the side.
    Explored {
        text: String,
    },
    Result {
        ok: bool,
        output: String,
    },
    Error {
        message: String,
    },
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanItemView {
    pub title: String,
    pub status: String,
}

impl Outbound {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"frame serialization failed"}"#.to_string()
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_prompt_parses() {
        match parse_frame(r#"{"type":"prompt","payload":"say hi"}"#).unwrap() {
            Inbound::Prompt { text, images, client_id } => {
                assert_eq!(text, "say hi");
                assert!(images.is_empty());
                assert!(client_id.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn object_prompt_with_id_and_images() {
        let raw = r#"{"type":"prompt","id":"m-1","payload":{"text":"look",
            "images":[{"name":"a.png","mime":"image/png","data":"aGk=","size":2}]}}"#;
        match parse_frame(raw).unwrap() {
            Inbound::Prompt { text, images, client_id } => {
                assert_eq!(text, "look");
                assert_eq!(images.len(), 1);
                assert_eq!(images[0].mime, "image/png");
                assert_eq!(client_id.as_deref(), Some("m-1"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn empty_prompt_object_is_invalid() {
        assert!(parse_frame(r#"{"type":"prompt","payload":{}}"#).is_err());
    }

    #[test]
    fn command_requires_slash() {
        assert!(parse_frame(r#"{"type":"command","payload":"status"}"#).is_err());
        assert!(matches!(
            parse_frame(r#"{"type":"command","payload":"/status"}"#).unwrap(),
            Inbound::Command { line } if line == "/status"
        ));
    }

    #[test]
    fn interrupt_and_clear_history_need_no_payload() {
        assert!(matches!(
            parse_frame(r#"{"type":"interrupt"}"#).unwrap(),
            Inbound::Interrupt
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"clear_history"}"#).unwrap(),
            Inbound::ClearHistory
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(parse_frame(r#"{"type":"dance"}"#).is_err());
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"["array"]"#).is_err());
    }

    #[test]
    fn image_mime_allowlist_is_enforced() {
        let image = ImagePayload {
            name: "x.tiff".into(),
            mime: "image/tiff".into(),
            data: String::new(),
            size: None,
        };
        assert!(validate_image(&image, 10).is_err());

        let ok = ImagePayload {
            name: "x.svg".into(),
            mime: "image/svg+xml".into(),
            data: String::new(),
            size: None,
        };
        validate_image(&ok, 10).unwrap();
    }

    #[test]
    fn image_size_cap_is_enforced() {
        let image = ImagePayload {
            name: "big.png".into(),
            mime: "png".into(),
            data: String::new(),
            size: Some(MAX_IMAGE_BYTES + 1),
        };
        assert!(validate_image(&image, 10).is_err());
        assert!(validate_image(
            &ImagePayload {
                name: "ok.png".into(),
                mime: "png".into(),
                data: String::new(),
                size: None,
            },
            MAX_IMAGE_BYTES + 1
        )
        .is_err());
    }

    #[test]
    fn outbound_serializes_with_snake_case_type() {
        let json = Outbound::Result {
            ok: true,
            output: "hi!".into(),
        }
        .to_json();
        assert_eq!(json, r#"{"type":"result","ok":true,"output":"hi!"}"#);
    }

    #[test]
    fn ack_omits_missing_id() {
        assert_eq!(Outbound::Ack { id: None }.to_json(), r#"{"type":"ack"}"#);
        assert_eq!(
            Outbound::Ack { id: Some("m-1".into()) }.to_json(),
            r#"{"type":"ack","id":"m-1"}"#
        );
    }
}
