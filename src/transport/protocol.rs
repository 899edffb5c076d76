//! Wire protocol between the Bridge and the Proxy (§6).

use serde::{Deserialize, Serialize};

/// Client -> server frame. Sent by a Bridge (`CommandPacket`) or an
/// Executor (`PacketResponse`, once it has finished work dispatched to it).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Register {
        application: String,
        role: super::registry::Role,
    },
    CommandPacket {
        application: String,
        command: CommandPacket,
    },
    PacketResponse(PacketResponse),
}

/// Server -> client frame. `Dispatch` carries a command out to the chosen
/// Executor connection; `PacketResponse` carries the correlated result
/// back to the Bridge that issued it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    RegistrationResponse { ok: bool, message: String },
    Dispatch(CommandPacket),
    PacketResponse(PacketResponse),
}

/// A command frame (§3 `CommandPacket`). `request_id` is globally unique
/// within a 5-minute window and used both for response correlation and
/// idempotent retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPacket {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub action: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketStatus {
    Ok,
    Error,
}

/// The response delivered back to the Bridge, correlated by `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub status: PacketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

impl PacketResponse {
    pub fn ok(request_id: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            request_id: request_id.into(),
            status: PacketStatus::Ok,
            output: Some(output),
            error: None,
        }
    }

    pub fn error(request_id: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: PacketStatus::Error,
            output: None,
            error: Some(ErrorEnvelope {
                code: code.to_string(),
                message: message.into(),
                action: None,
            }),
        }
    }

    pub fn error_with_action(
        request_id: impl Into<String>,
        code: &str,
        message: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            status: PacketStatus::Error,
            output: None,
            error: Some(ErrorEnvelope {
                code: code.to_string(),
                message: message.into(),
                action: Some(action.into()),
            }),
        }
    }
}

/// The uniform error envelope (§4.1 "Error semantics", §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Categorizes a command's name into a command class for timeout lookup (§4.1).
pub fn command_class(action: &str) -> &str {
    match action {
        "export_pdf" => "export_pdf",
        "place_text" => "place_text",
        "screen_capture" => "screen_capture",
        "ping" => "ping",
        "list_presets" => "list_presets",
        a if a.starts_with("create_") => "create",
        _ => "default",
    }
}
