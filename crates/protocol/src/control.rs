//! Steuer-Protokoll
//!
//! Alle JSON-Nachrichten zwischen Client und Agenten-Dienst.
//!
//! ## Design
//! - Getaggte Enums (`"type"`-Feld) fuer typsichere Nachrichtentypen
//! - Handshake: `hello` -> `hello_ack` oder `error` (CNKZ_ERR_1002)
//! - Tool-Calls sind ein explizites Request/Response-Paar mit `call_id`
//! - Vom Client per `inject_message` gesendete Texte werden vom Agenten
//!   nicht als Transkript zurueckgespiegelt

use connekz_core::error::ErrorCode;
use connekz_core::types::{AgentStatus, CallId, ConversationId, Role, ToolCallPayload};
use serde::{Deserialize, Serialize};

/// Aktuelle Protokollversion (wird im Handshake gesendet)
pub const PROTOKOLL_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Client -> Agent
// ---------------------------------------------------------------------------

/// Handshake mit Zugangsdaten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub client_id: String,
    pub client_secret: String,
    pub user_identity: Option<String>,
    pub client_version: String,
    pub protocol_version: u16,
}

/// Beginn eines logischen Gespraechs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub conversation_id: ConversationId,
    /// Abtastrate der folgenden Audio-Pakete in Hz
    pub sample_rate: u32,
}

/// Text der wie gesprochene Sprache behandelt wird
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectMessageRequest {
    pub text: String,
    pub conversation_id: ConversationId,
}

/// Ergebnis eines Tool-Calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub call_id: CallId,
    /// false wenn der Handler fehlgeschlagen ist oder das Zeitlimit ueberschritten hat
    pub success: bool,
    /// Ergebnis-Text bzw. Fehlerbeschreibung
    pub output: String,
}

/// Pong-Antwort (spiegelt Timestamp zurueck)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PongMessage {
    pub echo_timestamp_ms: u64,
    pub client_timestamp_ms: u64,
}

/// Sauberes Trennen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ByeMessage {
    pub reason: Option<String>,
}

/// Alle Nachrichten vom Client an den Agenten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello(HelloRequest),
    StartSession(StartSessionRequest),
    StopSession,
    Sleep,
    Wake,
    InjectMessage(InjectMessageRequest),
    ToolResult(ToolResultMessage),
    Pong(PongMessage),
    Bye(ByeMessage),
}

impl ClientMessage {
    /// Handshake-Nachricht
    pub fn hello(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        user_identity: Option<String>,
    ) -> Self {
        Self::Hello(HelloRequest {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            user_identity,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOKOLL_VERSION,
        })
    }

    pub fn pong(echo_timestamp_ms: u64, client_timestamp_ms: u64) -> Self {
        Self::Pong(PongMessage {
            echo_timestamp_ms,
            client_timestamp_ms,
        })
    }

    pub fn tool_result(call_id: CallId, success: bool, output: impl Into<String>) -> Self {
        Self::ToolResult(ToolResultMessage {
            call_id,
            success,
            output: output.into(),
        })
    }

    pub fn bye(reason: Option<String>) -> Self {
        Self::Bye(ByeMessage { reason })
    }

    /// Kurzname fuer Logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello(_) => "hello",
            Self::StartSession(_) => "start_session",
            Self::StopSession => "stop_session",
            Self::Sleep => "sleep",
            Self::Wake => "wake",
            Self::InjectMessage(_) => "inject_message",
            Self::ToolResult(_) => "tool_result",
            Self::Pong(_) => "pong",
            Self::Bye(_) => "bye",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Agent -> Client
// ---------------------------------------------------------------------------

/// Erfolgreicher Handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloAck {
    pub session_id: String,
    pub server_version: String,
}

/// Statuswechsel des Agenten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: AgentStatus,
}

/// Ein Gespraechsbeitrag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: Role,
    pub message: String,
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub force_display: bool,
}

/// Tool-Call-Anfrage des Agenten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: CallId,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl ToolCallRequest {
    /// Payload fuer den Host-Handler
    pub fn payload(&self) -> ToolCallPayload {
        ToolCallPayload {
            name: self.name.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

/// Rohsignal zur Netzwerkqualitaet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkQualitySample {
    pub signal_strength: u8,
    pub speed_mbps: Option<f64>,
    pub network_type: Option<String>,
}

/// Fehler-Meldung des Agenten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    pub message: String,
}

/// Keepalive-Ping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingMessage {
    /// Unix-Timestamp in Millisekunden fuer RTT-Messung
    pub timestamp_ms: u64,
}

/// Alle Nachrichten vom Agenten an den Client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    HelloAck(HelloAck),
    Status(StatusUpdate),
    Transcript(TranscriptMessage),
    ToolCall(ToolCallRequest),
    NetworkQuality(NetworkQualitySample),
    Error(ErrorMessage),
    Ping(PingMessage),
}

impl AgentMessage {
    pub fn status(status: AgentStatus) -> Self {
        Self::Status(StatusUpdate { status })
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorMessage {
            code,
            message: message.into(),
        })
    }

    /// Kurzname fuer Logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::HelloAck(_) => "hello_ack",
            Self::Status(_) => "status",
            Self::Transcript(_) => "transcript",
            Self::ToolCall(_) => "tool_call",
            Self::NetworkQuality(_) => "network_quality",
            Self::Error(_) => "error",
            Self::Ping(_) => "ping",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
