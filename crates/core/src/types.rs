//! Datenmodell einer Connekz-Sitzung
//!
//! Status-Enums, Transkript-Eintraege, Tool-Call-Payloads und die
//! abgeleitete Verbindungsqualitaet. IDs verwenden das Newtype-Pattern
//! um Verwechslungen zur Compilezeit auszuschliessen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// AgentStatus
// ---------------------------------------------------------------------------

/// Status des Voice-Agents. Es gilt immer genau ein Wert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    #[default]
    NotStarted,
    Disconnected,
    Stopped,
    Initiating,
    Listening,
    Speaking,
    Sleeping,
    UserSpeaking,
    Thinking,
    Executing,
    Error,
    Idle,
}

impl AgentStatus {
    /// Werte die unabhaengig vom Verbindungszustand gesetzt werden duerfen
    pub fn ist_terminal(&self) -> bool {
        matches!(
            self,
            Self::NotStarted | Self::Disconnected | Self::Stopped | Self::Error
        )
    }

    /// Gibt true zurueck solange eine Sitzung laeuft (inkl. Initialisierung)
    pub fn ist_aktiv(&self) -> bool {
        !self.ist_terminal()
    }

    /// Name wie er auf dem Draht und in Logs erscheint
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Disconnected => "DISCONNECTED",
            Self::Stopped => "STOPPED",
            Self::Initiating => "INITIATING",
            Self::Listening => "LISTENING",
            Self::Speaking => "SPEAKING",
            Self::Sleeping => "SLEEPING",
            Self::UserSpeaking => "USER_SPEAKING",
            Self::Thinking => "THINKING",
            Self::Executing => "EXECUTING",
            Self::Error => "ERROR",
            Self::Idle => "IDLE",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MicStatus / Role
// ---------------------------------------------------------------------------

/// Mikrofon-Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicStatus {
    #[default]
    Active,
    Muted,
}

impl MicStatus {
    /// Gibt den jeweils anderen Status zurueck
    pub fn umgeschaltet(self) -> Self {
        match self {
            Self::Active => Self::Muted,
            Self::Muted => Self::Active,
        }
    }

    pub fn ist_stumm(&self) -> bool {
        matches!(self, Self::Muted)
    }
}

/// Sprecherrolle eines Transkript-Eintrags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

// ---------------------------------------------------------------------------
// IDs
// ---------------------------------------------------------------------------

/// Monoton steigende Gespraechs-ID
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConversationId(pub u64);

impl ConversationId {
    /// ID des naechsten logischen Gespraechs
    pub fn naechste(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conversation:{}", self.0)
    }
}

/// Korrelations-ID eines Tool-Calls (vom Agenten vergeben)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TranscriptEntry
// ---------------------------------------------------------------------------

/// Ein Gespraechsbeitrag im Transkript
///
/// Wird nach dem Einfuegen in den `TranscriptStore` nie mehr veraendert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub message: String,
    /// ISO-8601 Zeitstempel (RFC 3339)
    pub timestamp: DateTime<Utc>,
    pub conversation_id: ConversationId,
    /// Umgeht die normale Filterung beim Einfuegen
    #[serde(default)]
    pub force_display: bool,
}

impl TranscriptEntry {
    /// Erstellt einen Eintrag mit aktuellem Zeitstempel
    pub fn new(role: Role, message: impl Into<String>, conversation_id: ConversationId) -> Self {
        Self {
            role,
            message: message.into(),
            timestamp: Utc::now(),
            conversation_id,
            force_display: false,
        }
    }

    /// Markiert den Eintrag als zwingend anzuzeigen
    pub fn erzwungen(mut self) -> Self {
        self.force_display = true;
        self
    }
}

/// Unveraenderlicher Snapshot des Transkripts
///
/// Aufeinanderfolgende Snapshots teilen sich die bereits vorhandenen Eintraege.
pub type Transcript = Arc<[Arc<TranscriptEntry>]>;

// ---------------------------------------------------------------------------
// ToolCallPayload
// ---------------------------------------------------------------------------

/// Anfrage des Agenten an die Host-Anwendung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    /// Name der angefragten Faehigkeit
    pub name: String,
    /// Argumente (beliebiges JSON)
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// ConnectionQuality
// ---------------------------------------------------------------------------

/// Unterhalb dieser Geschwindigkeit gilt die Verbindung als zu schwach fuer Sprache
pub const MIN_VOICE_MBPS: f64 = 0.5;

/// Hoechste Signalstaerke
pub const MAX_SIGNAL_STRENGTH: u8 = 3;

/// Abgeleiteter Snapshot der Verbindungsqualitaet
///
/// Wird bei jedem Qualitaetssignal neu berechnet; es gibt keine Historie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionQuality {
    /// 0 (kein Signal) bis 3 (sehr gut)
    pub signal_strength: u8,
    /// Geschaetzte Bandbreite in Mbit/s (None = unbekannt)
    pub speed_mbps: Option<f64>,
    pub weak_for_voice: bool,
    /// Netzwerktyp, z.B. "wifi" oder "4g" (None = unbekannt)
    pub network_type: Option<String>,
}

impl ConnectionQuality {
    /// Berechnet einen Snapshot aus einem Rohsignal
    ///
    /// Gibt `None` zurueck wenn das Signal unbrauchbar ist (negative oder
    /// nicht-endliche Geschwindigkeit). Signalstaerken ueber 3 werden gekappt.
    pub fn aus_signal(
        signal_strength: u8,
        speed_mbps: Option<f64>,
        network_type: Option<String>,
    ) -> Option<Self> {
        if let Some(speed) = speed_mbps {
            if !speed.is_finite() || speed < 0.0 {
                return None;
            }
        }

        let signal_strength = signal_strength.min(MAX_SIGNAL_STRENGTH);
        let weak_for_voice =
            signal_strength <= 1 || speed_mbps.is_some_and(|speed| speed < MIN_VOICE_MBPS);

        Some(Self {
            signal_strength,
            speed_mbps,
            weak_for_voice,
            network_type: network_type.filter(|t| !t.trim().is_empty()),
        })
    }
}
