//! Fehlertypen fuer Connekz
//!
//! `ConnekzError` ist die an die Host-Anwendung gemeldete Benachrichtigung
//! mit einem der fuenf festen Codes. `ClientError` ist der Fehler-Enum den
//! Operationen zurueckgeben; er umschliesst `ConnekzError` und ergaenzt
//! lokale Zustaende wie Abbruch oder ungueltige Konfiguration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AgentStatus;

/// Globaler Result-Alias fuer Connekz
pub type Result<T> = std::result::Result<T, ClientError>;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Feste Fehlertaxonomie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Dienst nicht erreichbar
    #[serde(rename = "CNKZ_ERR_1001")]
    ServiceUnreachable,
    /// Ungueltige Zugangsdaten
    #[serde(rename = "CNKZ_ERR_1002")]
    InvalidCredentials,
    /// Kontingent aufgebraucht
    #[serde(rename = "CNKZ_ERR_1003")]
    QuotaExceeded,
    /// Netzwerk zu schwach fuer Sprache (nur Hinweis)
    #[serde(rename = "CNKZ_ERR_1004")]
    WeakNetwork,
    /// Laufzeitfehler des Agenten, inkl. Tool-Handler-Fehler und -Timeout
    #[serde(rename = "CNKZ_ERR_1005")]
    AgentRuntime,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceUnreachable => "CNKZ_ERR_1001",
            Self::InvalidCredentials => "CNKZ_ERR_1002",
            Self::QuotaExceeded => "CNKZ_ERR_1003",
            Self::WeakNetwork => "CNKZ_ERR_1004",
            Self::AgentRuntime => "CNKZ_ERR_1005",
        }
    }

    /// Gibt true zurueck wenn die Sitzung nach diesem Fehler weiterlaufen kann
    pub fn ist_hinweis(&self) -> bool {
        matches!(self, Self::WeakNetwork | Self::AgentRuntime)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ConnekzError
// ---------------------------------------------------------------------------

/// Gemeldeter Fehler (genau einmal pro Auftreten, kein automatischer Retry)
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ConnekzError {
    pub code: ErrorCode,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ConnekzError {
    /// Erstellt einen Fehler mit aktuellem Zeitstempel
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientError
// ---------------------------------------------------------------------------

/// Alle Fehler die Client-Operationen zurueckgeben koennen
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Connekz(#[from] ConnekzError),

    #[error("Vorgang abgebrochen")]
    Abgebrochen,

    #[error("Nicht mit dem Agenten verbunden")]
    NichtVerbunden,

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Ungueltiger Statuswechsel: {von} -> {nach}")]
    UngueltigerStatus { von: AgentStatus, nach: AgentStatus },

    #[error("Ungueltige Eingabe: {0}")]
    UngueltigeEingabe(String),

    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    #[error("Audiofehler: {0}")]
    Audio(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Erstellt einen Taxonomie-Fehler
    pub fn connekz(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Connekz(ConnekzError::new(code, message))
    }

    /// Gibt den Taxonomie-Code zurueck falls vorhanden
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Connekz(e) => Some(e.code),
            _ => None,
        }
    }

    /// Gibt true zurueck wenn der Vorgang abgebrochen wurde
    pub fn ist_abbruch(&self) -> bool {
        matches!(self, Self::Abgebrochen)
    }
}
