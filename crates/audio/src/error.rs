//! Fehlertypen fuer das Audio-Relay

use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Schicht
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Es ist bereits ein Capture-Knoten angeschlossen")]
    KnotenAktiv,

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Wiedergabe-Fehler: {0}")]
    Wiedergabe(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
