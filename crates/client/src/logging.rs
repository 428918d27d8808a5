//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `CNKZ_LOG_LEVEL`: Log-Level oder Filter-Direktive, Standard: info
//! - `CNKZ_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Die Bibliothek installiert nie selbst einen Subscriber; das ist Sache
//! der einbettenden Anwendung bzw. von `connekz-probe`.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialisiert das Logging-System.
///
/// Umgebungsvariablen haben Vorrang vor den uebergebenen Werten.
/// Ein bereits installierter Subscriber bleibt unangetastet.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env("CNKZ_LOG_LEVEL")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format_env = std::env::var("CNKZ_LOG_FORMAT").unwrap_or_else(|_| format.to_string());

    let ergebnis = match format_env.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    if ergebnis.is_err() {
        tracing::debug!("Logging bereits initialisiert");
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
