//! Client-Konfiguration
//!
//! Entspricht dem Initialisierungsobjekt des Widgets: Zugangsdaten,
//! optionale Mount-Punkte der UI-Oberflaechen, Feature-Schalter und ein
//! optionaler Endpunkt. Dazu kommen Laufzeit- und Logging-Einstellungen
//! mit sinnvollen Standardwerten.

use connekz_core::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::logging::{log_format_gueltig, log_level_gueltig};

/// Standard-Endpunkt des Agenten-Dienstes
pub const DEFAULT_BASE_URL: &str = "tcp://agent.connekz.com:7443";

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnekzOptions {
    pub client_id: String,
    pub client_secret: String,
    pub chat_window: ChatWindowOptions,
    pub ai_sphere: AiSphereOptions,
    pub transcription: SurfaceOptions,
    pub connekz_controls: SurfaceOptions,
    /// Kennung des Endnutzers, wird im Handshake uebertragen
    pub user_identity: Option<String>,
    /// Ueberschreibt den Standard-Endpunkt
    pub base_url: Option<String>,
    pub runtime: RuntimeSettings,
    pub logging: LoggingEinstellungen,
}

/// Chat-Fenster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatWindowOptions {
    pub mount_element_id: Option<String>,
    pub disable_talk_mode: bool,
    pub disable_chat_mode: bool,
}

/// Sphaere / Avatar
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSphereOptions {
    pub mount_element_id: Option<String>,
    pub theme_color: Option<String>,
}

/// Oberflaeche die nur einen Mount-Punkt kennt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceOptions {
    pub mount_element_id: Option<String>,
}

/// Laufzeit-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Zeitlimit fuer Verbindungsaufbau inkl. Handshake
    pub connect_timeout_ms: u64,
    /// Zeitlimit bis der Agent nach `start_agent` LISTENING meldet
    pub start_timeout_ms: u64,
    /// Zeitlimit fuer Tool-Call-Handler der Host-Anwendung
    pub tool_timeout_ms: u64,
    /// Bloecke im Relay zwischen Audio-Thread und Steuer-Kontext
    pub relay_kapazitaet: usize,
    /// Audio-Pakete in der Sende-Queue des Transports
    pub audio_queue_kapazitaet: usize,
    /// Abtastrate des Headless-Hosts in Hz
    pub sample_rate: u32,
    /// Samples pro Waveform-Wert
    pub waveform_fenster: usize,
    /// RMS-Pegel ab dem Mikrofon-Eingang als Nutzer-Aktivitaet gilt (weckt aus SLEEPING)
    pub aktivitaet_schwelle: f32,
    /// Maximale Laenge einer Capture-Test-Aufnahme in Sekunden
    pub capture_test_max_sek: u32,
    /// Samples in der Wiedergabe-Queue des Headless-Hosts
    pub playback_kapazitaet: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            start_timeout_ms: 15_000,
            tool_timeout_ms: 30_000,
            relay_kapazitaet: 32,
            audio_queue_kapazitaet: 64,
            sample_rate: 48_000,
            waveform_fenster: 1024,
            aktivitaet_schwelle: 0.02,
            capture_test_max_sek: 10,
            playback_kapazitaet: 48_000 * 4,
        }
    }
}

impl RuntimeSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ConnekzOptions {
    /// Erstellt Optionen mit Zugangsdaten und Standardwerten
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            ..Self::default()
        }
    }

    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str(&inhalt).map_err(|e| {
                ClientError::Konfiguration(format!("Konfigurationsfehler in '{pfad}': {e}"))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(ClientError::Konfiguration(format!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            ))),
        }
    }

    /// Prueft Pflichtfelder und Grenzwerte
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(ClientError::Konfiguration("client_id fehlt".into()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(ClientError::Konfiguration("client_secret fehlt".into()));
        }
        if let Some(url) = &self.base_url {
            if url.trim().is_empty() {
                return Err(ClientError::Konfiguration("base_url ist leer".into()));
            }
        }

        let rt = &self.runtime;
        let null_werte = [
            ("connect_timeout_ms", rt.connect_timeout_ms as usize),
            ("start_timeout_ms", rt.start_timeout_ms as usize),
            ("tool_timeout_ms", rt.tool_timeout_ms as usize),
            ("relay_kapazitaet", rt.relay_kapazitaet),
            ("audio_queue_kapazitaet", rt.audio_queue_kapazitaet),
            ("sample_rate", rt.sample_rate as usize),
            ("waveform_fenster", rt.waveform_fenster),
            ("capture_test_max_sek", rt.capture_test_max_sek as usize),
            ("playback_kapazitaet", rt.playback_kapazitaet),
        ];
        if let Some((name, _)) = null_werte.iter().find(|(_, wert)| *wert == 0) {
            return Err(ClientError::Konfiguration(format!(
                "runtime.{name} muss groesser als 0 sein"
            )));
        }
        if !rt.aktivitaet_schwelle.is_finite() || rt.aktivitaet_schwelle < 0.0 {
            return Err(ClientError::Konfiguration(
                "runtime.aktivitaet_schwelle muss >= 0 sein".into(),
            ));
        }

        if !log_level_gueltig(&self.logging.level) {
            return Err(ClientError::Konfiguration(format!(
                "Unbekannter Log-Level: {}",
                self.logging.level
            )));
        }
        if !log_format_gueltig(&self.logging.format) {
            return Err(ClientError::Konfiguration(format!(
                "Unbekanntes Log-Format: {}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Effektiver Endpunkt
    pub fn endpunkt(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config() {
        let cfg = ConnekzOptions::default();
        assert_eq!(cfg.endpunkt(), DEFAULT_BASE_URL);
        assert_eq!(cfg.runtime.tool_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.chat_window.disable_talk_mode);
    }

    #[test]
    fn leere_zugangsdaten_abgelehnt() {
        assert!(ConnekzOptions::default().validate().is_err());
        assert!(ConnekzOptions::new("id", "  ").validate().is_err());
        assert!(ConnekzOptions::new("id", "secret").validate().is_ok());
    }

    #[test]
    fn null_grenzwerte_abgelehnt() {
        let mut cfg = ConnekzOptions::new("id", "secret");
        cfg.runtime.relay_kapazitaet = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("relay_kapazitaet"));
    }

    #[test]
    fn ungueltiges_log_format_abgelehnt() {
        let mut cfg = ConnekzOptions::new("id", "secret");
        cfg.logging.format = "xml".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r##"
            client_id = "abc"
            client_secret = "geheim"
            user_identity = "alice"
            base_url = "tcp://localhost:9000"

            [chat_window]
            mount_element_id = "chat"
            disable_chat_mode = true

            [ai_sphere]
            theme_color = "#ff8800"

            [runtime]
            tool_timeout_ms = 500
        "##;
        let cfg: ConnekzOptions = toml::from_str(toml).unwrap();
        assert_eq!(cfg.client_id, "abc");
        assert_eq!(cfg.endpunkt(), "tcp://localhost:9000");
        assert_eq!(cfg.chat_window.mount_element_id.as_deref(), Some("chat"));
        assert!(cfg.chat_window.disable_chat_mode);
        assert_eq!(cfg.ai_sphere.theme_color.as_deref(), Some("#ff8800"));
        assert_eq!(cfg.runtime.tool_timeout_ms, 500);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.runtime.relay_kapazitaet, 32);
        assert!(cfg.transcription.mount_element_id.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn laden_ohne_datei_liefert_standard() {
        let dir = tempfile::tempdir().unwrap();
        let pfad = dir.path().join("fehlt.toml");
        let cfg = ConnekzOptions::laden(pfad.to_str().unwrap()).unwrap();
        assert!(cfg.client_id.is_empty());
    }

    #[test]
    fn laden_aus_datei() {
        let dir = tempfile::tempdir().unwrap();
        let pfad = dir.path().join("connekz.toml");
        std::fs::write(&pfad, "client_id = \"x\"\nclient_secret = \"y\"\n").unwrap();
        let cfg = ConnekzOptions::laden(pfad.to_str().unwrap()).unwrap();
        assert_eq!(cfg.client_id, "x");
        assert_eq!(cfg.client_secret, "y");
    }

    #[test]
    fn laden_mit_syntaxfehler() {
        let dir = tempfile::tempdir().unwrap();
        let pfad = dir.path().join("kaputt.toml");
        std::fs::write(&pfad, "client_id = ").unwrap();
        assert!(matches!(
            ConnekzOptions::laden(pfad.to_str().unwrap()),
            Err(ClientError::Konfiguration(_))
        ));
    }
}
