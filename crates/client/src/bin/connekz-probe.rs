//! connekz-probe – Kommandozeilen-Client fuer den Agenten-Dienst
//!
//! Laedt die Konfiguration, startet eine Sitzung und protokolliert alle
//! Events. Argumente werden als Text-Nachricht an den Agenten gesendet.

use anyhow::{Context, Result};
use connekz_audio::HeadlessAudioHost;
use connekz_client::config::ConnekzOptions;
use connekz_client::logging::logging_initialisieren;
use connekz_client::{init_connekz, ConnekzEnvironment, TcpConnector};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("CONNEKZ_CONFIG").unwrap_or_else(|_| "connekz.toml".into());
    let optionen = ConnekzOptions::laden(&config_pfad)?;

    logging_initialisieren(&optionen.logging.level, &optionen.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        endpunkt = optionen.endpunkt(),
        "connekz-probe wird gestartet"
    );

    let audio = Arc::new(HeadlessAudioHost::new(
        optionen.runtime.sample_rate,
        optionen.runtime.playback_kapazitaet,
    ));
    let instanz = init_connekz(
        optionen,
        ConnekzEnvironment::new(Arc::new(TcpConnector), audio),
    )
    .context("Initialisierung fehlgeschlagen")?;

    let socket = instanz.socket();
    let agent = instanz.voice_agent();

    let _subs = [
        socket
            .subscribe()
            .on_is_connecting_change(|v| tracing::info!(verbindet = v, "is_connecting")),
        socket
            .subscribe()
            .on_is_connected_change(|v| tracing::info!(verbunden = v, "is_connected")),
        agent
            .subscribe()
            .on_agent_status_change(|s| tracing::info!(status = %s, "agent_status")),
        agent
            .subscribe()
            .on_mic_status_change(|m| tracing::info!(mic = ?m, "mic_status")),
        agent
            .subscribe()
            .on_user_waveform_update(|w| tracing::trace!(pegel = w, "user_waveform")),
        agent
            .subscribe()
            .on_agent_waveform_update(|w| tracing::trace!(pegel = w, "agent_waveform")),
        agent.subscribe().on_transcript_update(|t| {
            if let Some(letzter) = t.last() {
                tracing::info!(rolle = ?letzter.role, "{}", letzter.message);
            }
        }),
        agent.subscribe().on_tool_call(|payload| async move {
            tracing::info!(name = %payload.name, "Tool-Call ohne Implementierung");
            Err::<String, _>(anyhow::anyhow!(
                "Tool '{}' ist in connekz-probe nicht verfuegbar",
                payload.name
            ))
        }),
        agent.subscribe().on_connection_quality_change(|q| {
            tracing::info!(
                signal = q.signal_strength,
                schwach = q.weak_for_voice,
                "connection_quality"
            )
        }),
        agent
            .subscribe()
            .on_error(|e| tracing::error!(code = %e.code, "{}", e.message)),
    ];

    agent.start_agent().await.context("Sitzung nicht gestartet")?;

    let text = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if !text.trim().is_empty() {
        agent.inject_message(&text)?;
    }

    tracing::info!("Sitzung laeuft, Beenden mit Ctrl-C");
    tokio::signal::ctrl_c().await?;

    agent.stop_agent();
    instanz.unmount();
    tracing::info!("connekz-probe beendet");
    Ok(())
}
