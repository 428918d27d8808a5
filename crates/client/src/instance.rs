//! Einstiegspunkt einer Connekz-Instanz
//!
//! `init_connekz` prueft die Optionen, baut Sitzung, Transport und
//! Voice-Agent-Steuerung auf und mountet die konfigurierten Oberflaechen.
//! Die Instanz stellt zwei headless Sub-APIs bereit:
//!
//! - `ConnekzSocketApi`: connect / disconnect / cleanup und Verbindungs-Events
//! - `VoiceAgentApi`: Sitzungssteuerung und alle Sitzungs-Events

use connekz_audio::AudioHost;
use connekz_core::error::{ClientError, ConnekzError, Result};
use connekz_core::event::{
    AgentStatusChanged, AgentWaveformUpdated, ConnectionQualityChanged, ErrorRaised,
    IsConnectedChanged, IsConnectingChanged, MicStatusChanged, ToolCallReceived,
    TranscriptUpdated, UserWaveformUpdated,
};
use connekz_core::types::{
    AgentStatus, ConnectionQuality, MicStatus, ToolCallPayload, Transcript,
};
use connekz_core::{SubscriptionHub, Unsubscriber};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::VoiceAgentController;
use crate::config::ConnekzOptions;
use crate::session::SessionHandle;
use crate::tool_call::ToolCallHandler;
use crate::transport::{AgentConnector, TransportConfig, TransportSocket};

// ---------------------------------------------------------------------------
// Oberflaechen
// ---------------------------------------------------------------------------

/// UI-Oberflaechen, die die Host-Umgebung rendert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    ChatWindow,
    AiSphere,
    Transcription,
    Controls,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatWindow => "chat_window",
            Self::AiSphere => "ai_sphere",
            Self::Transcription => "transcription",
            Self::Controls => "connekz_controls",
        }
    }
}

/// Rendert Oberflaechen in einen Container der Host-Umgebung
pub trait SurfaceHost: Send + Sync {
    fn mount(&self, surface: Surface, element_id: &str, optionen: &ConnekzOptions)
        -> anyhow::Result<()>;
    fn unmount(&self, surface: Surface);
}

/// Externe Mitspieler einer Instanz
pub struct ConnekzEnvironment {
    pub connector: Arc<dyn AgentConnector>,
    pub audio: Arc<dyn AudioHost>,
    pub surfaces: Option<Arc<dyn SurfaceHost>>,
}

impl ConnekzEnvironment {
    pub fn new(connector: Arc<dyn AgentConnector>, audio: Arc<dyn AudioHost>) -> Self {
        Self {
            connector,
            audio,
            surfaces: None,
        }
    }

    pub fn mit_surfaces(mut self, surfaces: Arc<dyn SurfaceHost>) -> Self {
        self.surfaces = Some(surfaces);
        self
    }
}

/// Konfigurierte Mount-Punkte in Mount-Reihenfolge
fn mount_punkte(optionen: &ConnekzOptions) -> Vec<(Surface, String)> {
    [
        (Surface::ChatWindow, &optionen.chat_window.mount_element_id),
        (Surface::AiSphere, &optionen.ai_sphere.mount_element_id),
        (Surface::Transcription, &optionen.transcription.mount_element_id),
        (Surface::Controls, &optionen.connekz_controls.mount_element_id),
    ]
    .into_iter()
    .filter_map(|(surface, id)| {
        id.as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| (surface, id.to_string()))
    })
    .collect()
}

// ---------------------------------------------------------------------------
// Instanz
// ---------------------------------------------------------------------------

/// Erstellt eine Instanz aus Optionen und Umgebung
pub fn init_connekz(optionen: ConnekzOptions, umgebung: ConnekzEnvironment) -> Result<ConnekzInstance> {
    optionen.validate()?;

    let id = Uuid::new_v4();
    let hub = SubscriptionHub::new();
    let session = SessionHandle::new(Arc::clone(&hub));
    let transport = TransportSocket::new(
        TransportConfig::aus_optionen(&optionen),
        umgebung.connector,
        Arc::clone(&session),
        Arc::clone(&hub),
    );
    let controller = VoiceAgentController::new(
        optionen.runtime.clone(),
        session,
        Arc::clone(&hub),
        transport,
        umgebung.audio,
    );

    let mut gemountet = Vec::new();
    if let Some(surfaces) = &umgebung.surfaces {
        for (surface, element_id) in mount_punkte(&optionen) {
            if let Err(e) = surfaces.mount(surface, &element_id, &optionen) {
                for (frueher, _) in gemountet.iter().rev() {
                    surfaces.unmount(*frueher);
                }
                return Err(ClientError::Konfiguration(format!(
                    "{} nicht in '{element_id}' mountbar: {e:#}",
                    surface.as_str()
                )));
            }
            gemountet.push((surface, element_id));
        }
    }

    info!(
        instanz = %id,
        endpunkt = optionen.endpunkt(),
        oberflaechen = gemountet.len(),
        "Connekz initialisiert"
    );

    Ok(ConnekzInstance {
        id,
        hub,
        controller,
        surfaces: umgebung.surfaces,
        gemountet: Mutex::new(gemountet),
    })
}

/// Eine initialisierte Connekz-Instanz
pub struct ConnekzInstance {
    id: Uuid,
    hub: Arc<SubscriptionHub>,
    controller: Arc<VoiceAgentController>,
    surfaces: Option<Arc<dyn SurfaceHost>>,
    gemountet: Mutex<Vec<(Surface, String)>>,
}

impl ConnekzInstance {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn socket(&self) -> ConnekzSocketApi {
        ConnekzSocketApi {
            controller: Arc::clone(&self.controller),
            hub: Arc::clone(&self.hub),
        }
    }

    pub fn voice_agent(&self) -> VoiceAgentApi {
        VoiceAgentApi {
            controller: Arc::clone(&self.controller),
            hub: Arc::clone(&self.hub),
        }
    }

    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    /// Raeumt auf und entfernt alle Oberflaechen in umgekehrter Reihenfolge
    pub fn unmount(&self) {
        self.controller.cleanup();
        let gemountet = std::mem::take(&mut *self.gemountet.lock());
        if let Some(surfaces) = &self.surfaces {
            for (surface, _) in gemountet.iter().rev() {
                surfaces.unmount(*surface);
            }
        }
        info!(instanz = %self.id, "Connekz entfernt");
    }
}

// ---------------------------------------------------------------------------
// Socket-API
// ---------------------------------------------------------------------------

/// Headless Verbindungs-API
#[derive(Clone)]
pub struct ConnekzSocketApi {
    controller: Arc<VoiceAgentController>,
    hub: Arc<SubscriptionHub>,
}

impl ConnekzSocketApi {
    /// Baut die Verbindung auf; mit `force` wird neu verbunden
    pub async fn connect(&self, force: bool) -> Result<()> {
        self.controller.transport().connect(force).await
    }

    pub fn disconnect(&self) {
        self.controller.disconnect();
    }

    pub fn cleanup(&self) {
        self.controller.cleanup();
    }

    pub fn is_connected(&self) -> bool {
        self.controller.transport().ist_verbunden()
    }

    pub fn subscribe(&self) -> SocketSubscriptions<'_> {
        SocketSubscriptions { hub: &self.hub }
    }
}

pub struct SocketSubscriptions<'a> {
    hub: &'a Arc<SubscriptionHub>,
}

impl SocketSubscriptions<'_> {
    pub fn on_is_connecting_change(&self, f: impl Fn(bool) + Send + Sync + 'static) -> Unsubscriber {
        self.hub.subscribe::<IsConnectingChanged>(move |v| f(*v))
    }

    pub fn on_is_connected_change(&self, f: impl Fn(bool) + Send + Sync + 'static) -> Unsubscriber {
        self.hub.subscribe::<IsConnectedChanged>(move |v| f(*v))
    }
}

// ---------------------------------------------------------------------------
// Voice-Agent-API
// ---------------------------------------------------------------------------

/// Headless Voice-Agent-API
#[derive(Clone)]
pub struct VoiceAgentApi {
    controller: Arc<VoiceAgentController>,
    hub: Arc<SubscriptionHub>,
}

impl VoiceAgentApi {
    pub async fn start_agent(&self) -> Result<()> {
        self.controller.start_agent().await
    }

    pub fn stop_agent(&self) {
        self.controller.stop_agent();
    }

    pub fn make_sleep(&self) -> Result<()> {
        self.controller.make_sleep()
    }

    pub fn inject_message(&self, text: &str) -> Result<()> {
        self.controller.inject_message(text)
    }

    pub fn start_capture_test(&self) -> Result<()> {
        self.controller.start_capture_test()
    }

    pub fn stop_capture_test(&self) {
        self.controller.stop_capture_test();
    }

    pub fn play_captured_audio(&self) -> Result<()> {
        self.controller.play_captured_audio()
    }

    pub fn toggle_mic(&self) -> MicStatus {
        self.controller.toggle_mic()
    }

    pub fn agent_status(&self) -> AgentStatus {
        self.controller.agent_status()
    }

    pub fn mic_status(&self) -> MicStatus {
        self.controller.mic_status()
    }

    pub fn transcript(&self) -> Transcript {
        self.controller.transcript()
    }

    pub fn controller(&self) -> &Arc<VoiceAgentController> {
        &self.controller
    }

    pub fn subscribe(&self) -> AgentSubscriptions<'_> {
        AgentSubscriptions {
            hub: &self.hub,
            controller: &self.controller,
        }
    }
}

pub struct AgentSubscriptions<'a> {
    hub: &'a Arc<SubscriptionHub>,
    controller: &'a Arc<VoiceAgentController>,
}

impl AgentSubscriptions<'_> {
    pub fn on_agent_status_change(
        &self,
        f: impl Fn(AgentStatus) + Send + Sync + 'static,
    ) -> Unsubscriber {
        self.hub.subscribe::<AgentStatusChanged>(move |s| f(*s))
    }

    pub fn on_mic_status_change(&self, f: impl Fn(MicStatus) + Send + Sync + 'static) -> Unsubscriber {
        self.hub.subscribe::<MicStatusChanged>(move |m| f(*m))
    }

    pub fn on_user_waveform_update(&self, f: impl Fn(f32) + Send + Sync + 'static) -> Unsubscriber {
        self.hub.subscribe::<UserWaveformUpdated>(move |w| f(*w))
    }

    pub fn on_agent_waveform_update(&self, f: impl Fn(f32) + Send + Sync + 'static) -> Unsubscriber {
        self.hub.subscribe::<AgentWaveformUpdated>(move |w| f(*w))
    }

    /// Erhaelt bei jeder Aenderung die vollstaendige Sequenz
    pub fn on_transcript_update(
        &self,
        f: impl Fn(Transcript) + Send + Sync + 'static,
    ) -> Unsubscriber {
        self.hub
            .subscribe::<TranscriptUpdated>(move |t| f(Arc::clone(t)))
    }

    /// Registriert den Tool-Call-Handler
    ///
    /// Es gibt genau einen Handler; eine spaetere Registrierung ersetzt die
    /// vorherige.
    pub fn on_tool_call<F, Fut>(&self, f: F) -> Unsubscriber
    where
        F: Fn(ToolCallPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let handler: ToolCallHandler = Arc::new(
            move |payload: ToolCallPayload| -> BoxFuture<'static, anyhow::Result<String>> {
                f(payload).boxed()
            },
        );
        self.controller.broker().registrieren(handler)
    }

    /// Beobachtet eingehende Tool-Calls ohne sie zu beantworten
    pub fn on_tool_call_received(
        &self,
        f: impl Fn(&ToolCallPayload) + Send + Sync + 'static,
    ) -> Unsubscriber {
        self.hub.subscribe::<ToolCallReceived>(f)
    }

    pub fn on_connection_quality_change(
        &self,
        f: impl Fn(&ConnectionQuality) + Send + Sync + 'static,
    ) -> Unsubscriber {
        self.hub.subscribe::<ConnectionQualityChanged>(f)
    }

    pub fn on_error(&self, f: impl Fn(&ConnekzError) + Send + Sync + 'static) -> Unsubscriber {
        self.hub.subscribe::<ErrorRaised>(f)
    }
}

impl Drop for ConnekzInstance {
    fn drop(&mut self) {
        if !self.gemountet.lock().is_empty() {
            warn!(instanz = %self.id, "Instanz ohne unmount verworfen");
        }
    }
}
