//! Voice-Agent-Steuerung
//!
//! Orchestriert eine Sitzung: Verbindungsaufbau mit INITIATING, Start der
//! Audio-Pumpe, Warten auf LISTENING, Stummschaltung, Schlafmodus,
//! Text-Injektion und den lokalen Capture-Test. Eingehende Frames des
//! Transports landen ueber `InboundHandler` hier und werden an Transkript,
//! Tool-Call-Broker und Hub verteilt.
//!
//! ## Audio-Pumpe
//! ```text
//! Audio-Thread -> AudioCaptureNode -> Relay -> connekz-capture Thread
//!                                               |-> Waveform (immer)
//!                                               |-> Recorder (Capture-Test)
//!                                               '-> Transport (Sitzung, nicht stumm)
//! ```

use connekz_audio::{relay, rms_level, AudioHost, CaptureRecorder, WaveformMeter};
use connekz_core::error::{ClientError, ConnekzError, ErrorCode, Result};
use connekz_core::event::{
    AgentWaveformUpdated, ConnectionQualityChanged, ErrorRaised, UserWaveformUpdated,
};
use connekz_core::types::{
    AgentStatus, ConnectionQuality, ConversationId, MicStatus, Role, Transcript,
    TranscriptEntry,
};
use connekz_core::SubscriptionHub;
use connekz_protocol::control::{
    AgentMessage, ClientMessage, InjectMessageRequest, NetworkQualitySample,
    StartSessionRequest,
};
use connekz_protocol::AudioPacket;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::RuntimeSettings;
use crate::session::{Session, SessionHandle};
use crate::tool_call::ToolCallBroker;
use crate::transcript::TranscriptStore;
use crate::transport::{InboundHandler, TransportSocket};

/// Wartezeit der Pumpe pro Empfangsversuch
const PUMPEN_TAKT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpModus {
    Sitzung,
    CaptureTest,
}

struct Pumpe {
    laeuft: Arc<AtomicBool>,
    modus: PumpModus,
}

struct Steuerung {
    /// Wird von stop_agent / disconnect ausgeloest und ersetzt
    abbruch: CancellationToken,
    /// Meldet dem wartenden start_agent das Erreichen von LISTENING
    bereit: Option<oneshot::Sender<Result<()>>>,
    pumpe: Option<Pumpe>,
    recorder: CaptureRecorder,
    user_meter: WaveformMeter,
    agent_meter: WaveformMeter,
}

/// Steuerung des Voice-Agents einer Instanz
pub struct VoiceAgentController {
    einstellungen: RuntimeSettings,
    session: Arc<SessionHandle>,
    hub: Arc<SubscriptionHub>,
    transport: Arc<TransportSocket>,
    transcript: TranscriptStore,
    broker: Arc<ToolCallBroker>,
    audio: Arc<dyn AudioHost>,
    /// Serialisiert start_agent in Ankunftsreihenfolge
    start_lock: tokio::sync::Mutex<()>,
    steuerung: Mutex<Steuerung>,
    qualitaet_schwach: AtomicBool,
    selbst: Weak<Self>,
}

impl VoiceAgentController {
    /// Erstellt die Steuerung und registriert sie als Empfaenger des Transports
    pub fn new(
        einstellungen: RuntimeSettings,
        session: Arc<SessionHandle>,
        hub: Arc<SubscriptionHub>,
        transport: Arc<TransportSocket>,
        audio: Arc<dyn AudioHost>,
    ) -> Arc<Self> {
        let max_samples = einstellungen.capture_test_max_sek as usize * audio.sample_rate() as usize;
        let broker = ToolCallBroker::new(
            Arc::clone(&transport),
            Arc::clone(&session),
            Arc::clone(&hub),
            einstellungen.tool_timeout(),
        );

        let controller = Arc::new_cyclic(|selbst| Self {
            session,
            transcript: TranscriptStore::new(Arc::clone(&hub)),
            hub,
            transport,
            broker,
            audio,
            start_lock: tokio::sync::Mutex::new(()),
            steuerung: Mutex::new(Steuerung {
                abbruch: CancellationToken::new(),
                bereit: None,
                pumpe: None,
                recorder: CaptureRecorder::new(max_samples),
                user_meter: WaveformMeter::new(einstellungen.waveform_fenster),
                agent_meter: WaveformMeter::new(einstellungen.waveform_fenster),
            }),
            einstellungen,
            qualitaet_schwach: AtomicBool::new(false),
            selbst: selbst.clone(),
        });

        let als_handler: Arc<dyn InboundHandler> = controller.clone();
        controller
            .transport
            .handler_setzen(Arc::downgrade(&als_handler));
        controller
    }

    pub fn session(&self) -> Session {
        self.session.snapshot()
    }

    pub fn agent_status(&self) -> AgentStatus {
        self.session.agent_status()
    }

    pub fn mic_status(&self) -> MicStatus {
        self.session.mic_status()
    }

    /// Unveraenderlicher Snapshot des Transkripts
    pub fn transcript(&self) -> Transcript {
        self.transcript.eintraege()
    }

    pub fn broker(&self) -> &Arc<ToolCallBroker> {
        &self.broker
    }

    pub fn transport(&self) -> &Arc<TransportSocket> {
        &self.transport
    }

    /// Samples der letzten Capture-Test-Aufnahme
    pub fn aufnahme_laenge(&self) -> usize {
        self.steuerung.lock().recorder.laenge()
    }

    /// Gibt true zurueck solange ein Capture-Knoten angeschlossen ist
    pub fn audio_aktiv(&self) -> bool {
        self.steuerung.lock().pumpe.is_some()
    }

    // -----------------------------------------------------------------------
    // Sitzung
    // -----------------------------------------------------------------------

    /// Startet eine Sitzung und wartet bis der Agent LISTENING meldet
    ///
    /// Eine laufende Sitzung wird vorher beendet. `stop_agent`,
    /// `disconnect` und `cleanup` brechen den Start mit
    /// `ClientError::Abgebrochen` ab.
    pub async fn start_agent(&self) -> Result<()> {
        let abbruch = self.steuerung.lock().abbruch.clone();
        let _start = tokio::select! {
            biased;
            _ = abbruch.cancelled() => return Err(ClientError::Abgebrochen),
            guard = self.start_lock.lock() => guard,
        };

        info!("Starte Voice-Agent");
        self.stop_capture_test();
        if self.session.agent_status().ist_aktiv() {
            info!("Laufende Sitzung wird zuerst beendet");
            self.sitzung_abbauen(true);
            self.hub.flush();
        }

        let (bereit_tx, bereit_rx) = oneshot::channel();
        {
            let mut st = self.steuerung.lock();
            if abbruch.is_cancelled() {
                return Err(ClientError::Abgebrochen);
            }
            st.bereit = Some(bereit_tx);
            st.user_meter.zuruecksetzen();
            st.agent_meter.zuruecksetzen();
        }
        self.session.neue_sitzung();
        self.qualitaet_schwach.store(false, Ordering::Relaxed);
        let conversation_id = self.transcript.begin_conversation();

        match self
            .start_durchfuehren(&abbruch, bereit_rx, conversation_id)
            .await
        {
            Ok(()) => {
                info!(conversation = %conversation_id, "Voice-Agent bereit");
                Ok(())
            }
            Err(_) if abbruch.is_cancelled() => {
                debug!("Start abgebrochen");
                Err(ClientError::Abgebrochen)
            }
            Err(fehler) => {
                warn!("Start fehlgeschlagen: {fehler}");
                self.steuerung.lock().bereit = None;
                self.broker.abbrechen();
                self.audio_freigeben();
                if self.transport.ist_verbunden() {
                    self.transport.disconnect();
                }
                let _ = self.session.status_setzen(AgentStatus::Error);
                self.hub.flush();
                Err(fehler)
            }
        }
    }

    async fn start_durchfuehren(
        &self,
        abbruch: &CancellationToken,
        bereit: oneshot::Receiver<Result<()>>,
        conversation_id: ConversationId,
    ) -> Result<()> {
        self.transport
            .verbinden(false, Some(AgentStatus::Initiating), Some(abbruch))
            .await?;

        {
            let mut st = self.steuerung.lock();
            if abbruch.is_cancelled() {
                return Err(ClientError::Abgebrochen);
            }
            self.pumpe_starten(&mut st, PumpModus::Sitzung)?;
        }

        self.transport
            .senden(ClientMessage::StartSession(StartSessionRequest {
                conversation_id,
                sample_rate: self.audio.sample_rate(),
            }))?;

        let zeitlimit = self.einstellungen.start_timeout();
        tokio::select! {
            biased;
            _ = abbruch.cancelled() => Err(ClientError::Abgebrochen),
            ergebnis = bereit => ergebnis.unwrap_or(Err(ClientError::Abgebrochen)),
            _ = tokio::time::sleep(zeitlimit) => {
                let fehler = ConnekzError::new(
                    ErrorCode::ServiceUnreachable,
                    format!("Agent nach {} ms nicht bereit", zeitlimit.as_millis()),
                );
                self.hub.publish::<ErrorRaised>(fehler.clone());
                Err(ClientError::Connekz(fehler))
            }
        }
    }

    /// Beendet die Sitzung; Status ist danach immer STOPPED
    pub fn stop_agent(&self) {
        info!("Stoppe Voice-Agent");
        self.abbrechen();
        self.sitzung_abbauen(true);
        let _ = self.session.status_setzen(AgentStatus::Stopped);
        self.hub.flush();
    }

    /// Versetzt den Agenten in den Schlafmodus
    ///
    /// Die naechste Nutzer-Aktivitaet am Mikrofon weckt ihn wieder.
    pub fn make_sleep(&self) -> Result<()> {
        if !self.transport.ist_verbunden() {
            return Err(ClientError::NichtVerbunden);
        }
        let aktuell = self.session.agent_status();
        if !aktuell.ist_aktiv() {
            return Err(ClientError::UngueltigerStatus {
                von: aktuell,
                nach: AgentStatus::Sleeping,
            });
        }

        let ergebnis = self.session.status_setzen(AgentStatus::Sleeping);
        self.hub.flush();
        ergebnis?;
        info!("Agent schlaeft");
        self.transport.senden(ClientMessage::Sleep)
    }

    /// Schaltet das Mikrofon um und gibt den neuen Status zurueck
    pub fn toggle_mic(&self) -> MicStatus {
        let neu = self.session.mic_umschalten();
        self.hub.flush();
        neu
    }

    /// Sendet Text als Nutzer-Beitrag an den Agenten
    pub fn inject_message(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(ClientError::UngueltigeEingabe(
                "Nachricht darf nicht leer sein".into(),
            ));
        }
        if !self.transport.ist_verbunden() {
            return Err(ClientError::NichtVerbunden);
        }
        if self.session.ist_schlafend() {
            self.aufwecken();
        }

        let conversation_id = self.transcript.aktuelle_id();
        self.transport
            .senden(ClientMessage::InjectMessage(InjectMessageRequest {
                text: text.to_string(),
                conversation_id,
            }))?;
        // Eingegebener Text erscheint immer, auch bei Wiederholung
        self.transcript
            .append(TranscriptEntry::new(Role::User, text, conversation_id).erzwungen());
        Ok(())
    }

    /// Trennt die Verbindung ohne die Sitzung als gestoppt zu markieren
    pub fn disconnect(&self) {
        self.abbrechen();
        self.sitzung_abbauen(false);
        self.hub.flush();
    }

    /// Trennt und gibt alle Ressourcen frei; beliebig oft aufrufbar
    pub fn cleanup(&self) {
        debug!("Cleanup");
        self.disconnect();
        self.stop_capture_test();
        self.broker.handler_entfernen();
        self.hub.alle_abmelden();
    }

    fn abbrechen(&self) {
        let mut st = self.steuerung.lock();
        let alt = std::mem::replace(&mut st.abbruch, CancellationToken::new());
        alt.cancel();
        st.bereit = None;
    }

    /// Baut Tool-Calls, Audio und Verbindung ab; Events nur eingereiht
    fn sitzung_abbauen(&self, gestoppt: bool) {
        self.broker.abbrechen();
        self.audio_freigeben();
        if gestoppt {
            if self.transport.senden(ClientMessage::StopSession).is_ok() {
                debug!("stop_session gesendet");
            }
            self.session.stoppen_markieren();
        }
        self.transport.disconnect();
    }

    fn aufwecken(&self) {
        info!("Agent wird geweckt");
        if let Err(e) = self.session.status_setzen(AgentStatus::Listening) {
            debug!("LISTENING nicht gesetzt: {e}");
        }
        self.hub.flush();
        if let Err(e) = self.transport.senden(ClientMessage::Wake) {
            debug!("wake nicht gesendet: {e}");
        }
    }

    fn bereit_melden(&self, ergebnis: Result<()>) {
        let bereit = self.steuerung.lock().bereit.take();
        if let Some(bereit) = bereit {
            let _ = bereit.send(ergebnis);
        }
    }

    // -----------------------------------------------------------------------
    // Capture-Test
    // -----------------------------------------------------------------------

    /// Startet eine lokale Aufnahme ohne Uebertragung
    ///
    /// Waehrend einer laufenden Sitzung wirkungslos.
    pub fn start_capture_test(&self) -> Result<()> {
        if self.session.agent_status().ist_aktiv() {
            info!("Capture-Test waehrend laufender Sitzung ignoriert");
            return Ok(());
        }
        let mut st = self.steuerung.lock();
        if st.pumpe.is_some() {
            debug!("Capture-Test laeuft bereits");
            return Ok(());
        }
        st.recorder.starten();
        st.user_meter.zuruecksetzen();
        self.pumpe_starten(&mut st, PumpModus::CaptureTest)?;
        info!("Capture-Test gestartet");
        Ok(())
    }

    /// Beendet den Capture-Test; die Aufnahme bleibt erhalten
    pub fn stop_capture_test(&self) {
        let mut st = self.steuerung.lock();
        if st
            .pumpe
            .as_ref()
            .is_some_and(|p| p.modus == PumpModus::CaptureTest)
        {
            if let Some(pumpe) = st.pumpe.take() {
                self.pumpe_beenden(pumpe);
            }
        }
        st.recorder.stoppen();
    }

    /// Spielt die letzte Capture-Test-Aufnahme lokal ab
    pub fn play_captured_audio(&self) -> Result<()> {
        if self.session.agent_status().ist_aktiv() {
            info!("Wiedergabe waehrend laufender Sitzung ignoriert");
            return Ok(());
        }
        self.stop_capture_test();

        let st = self.steuerung.lock();
        if st.recorder.laenge() == 0 {
            debug!("Keine Aufnahme vorhanden");
            return Ok(());
        }
        info!(samples = st.recorder.laenge(), "Spiele Aufnahme ab");
        self.audio
            .play(st.recorder.aufnahme())
            .map_err(|e| ClientError::Audio(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Audio-Pumpe
    // -----------------------------------------------------------------------

    fn pumpe_starten(&self, st: &mut Steuerung, modus: PumpModus) -> Result<()> {
        if let Some(alt) = st.pumpe.take() {
            self.pumpe_beenden(alt);
        }

        let (node, empfaenger) = relay(self.einstellungen.relay_kapazitaet);
        self.audio
            .attach(node)
            .map_err(|e| ClientError::Audio(e.to_string()))?;

        let laeuft = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&laeuft);
        let controller = self.selbst.clone();
        let thread = std::thread::Builder::new()
            .name("connekz-capture".into())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    match empfaenger.recv_timeout(PUMPEN_TAKT) {
                        Ok(block) => {
                            let Some(controller) = controller.upgrade() else {
                                break;
                            };
                            controller.block_verarbeiten(modus, &flag, block);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(verworfen = empfaenger.verworfen(), "Audio-Pumpe beendet");
            });

        if let Err(e) = thread {
            self.audio.detach();
            return Err(ClientError::Audio(format!(
                "Audio-Pumpe nicht startbar: {e}"
            )));
        }

        debug!(?modus, "Audio-Pumpe gestartet");
        st.pumpe = Some(Pumpe { laeuft, modus });
        Ok(())
    }

    fn pumpe_beenden(&self, pumpe: Pumpe) {
        pumpe.laeuft.store(false, Ordering::Release);
        self.audio.detach();
        debug!(modus = ?pumpe.modus, "Audio-Pumpe gestoppt");
    }

    fn audio_freigeben(&self) {
        let mut st = self.steuerung.lock();
        if let Some(pumpe) = st.pumpe.take() {
            self.pumpe_beenden(pumpe);
        }
        st.recorder.stoppen();
    }

    fn block_verarbeiten(&self, modus: PumpModus, laeuft: &AtomicBool, block: Vec<f32>) {
        {
            let mut st = self.steuerung.lock();
            if !laeuft.load(Ordering::Acquire) {
                return;
            }
            if let Some(pegel) = st.user_meter.messen(&block) {
                self.hub.enqueue::<UserWaveformUpdated>(pegel);
            }
            if modus == PumpModus::CaptureTest {
                st.recorder.aufnehmen(&block);
            }
        }
        self.hub.flush();

        if modus == PumpModus::CaptureTest || self.session.mic_status().ist_stumm() {
            return;
        }
        if self.session.ist_schlafend() && rms_level(&block) > self.einstellungen.aktivitaet_schwelle {
            debug!("Nutzer-Aktivitaet im Schlafmodus");
            self.aufwecken();
        }
        if !self.transport.audio_senden(block) {
            trace!("Audio-Block nicht gesendet");
        }
    }

    // -----------------------------------------------------------------------
    // Eingang
    // -----------------------------------------------------------------------

    fn status_empfangen(&self, status: AgentStatus) {
        if let Err(e) = self.session.status_setzen(status) {
            warn!("Status vom Agenten verworfen: {e}");
        }
        self.hub.flush();
        if status == AgentStatus::Listening {
            self.bereit_melden(Ok(()));
        }
    }

    fn qualitaet_empfangen(&self, signal: NetworkQualitySample) {
        let Some(qualitaet) = ConnectionQuality::aus_signal(
            signal.signal_strength,
            signal.speed_mbps,
            signal.network_type,
        ) else {
            debug!("Unbrauchbares Qualitaetssignal verworfen");
            return;
        };

        let war_schwach = self
            .qualitaet_schwach
            .swap(qualitaet.weak_for_voice, Ordering::AcqRel);
        let jetzt_schwach = qualitaet.weak_for_voice;
        self.hub.enqueue::<ConnectionQualityChanged>(qualitaet);
        if jetzt_schwach && !war_schwach {
            warn!("Netzwerk zu schwach fuer Sprache");
            self.hub.enqueue::<ErrorRaised>(ConnekzError::new(
                ErrorCode::WeakNetwork,
                "Netzwerk zu schwach fuer Sprache",
            ));
        }
        self.hub.flush();
    }

    fn fehler_empfangen(&self, fehler: ConnekzError) {
        warn!(code = %fehler.code, "Fehler vom Agenten: {}", fehler.message);
        self.hub.publish::<ErrorRaised>(fehler.clone());

        match fehler.code {
            ErrorCode::AgentRuntime => {
                if let Err(e) = self.session.status_setzen(AgentStatus::Listening) {
                    debug!("LISTENING nicht gesetzt: {e}");
                }
                self.hub.flush();
            }
            ErrorCode::WeakNetwork => {}
            ErrorCode::ServiceUnreachable
            | ErrorCode::InvalidCredentials
            | ErrorCode::QuotaExceeded => {
                self.bereit_melden(Err(ClientError::Connekz(fehler)));
                self.broker.abbrechen();
                self.audio_freigeben();
                self.transport.disconnect();
            }
        }
    }
}

impl InboundHandler for VoiceAgentController {
    fn nachricht(&self, nachricht: AgentMessage) {
        match nachricht {
            AgentMessage::Status(update) => self.status_empfangen(update.status),
            AgentMessage::Transcript(t) => {
                let mut eintrag = TranscriptEntry::new(t.role, t.message, t.conversation_id);
                eintrag.force_display = t.force_display;
                self.transcript.append(eintrag);
            }
            AgentMessage::ToolCall(anfrage) => self.broker.anfrage(anfrage),
            AgentMessage::NetworkQuality(signal) => self.qualitaet_empfangen(signal),
            AgentMessage::Error(e) => self.fehler_empfangen(ConnekzError::new(e.code, e.message)),
            AgentMessage::HelloAck(_) | AgentMessage::Ping(_) => {
                trace!("Nachricht ohne Wirkung auf die Sitzung");
            }
        }
    }

    fn audio(&self, paket: AudioPacket) {
        if let Err(e) = self.audio.play(&paket.samples) {
            warn!(sequenz = paket.sequence, "Wiedergabe fehlgeschlagen: {e}");
        }
        let pegel = self.steuerung.lock().agent_meter.messen(&paket.samples);
        if let Some(pegel) = pegel {
            self.hub.publish::<AgentWaveformUpdated>(pegel);
        }
    }

    fn verbindung_verloren(&self) {
        self.broker.abbrechen();
        self.audio_freigeben();
        self.bereit_melden(Err(ClientError::connekz(
            ErrorCode::ServiceUnreachable,
            "Verbindung zum Agenten verloren",
        )));
    }
}
