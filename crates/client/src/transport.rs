//! Transport zum Agenten-Dienst
//!
//! Besitzt die Duplex-Verbindung, fuehrt den Handshake durch und betreibt
//! pro Verbindung einen Task, der ausgehende Steuer- und Audio-Frames
//! schreibt und eingehende Frames an den `InboundHandler` weiterreicht.
//!
//! ## Ablauf
//! ```text
//! connect(force)
//!   -> Connecting  (on_is_connecting_change(true))
//!   -> hello / hello_ack
//!   -> Connected   (on_is_connecting_change(false), on_is_connected_change(true))
//! ```
//!
//! Jede Verbindung traegt eine Generation. Frames und Verbindungsabbrueche
//! einer abgebauten Generation werden ignoriert, sodass nach `disconnect`
//! keine Events der alten Verbindung mehr durchsickern.

use async_trait::async_trait;
use connekz_core::error::{ClientError, ConnekzError, ErrorCode, Result};
use connekz_core::event::ErrorRaised;
use connekz_core::types::AgentStatus;
use connekz_core::SubscriptionHub;
use connekz_protocol::control::{AgentMessage, ClientMessage, HelloAck};
use connekz_protocol::wire::{ClientCodec, Frame};
use connekz_protocol::AudioPacket;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ConnekzOptions;
use crate::session::{ConnectionState, SessionHandle};

/// Standard-Port wenn der Endpunkt keinen angibt
pub const DEFAULT_PORT: u16 = 7443;

/// Zeitlimit fuer das saubere Schliessen nach `bye`
const SCHLIESSEN_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Byte-Strom zum Agenten
pub trait AgentIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AgentIo for T {}

pub type BoxedIo = Box<dyn AgentIo>;

/// Stellt die rohe Verbindung zum Agenten-Dienst her
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, base_url: &str) -> io::Result<BoxedIo>;
}

/// TCP-Verbindung zum Endpunkt
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    /// Ermittelt `host:port` aus einem Endpunkt wie `tcp://host:port/pfad`
    pub fn adresse(base_url: &str) -> io::Result<String> {
        let ohne_schema = base_url
            .split_once("://")
            .map_or(base_url, |(_, rest)| rest);
        let host_port = ohne_schema.split('/').next().unwrap_or_default().trim();

        if host_port.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Ungueltiger Endpunkt: '{base_url}'"),
            ));
        }

        // IPv6-Literal ohne Port endet auf ']'
        if host_port.contains(':') && !host_port.ends_with(']') {
            Ok(host_port.to_string())
        } else {
            Ok(format!("{host_port}:{DEFAULT_PORT}"))
        }
    }
}

#[async_trait]
impl AgentConnector for TcpConnector {
    async fn connect(&self, base_url: &str) -> io::Result<BoxedIo> {
        let adresse = Self::adresse(base_url)?;
        debug!(adresse = %adresse, "TCP-Verbindung wird aufgebaut");
        let stream = TcpStream::connect(&adresse).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Einstellungen des Transports
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub user_identity: Option<String>,
    pub connect_timeout: Duration,
    pub audio_queue_kapazitaet: usize,
}

impl TransportConfig {
    pub fn aus_optionen(optionen: &ConnekzOptions) -> Self {
        Self {
            base_url: optionen.endpunkt().to_string(),
            client_id: optionen.client_id.clone(),
            client_secret: optionen.client_secret.clone(),
            user_identity: optionen.user_identity.clone(),
            connect_timeout: optionen.runtime.connect_timeout(),
            audio_queue_kapazitaet: optionen.runtime.audio_queue_kapazitaet,
        }
    }
}

// ---------------------------------------------------------------------------
// InboundHandler
// ---------------------------------------------------------------------------

/// Empfaenger eingehender Frames der aktuellen Verbindung
pub(crate) trait InboundHandler: Send + Sync {
    fn nachricht(&self, nachricht: AgentMessage);
    fn audio(&self, paket: AudioPacket);
    /// Die Verbindung ist unerwartet abgebrochen (Fehler bereits gemeldet)
    fn verbindung_verloren(&self);
}

// ---------------------------------------------------------------------------
// TransportSocket
// ---------------------------------------------------------------------------

struct Link {
    generation: u64,
    session_id: String,
    steuer_tx: mpsc::UnboundedSender<ClientMessage>,
    audio_tx: mpsc::Sender<AudioPacket>,
    sequenz: AtomicU32,
}

/// Duplex-Verbindung zum Agenten
pub struct TransportSocket {
    config: TransportConfig,
    connector: Arc<dyn AgentConnector>,
    session: Arc<SessionHandle>,
    hub: Arc<SubscriptionHub>,
    /// Serialisiert Verbindungsaufbauten in Ankunftsreihenfolge
    op_lock: tokio::sync::Mutex<()>,
    /// Wird bei `disconnect` ausgeloest und ersetzt
    abbruch: Mutex<CancellationToken>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    handler: Mutex<Option<Weak<dyn InboundHandler>>>,
    selbst: Weak<Self>,
}

impl TransportSocket {
    pub fn new(
        config: TransportConfig,
        connector: Arc<dyn AgentConnector>,
        session: Arc<SessionHandle>,
        hub: Arc<SubscriptionHub>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|selbst| Self {
            config,
            connector,
            session,
            hub,
            op_lock: tokio::sync::Mutex::new(()),
            abbruch: Mutex::new(CancellationToken::new()),
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
            handler: Mutex::new(None),
            selbst: selbst.clone(),
        })
    }

    pub(crate) fn handler_setzen(&self, handler: Weak<dyn InboundHandler>) {
        *self.handler.lock() = Some(handler);
    }

    pub fn ist_verbunden(&self) -> bool {
        self.link.lock().is_some()
    }

    /// Session-ID aus dem Handshake der aktuellen Verbindung
    pub fn session_id(&self) -> Option<String> {
        self.link.lock().as_ref().map(|l| l.session_id.clone())
    }

    /// Baut die Verbindung auf
    ///
    /// Ohne `force` ist der Aufruf bei bestehender Verbindung wirkungslos,
    /// mit `force` wird die bestehende Verbindung zuerst abgebaut.
    pub async fn connect(&self, force: bool) -> Result<()> {
        self.verbinden(force, None, None).await
    }

    /// Wie `connect`, setzt aber `status` im selben Schritt wie `Connecting`
    ///
    /// `extern_abbruch` bricht zusaetzlich zum eigenen `disconnect` ab.
    pub(crate) async fn verbinden(
        &self,
        force: bool,
        status: Option<AgentStatus>,
        extern_abbruch: Option<&CancellationToken>,
    ) -> Result<()> {
        let eigen = self.abbruch.lock().clone();
        let abbruch = Abbruch {
            eigen: &eigen,
            extern_abbruch,
        };
        let _op = tokio::select! {
            biased;
            _ = abbruch.abgewartet() => return Err(ClientError::Abgebrochen),
            guard = self.op_lock.lock() => guard,
        };

        if self.ist_verbunden() {
            if !force {
                debug!("Bereits verbunden, connect ohne Wirkung");
                if let Some(status) = status {
                    let ergebnis = self.session.status_setzen(status);
                    self.hub.flush();
                    ergebnis?;
                }
                return Ok(());
            }
            info!("Erzwungener Neuaufbau der Verbindung");
            self.abbauen(None, None);
            self.hub.flush();
        }

        {
            // Abbruch und Zustandswechsel sind ueber den Link-Lock geordnet
            let _slot = self.link.lock();
            if abbruch.ausgeloest() {
                return Err(ClientError::Abgebrochen);
            }
            self.session.verbindungsaufbau(status)?;
        }
        self.hub.flush();

        info!(endpunkt = %self.config.base_url, "Verbinde mit Agenten-Dienst");
        let handshake = tokio::select! {
            biased;
            _ = abbruch.abgewartet() => return Err(ClientError::Abgebrochen),
            r = tokio::time::timeout(self.config.connect_timeout, self.handshake()) => match r {
                Ok(r) => r,
                Err(_) => Err(ConnekzError::new(
                    ErrorCode::ServiceUnreachable,
                    "Zeitlimit beim Verbindungsaufbau ueberschritten",
                )),
            },
        };

        let ergebnis = {
            let mut slot = self.link.lock();
            if abbruch.ausgeloest() {
                Err(ClientError::Abgebrochen)
            } else {
                match handshake {
                    Ok((framed, ack)) => {
                        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                        let (steuer_tx, steuer_rx) = mpsc::unbounded_channel();
                        let (audio_tx, audio_rx) =
                            mpsc::channel(self.config.audio_queue_kapazitaet.max(1));

                        tokio::spawn(verbindungs_schleife(
                            self.selbst.clone(),
                            generation,
                            framed,
                            steuer_rx,
                            audio_rx,
                        ));

                        info!(
                            session_id = %ack.session_id,
                            server_version = %ack.server_version,
                            generation,
                            "Verbunden"
                        );
                        *slot = Some(Link {
                            generation,
                            session_id: ack.session_id,
                            steuer_tx,
                            audio_tx,
                            sequenz: AtomicU32::new(0),
                        });
                        self.session.verbindung_setzen(ConnectionState::Connected);
                        Ok(())
                    }
                    Err(fehler) => {
                        warn!(code = %fehler.code, "Verbindungsaufbau fehlgeschlagen: {}", fehler.message);
                        self.session.verbindung_setzen(ConnectionState::Disconnected);
                        self.hub.enqueue::<ErrorRaised>(fehler.clone());
                        Err(ClientError::Connekz(fehler))
                    }
                }
            }
        };
        self.hub.flush();
        ergebnis
    }

    /// Trennt die Verbindung sauber
    ///
    /// Bricht laufende Verbindungsaufbauten ab. Der Agenten-Status wird
    /// STOPPED wenn die Sitzung explizit beendet wurde, sonst DISCONNECTED.
    pub fn disconnect(&self) {
        self.abbrechen();
        self.abbauen(None, None);
        self.hub.flush();
    }

    /// Sendet eine Steuer-Nachricht ueber die aktuelle Verbindung
    pub fn senden(&self, nachricht: ClientMessage) -> Result<()> {
        let slot = self.link.lock();
        let link = slot.as_ref().ok_or(ClientError::NichtVerbunden)?;
        trace!(nachricht = nachricht.name(), "Sende");
        link.steuer_tx
            .send(nachricht)
            .map_err(|_| ClientError::NichtVerbunden)
    }

    /// Reiht einen Mikrofon-Block ein; verwirft ihn wenn die Queue voll ist
    pub fn audio_senden(&self, samples: Vec<f32>) -> bool {
        let slot = self.link.lock();
        let Some(link) = slot.as_ref() else {
            return false;
        };
        let sequenz = link.sequenz.fetch_add(1, Ordering::Relaxed);
        match link.audio_tx.try_send(AudioPacket::new(sequenz, samples)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(sequenz, "Audio-Queue voll, Block verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn abbrechen(&self) {
        let alt = std::mem::replace(&mut *self.abbruch.lock(), CancellationToken::new());
        alt.cancel();
    }

    /// Baut die Verbindung ab; Events werden nur eingereiht
    ///
    /// Mit `nur_generation` geschieht das nur, wenn diese Generation noch
    /// aktuell ist. Gibt true zurueck wenn abgebaut wurde.
    fn abbauen(&self, nur_generation: Option<u64>, fehler: Option<ConnekzError>) -> bool {
        let link = {
            let mut slot = self.link.lock();
            if let Some(generation) = nur_generation {
                if slot.as_ref().map(|l| l.generation) != Some(generation) {
                    return false;
                }
            }
            let link = slot.take();
            self.session.trennen(self.session.endstatus());
            link
        };

        if let Some(link) = link {
            let _ = link.steuer_tx.send(ClientMessage::bye(None));
            info!(generation = link.generation, "Verbindung getrennt");
        }
        if let Some(fehler) = fehler {
            self.hub.enqueue::<ErrorRaised>(fehler);
        }
        true
    }

    fn ist_aktuell(&self, generation: u64) -> bool {
        self.link
            .lock()
            .as_ref()
            .is_some_and(|l| l.generation == generation)
    }

    fn handler(&self) -> Option<Arc<dyn InboundHandler>> {
        self.handler.lock().as_ref().and_then(Weak::upgrade)
    }

    fn zustellen(&self, frame: Frame<AgentMessage>) {
        let Some(handler) = self.handler() else {
            trace!("Kein Handler, Frame verworfen");
            return;
        };
        match frame {
            Frame::Control(nachricht) => {
                trace!(nachricht = nachricht.name(), "Empfangen");
                handler.nachricht(nachricht);
            }
            Frame::Audio(paket) => handler.audio(paket),
            Frame::Ungueltig(grund) => warn!("Ungueltigen Frame verworfen: {grund}"),
        }
    }

    fn verbindung_verloren(&self, generation: u64, grund: String) {
        warn!(generation, grund = %grund, "Verbindung unerwartet getrennt");
        let fehler = ConnekzError::new(ErrorCode::ServiceUnreachable, grund);
        if !self.abbauen(Some(generation), Some(fehler)) {
            return;
        }
        self.hub.flush();
        if let Some(handler) = self.handler() {
            handler.verbindung_verloren();
        }
        self.hub.flush();
    }

    async fn handshake(
        &self,
    ) -> std::result::Result<(Framed<BoxedIo, ClientCodec>, HelloAck), ConnekzError> {
        let unerreichbar =
            |grund: String| ConnekzError::new(ErrorCode::ServiceUnreachable, grund);

        let io = self
            .connector
            .connect(&self.config.base_url)
            .await
            .map_err(|e| {
                unerreichbar(format!(
                    "Verbindung zu '{}' fehlgeschlagen: {e}",
                    self.config.base_url
                ))
            })?;
        let mut framed = Framed::new(io, ClientCodec::new());

        let hello = ClientMessage::hello(
            self.config.client_id.clone(),
            self.config.client_secret.clone(),
            self.config.user_identity.clone(),
        );
        framed
            .send(Frame::Control(hello))
            .await
            .map_err(|e| unerreichbar(format!("Handshake nicht sendbar: {e}")))?;

        loop {
            match framed.next().await {
                Some(Ok(Frame::Control(AgentMessage::HelloAck(ack)))) => return Ok((framed, ack)),
                Some(Ok(Frame::Control(AgentMessage::Error(e)))) => {
                    return Err(ConnekzError::new(e.code, e.message))
                }
                Some(Ok(Frame::Control(AgentMessage::Ping(ping)))) => {
                    framed
                        .send(Frame::Control(ClientMessage::pong(
                            ping.timestamp_ms,
                            jetzt_ms(),
                        )))
                        .await
                        .map_err(|e| unerreichbar(format!("Pong nicht sendbar: {e}")))?;
                }
                Some(Ok(_)) => trace!("Frame vor Handshake-Abschluss ignoriert"),
                Some(Err(e)) => return Err(unerreichbar(format!("Protokollfehler im Handshake: {e}"))),
                None => return Err(unerreichbar("Verbindung im Handshake geschlossen".into())),
            }
        }
    }
}

/// Eigener und optional externer Abbruch eines Verbindungsaufbaus
struct Abbruch<'a> {
    eigen: &'a CancellationToken,
    extern_abbruch: Option<&'a CancellationToken>,
}

impl Abbruch<'_> {
    fn ausgeloest(&self) -> bool {
        self.eigen.is_cancelled() || self.extern_abbruch.is_some_and(|t| t.is_cancelled())
    }

    async fn abgewartet(&self) {
        match self.extern_abbruch {
            Some(extern_abbruch) => tokio::select! {
                _ = self.eigen.cancelled() => {}
                _ = extern_abbruch.cancelled() => {}
            },
            None => self.eigen.cancelled().await,
        }
    }
}

/// Betreibt eine Verbindung bis sie abgebaut wird oder abbricht
async fn verbindungs_schleife(
    transport: Weak<TransportSocket>,
    generation: u64,
    mut framed: Framed<BoxedIo, ClientCodec>,
    mut steuer_rx: mpsc::UnboundedReceiver<ClientMessage>,
    mut audio_rx: mpsc::Receiver<AudioPacket>,
) {
    let abbruch_grund = loop {
        tokio::select! {
            biased;
            nachricht = steuer_rx.recv() => match nachricht {
                Some(nachricht) => {
                    if let Err(e) = framed.send(Frame::Control(nachricht)).await {
                        break Some(format!("Senden fehlgeschlagen: {e}"));
                    }
                }
                None => {
                    // Link wurde abgebaut
                    let _ = tokio::time::timeout(SCHLIESSEN_TIMEOUT, framed.close()).await;
                    break None;
                }
            },
            Some(paket) = audio_rx.recv() => {
                if let Err(e) = framed.send(Frame::Audio(paket)).await {
                    break Some(format!("Senden fehlgeschlagen: {e}"));
                }
            }
            frame = framed.next() => match frame {
                Some(Ok(frame)) => {
                    let Some(t) = transport.upgrade() else {
                        break None;
                    };
                    if !t.ist_aktuell(generation) {
                        continue;
                    }
                    if let Frame::Control(AgentMessage::Ping(ping)) = &frame {
                        let pong = ClientMessage::pong(ping.timestamp_ms, jetzt_ms());
                        if let Err(e) = framed.send(Frame::Control(pong)).await {
                            break Some(format!("Pong nicht sendbar: {e}"));
                        }
                        continue;
                    }
                    t.zustellen(frame);
                }
                Some(Err(e)) => break Some(format!("Protokollfehler: {e}")),
                None => break Some("Verbindung vom Agenten geschlossen".to_string()),
            },
        }
    };

    debug!(generation, "Verbindungs-Task beendet");
    if let (Some(grund), Some(t)) = (abbruch_grund, transport.upgrade()) {
        t.verbindung_verloren(generation, grund);
    }
}

fn jetzt_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
