//! Integrationstests: vollstaendige Sitzungen gegen einen Agenten im Speicher
//!
//! Der Test-Agent spricht das echte Frame-Protokoll ueber `tokio::io::duplex`.

use async_trait::async_trait;
use connekz_audio::HeadlessAudioHost;
use connekz_client::config::ConnekzOptions;
use connekz_client::{
    init_connekz, AgentConnector, AgentStatus, BoxedIo, ClientError, ConnekzEnvironment,
    ConnekzInstance, ErrorCode, MicStatus, Role,
};
use connekz_core::types::{CallId, ConversationId};
use connekz_protocol::control::{
    AgentMessage, ClientMessage, HelloAck, NetworkQualitySample, ToolCallRequest,
    TranscriptMessage,
};
use connekz_protocol::wire::{AgentCodec, Frame};
use connekz_protocol::AudioPacket;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

// ---------------------------------------------------------------------------
// Test-Agent
// ---------------------------------------------------------------------------

enum Einspeisung {
    Nachricht(Frame<AgentMessage>),
    /// Bytes direkt auf die Leitung, am Codec vorbei
    Roh(Vec<u8>),
}

struct TestAgent {
    empfangen: Arc<Mutex<Vec<ClientMessage>>>,
    audio_pakete: Arc<AtomicUsize>,
    verbindungen: AtomicUsize,
    /// Antwortet auf start_session mit LISTENING
    bereit_melden: bool,
    einspeisung: Mutex<Option<mpsc::UnboundedSender<Einspeisung>>>,
}

impl TestAgent {
    fn new() -> Arc<Self> {
        Self::mit_start_antwort(true)
    }

    fn mit_start_antwort(bereit_melden: bool) -> Arc<Self> {
        Arc::new(Self {
            empfangen: Arc::new(Mutex::new(Vec::new())),
            audio_pakete: Arc::new(AtomicUsize::new(0)),
            verbindungen: AtomicUsize::new(0),
            bereit_melden,
            einspeisung: Mutex::new(None),
        })
    }

    /// Sendet eine Nachricht ueber die aktuelle Verbindung
    fn senden(&self, nachricht: AgentMessage) {
        self.frame_senden(Frame::Control(nachricht));
    }

    fn frame_senden(&self, frame: Frame<AgentMessage>) {
        self.einspeisen(Einspeisung::Nachricht(frame));
    }

    /// Sendet einen Steuer-Frame mit beliebigem JSON-Inhalt
    fn roh_senden(&self, json: &str) {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&(json.len() as u32).to_be_bytes());
        bytes.extend_from_slice(json.as_bytes());
        self.einspeisen(Einspeisung::Roh(bytes));
    }

    fn einspeisen(&self, einspeisung: Einspeisung) {
        if let Some(tx) = self.einspeisung.lock().as_ref() {
            let _ = tx.send(einspeisung);
        }
    }

    /// Schliesst die aktuelle Verbindung von Agenten-Seite
    fn schliessen(&self) {
        self.einspeisung.lock().take();
    }

    fn anzahl(&self, filter: impl Fn(&ClientMessage) -> bool) -> usize {
        self.empfangen.lock().iter().filter(|m| filter(m)).count()
    }

    fn tool_ergebnisse(&self) -> Vec<(String, bool, String)> {
        self.empfangen
            .lock()
            .iter()
            .filter_map(|m| match m {
                ClientMessage::ToolResult(r) => {
                    Some((r.call_id.as_str().to_string(), r.success, r.output.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl AgentConnector for TestAgent {
    async fn connect(&self, _base_url: &str) -> std::io::Result<BoxedIo> {
        self.verbindungen.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.einspeisung.lock() = Some(tx);

        let empfangen = Arc::clone(&self.empfangen);
        let audio_pakete = Arc::clone(&self.audio_pakete);
        let bereit_melden = self.bereit_melden;

        tokio::spawn(async move {
            let mut framed = Framed::new(server, AgentCodec::new());
            loop {
                tokio::select! {
                    frame = framed.next() => match frame {
                        Some(Ok(Frame::Control(nachricht))) => {
                            empfangen.lock().push(nachricht.clone());
                            let antwort = match nachricht {
                                ClientMessage::Hello(h) if h.client_secret == "falsch" => {
                                    let _ = framed
                                        .send(Frame::Control(AgentMessage::error(
                                            ErrorCode::InvalidCredentials,
                                            "Unbekannte Zugangsdaten",
                                        )))
                                        .await;
                                    return;
                                }
                                ClientMessage::Hello(_) => Some(AgentMessage::HelloAck(HelloAck {
                                    session_id: "sitzung-1".into(),
                                    server_version: "test".into(),
                                })),
                                ClientMessage::StartSession(_) if bereit_melden => {
                                    Some(AgentMessage::status(AgentStatus::Listening))
                                }
                                ClientMessage::Bye(_) => return,
                                _ => None,
                            };
                            if let Some(antwort) = antwort {
                                if framed.send(Frame::Control(antwort)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Ok(Frame::Audio(_))) => {
                            audio_pakete.fetch_add(1, Ordering::SeqCst);
                        }
                        _ => return,
                    },
                    einspeisung = rx.recv() => match einspeisung {
                        Some(Einspeisung::Nachricht(frame)) => {
                            if framed.send(frame).await.is_err() {
                                return;
                            }
                        }
                        Some(Einspeisung::Roh(bytes)) => {
                            let io = framed.get_mut();
                            if io.write_all(&bytes).await.is_err() || io.flush().await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    },
                }
            }
        });

        Ok(Box::new(client))
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

fn aufbauen(agent: &Arc<TestAgent>, secret: &str) -> (ConnekzInstance, Arc<HeadlessAudioHost>) {
    let mut optionen = ConnekzOptions::new("client-1", secret);
    optionen.user_identity = Some("alice".into());
    optionen.runtime.connect_timeout_ms = 2_000;
    optionen.runtime.start_timeout_ms = 2_000;
    optionen.runtime.tool_timeout_ms = 1_000;
    optionen.runtime.waveform_fenster = 4;

    let host = Arc::new(HeadlessAudioHost::new(16_000, 64_000));
    let instanz = init_connekz(
        optionen,
        ConnekzEnvironment::new(agent.clone(), host.clone()),
    )
    .expect("Instanz konnte nicht erstellt werden");
    (instanz, host)
}

async fn warten_bis(bedingung: impl Fn() -> bool) {
    for _ in 0..300 {
        if bedingung() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Bedingung wurde nicht rechtzeitig erfuellt");
}

fn aufzeichnen<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let l = Arc::clone(&log);
    (log, move |wert| l.lock().push(wert))
}

fn fehler_log(instanz: &ConnekzInstance) -> Arc<Mutex<Vec<ErrorCode>>> {
    let (log, push) = aufzeichnen();
    let _ = instanz.voice_agent().subscribe().on_error(move |e| push(e.code));
    log
}

// ---------------------------------------------------------------------------
// Verbindung und Start
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_falsche_zugangsdaten_melden_1002() {
    let agent = TestAgent::new();
    let (instanz, host) = aufbauen(&agent, "falsch");
    let fehler = fehler_log(&instanz);
    let (status, push) = aufzeichnen();
    let voice = instanz.voice_agent();
    let _sub = voice.subscribe().on_agent_status_change(push);

    let err = voice.start_agent().await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::InvalidCredentials));
    assert_eq!(*fehler.lock(), vec![ErrorCode::InvalidCredentials]);
    assert_eq!(voice.agent_status(), AgentStatus::Error);
    assert_eq!(
        *status.lock(),
        vec![AgentStatus::Initiating, AgentStatus::Error]
    );
    assert!(!instanz.socket().is_connected());
    assert!(!host.ist_angeschlossen());
}

#[tokio::test]
async fn test_start_erreicht_listening() {
    let agent = TestAgent::new();
    let (instanz, host) = aufbauen(&agent, "geheim");
    let (verbindet, push_v) = aufzeichnen();
    let (verbunden, push_c) = aufzeichnen();
    let socket = instanz.socket();
    let _a = socket.subscribe().on_is_connecting_change(push_v);
    let _b = socket.subscribe().on_is_connected_change(push_c);

    instanz.voice_agent().start_agent().await.unwrap();

    assert_eq!(instanz.voice_agent().agent_status(), AgentStatus::Listening);
    assert!(socket.is_connected());
    assert!(host.ist_angeschlossen());
    assert_eq!(*verbindet.lock(), vec![true, false]);
    assert_eq!(*verbunden.lock(), vec![true]);

    let empfangen = agent.empfangen.lock().clone();
    match &empfangen[0] {
        ClientMessage::Hello(h) => {
            assert_eq!(h.client_id, "client-1");
            assert_eq!(h.user_identity.as_deref(), Some("alice"));
        }
        andere => panic!("Erwartet hello, erhalten {andere:?}"),
    }
    match &empfangen[1] {
        ClientMessage::StartSession(s) => {
            assert_eq!(s.conversation_id, ConversationId(1));
            assert_eq!(s.sample_rate, 16_000);
        }
        andere => panic!("Erwartet start_session, erhalten {andere:?}"),
    }
}

#[tokio::test]
async fn test_connect_ohne_force_idempotent() {
    let agent = TestAgent::new();
    let (instanz, _host) = aufbauen(&agent, "geheim");
    let socket = instanz.socket();
    let (verbindet, push) = aufzeichnen();
    let _sub = socket.subscribe().on_is_connecting_change(push);

    socket.connect(false).await.unwrap();
    socket.connect(false).await.unwrap();
    assert_eq!(agent.verbindungen.load(Ordering::SeqCst), 1);

    socket.connect(true).await.unwrap();
    assert_eq!(agent.verbindungen.load(Ordering::SeqCst), 2);
    assert_eq!(*verbindet.lock(), vec![true, false, true, false]);

    socket.disconnect();
    assert!(!socket.is_connected());
    assert_eq!(
        instanz.voice_agent().agent_status(),
        AgentStatus::Disconnected
    );
}

#[tokio::test]
async fn test_start_nach_connect_nutzt_verbindung() {
    let agent = TestAgent::new();
    let (instanz, _host) = aufbauen(&agent, "geheim");

    instanz.socket().connect(false).await.unwrap();
    instanz.voice_agent().start_agent().await.unwrap();

    assert_eq!(agent.verbindungen.load(Ordering::SeqCst), 1);
    assert_eq!(instanz.voice_agent().agent_status(), AgentStatus::Listening);
}

#[tokio::test]
async fn test_neuer_start_beendet_alte_sitzung() {
    let agent = TestAgent::new();
    let (instanz, host) = aufbauen(&agent, "geheim");
    let voice = instanz.voice_agent();

    voice.start_agent().await.unwrap();
    let (status, push) = aufzeichnen();
    let _sub = voice.subscribe().on_agent_status_change(push);
    voice.start_agent().await.unwrap();

    assert_eq!(agent.verbindungen.load(Ordering::SeqCst), 2);
    assert_eq!(
        *status.lock(),
        vec![
            AgentStatus::Stopped,
            AgentStatus::Initiating,
            AgentStatus::Listening
        ]
    );
    assert!(host.ist_angeschlossen());
    let a = Arc::clone(&agent);
    warten_bis(move || a.anzahl(|m| matches!(m, ClientMessage::StopSession)) == 1).await;
}

// ---------------------------------------------------------------------------
// Stop und Abbruch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stop_agent_aus_jedem_status() {
    let status_liste = [
        AgentStatus::Listening,
        AgentStatus::UserSpeaking,
        AgentStatus::Thinking,
        AgentStatus::Speaking,
        AgentStatus::Executing,
        AgentStatus::Sleeping,
        AgentStatus::Idle,
    ];

    for status in status_liste {
        let agent = TestAgent::new();
        let (instanz, host) = aufbauen(&agent, "geheim");
        let voice = instanz.voice_agent();
        voice.start_agent().await.unwrap();

        agent.senden(AgentMessage::status(status));
        let v = voice.clone();
        warten_bis(move || v.agent_status() == status).await;

        voice.stop_agent();
        assert_eq!(voice.agent_status(), AgentStatus::Stopped, "aus {status}");
        assert!(!instanz.socket().is_connected(), "aus {status}");
        assert!(!host.ist_angeschlossen(), "aus {status}");
        assert!(!voice.controller().audio_aktiv(), "aus {status}");
    }

    // Ohne Sitzung und nach fehlgeschlagenem Start
    let agent = TestAgent::new();
    let (instanz, _host) = aufbauen(&agent, "geheim");
    instanz.voice_agent().stop_agent();
    assert_eq!(instanz.voice_agent().agent_status(), AgentStatus::Stopped);

    let (instanz, _host) = aufbauen(&agent, "falsch");
    let _ = instanz.voice_agent().start_agent().await;
    assert_eq!(instanz.voice_agent().agent_status(), AgentStatus::Error);
    instanz.voice_agent().stop_agent();
    assert_eq!(instanz.voice_agent().agent_status(), AgentStatus::Stopped);
}

#[tokio::test]
async fn test_stop_agent_sendet_stop_und_bye() {
    let agent = TestAgent::new();
    let (instanz, _host) = aufbauen(&agent, "geheim");
    instanz.voice_agent().start_agent().await.unwrap();

    instanz.voice_agent().stop_agent();

    let a = Arc::clone(&agent);
    warten_bis(move || a.anzahl(|m| matches!(m, ClientMessage::Bye(_))) == 1).await;
    assert_eq!(
        agent.anzahl(|m| matches!(m, ClientMessage::StopSession)),
        1
    );
}

#[tokio::test]
async fn test_stop_bricht_wartenden_start_ab() {
    let agent = TestAgent::mit_start_antwort(false);
    let (instanz, _host) = aufbauen(&agent, "geheim");
    let voice = instanz.voice_agent();

    let v = voice.clone();
    let start = tokio::spawn(async move { v.start_agent().await });

    let a = Arc::clone(&agent);
    warten_bis(move || a.anzahl(|m| matches!(m, ClientMessage::StartSession(_))) == 1).await;
    assert_eq!(voice.agent_status(), AgentStatus::Initiating);

    voice.stop_agent();
    let ergebnis = tokio::time::timeout(Duration::from_secs(1), start)
        .await
        .expect("start_agent haengt")
        .unwrap();
    assert!(matches!(ergebnis, Err(ClientError::Abgebrochen)));
    assert_eq!(voice.agent_status(), AgentStatus::Stopped);
}

#[tokio::test]
async fn test_disconnect_bricht_wartenden_start_ab() {
    let agent = TestAgent::mit_start_antwort(false);
    let (instanz, host) = aufbauen(&agent, "geheim");
    let fehler = fehler_log(&instanz);
    let voice = instanz.voice_agent();

    let v = voice.clone();
    let start = tokio::spawn(async move { v.start_agent().await });
    let a = Arc::clone(&agent);
    warten_bis(move || a.anzahl(|m| matches!(m, ClientMessage::StartSession(_))) == 1).await;

    instanz.socket().disconnect();
    let ergebnis = tokio::time::timeout(Duration::from_secs(1), start)
        .await
        .expect("start_agent haengt")
        .unwrap();
    assert!(matches!(ergebnis, Err(ClientError::Abgebrochen)));
    assert_eq!(voice.agent_status(), AgentStatus::Disconnected);
    assert!(!host.ist_angeschlossen());
    // Abbruch wird nicht als Fehler gemeldet
    assert!(fehler.lock().is_empty());
}

#[tokio::test]
async fn test_start_zeitlimit_meldet_1001() {
    let agent = TestAgent::mit_start_antwort(false);
    let mut optionen = ConnekzOptions::new("client-1", "geheim");
    optionen.runtime.start_timeout_ms = 100;
    let host = Arc::new(HeadlessAudioHost::default());
    let instanz = init_connekz(optionen, ConnekzEnvironment::new(agent.clone(), host)).unwrap();
    let fehler = fehler_log(&instanz);

    let err = instanz.voice_agent().start_agent().await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ServiceUnreachable));
    assert_eq!(*fehler.lock(), vec![ErrorCode::ServiceUnreachable]);
    assert_eq!(instanz.voice_agent().agent_status(), AgentStatus::Error);
    assert!(!instanz.socket().is_connected());
}

#[tokio::test]
async fn test_unerwarteter_verbindungsabbruch_meldet_1001() {
    let agent = TestAgent::new();
    let (instanz, host) = aufbauen(&agent, "geheim");
    let fehler = fehler_log(&instanz);
    instanz.voice_agent().start_agent().await.unwrap();

    agent.schliessen();

    let f = Arc::clone(&fehler);
    warten_bis(move || !f.lock().is_empty()).await;
    assert_eq!(*fehler.lock(), vec![ErrorCode::ServiceUnreachable]);
    assert!(!instanz.socket().is_connected());
    assert_eq!(
        instanz.voice_agent().agent_status(),
        AgentStatus::Disconnected
    );
    assert!(!host.ist_angeschlossen());
}

#[tokio::test]
async fn test_cleanup_mehrfach_aufrufbar() {
    let agent = TestAgent::new();
    let (instanz, host) = aufbauen(&agent, "geheim");
    let voice = instanz.voice_agent();
    let _sub = voice.subscribe().on_agent_status_change(|_| {});
    voice.start_agent().await.unwrap();

    instanz.socket().cleanup();
    instanz.socket().cleanup();
    instanz.unmount();

    assert!(!instanz.socket().is_connected());
    assert!(!host.ist_angeschlossen());
    assert_eq!(
        instanz
            .hub()
            .anzahl::<connekz_core::event::AgentStatusChanged>(),
        0
    );
}

// ---------------------------------------------------------------------------
// Mikrofon, Schlafmodus, Audio
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_toggle_mic_zweimal() {
    let agent = TestAgent::new();
    let (instanz, _host) = aufbauen(&agent, "geheim");
    let voice = instanz.voice_agent();
    let (log, push) = aufzeichnen();
    let _sub = voice.subscribe().on_mic_status_change(push);

    let vorher = voice.mic_status();
    voice.toggle_mic();
    voice.toggle_mic();

    assert_eq!(voice.mic_status(), vorher);
    assert_eq!(*log.lock(), vec![MicStatus::Muted, MicStatus::Active]);
}

#[tokio::test]
async fn test_audio_gesendet_und_stumm_verworfen() {
    let agent = TestAgent::new();
    let (instanz, host) = aufbauen(&agent, "geheim");
    let voice = instanz.voice_agent();
    let pegel = Arc::new(AtomicUsize::new(0));
    let p = Arc::clone(&pegel);
    let _sub = voice.subscribe().on_user_waveform_update(move |_| {
        p.fetch_add(1, Ordering::SeqCst);
    });
    voice.start_agent().await.unwrap();

    let block: &[f32] = &[0.01; 160];
    for _ in 0..3 {
        assert!(host.feed(&[block]));
    }
    let a = Arc::clone(&agent);
    warten_bis(move || a.audio_pakete.load(Ordering::SeqCst) == 3).await;

    voice.toggle_mic();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let pegel_vorher = pegel.load(Ordering::SeqCst);
    for _ in 0..3 {
        assert!(host.feed(&[block]));
    }

    let p = Arc::clone(&pegel);
    warten_bis(move || p.load(Ordering::SeqCst) > pegel_vorher).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(agent.audio_pakete.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_schlafmodus_und_aufwachen_durch_aktivitaet() {
    let agent = TestAgent::new();
    let (instanz, host) = aufbauen(&agent, "geheim");
    let voice = instanz.voice_agent();
    voice.start_agent().await.unwrap();

    voice.make_sleep().unwrap();
    assert_eq!(voice.agent_status(), AgentStatus::Sleeping);
    let a = Arc::clone(&agent);
    warten_bis(move || a.anzahl(|m| matches!(m, ClientMessage::Sleep)) == 1).await;

    // Leises Rauschen weckt nicht
    let leise: &[f32] = &[0.001; 160];
    host.feed(&[leise]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(voice.agent_status(), AgentStatus::Sleeping);

    let laut: &[f32] = &[0.5; 160];
    host.feed(&[laut]);
    let v = voice.clone();
    warten_bis(move || v.agent_status() == AgentStatus::Listening).await;
    let a = Arc::clone(&agent);
    warten_bis(move || a.anzahl(|m| matches!(m, ClientMessage::Wake)) == 1).await;
}

#[tokio::test]
async fn test_agenten_audio_wird_abgespielt() {
    let agent = TestAgent::new();
    let (instanz, host) = aufbauen(&agent, "geheim");
    let voice = instanz.voice_agent();
    let (pegel, push) = aufzeichnen();
    let _sub = voice.subscribe().on_agent_waveform_update(push);
    voice.start_agent().await.unwrap();

    agent.frame_senden(Frame::Audio(AudioPacket::new(0, vec![0.25; 8])));

    let h = Arc::clone(&host);
    warten_bis(move || h.ausgabe().verfuegbar() == 8).await;
    let p = Arc::clone(&pegel);
    warten_bis(move || p.lock().len() == 1).await;
    assert!(pegel.lock().iter().all(|w: &f32| (*w - 0.25).abs() < 1e-6));
}

#[tokio::test]
async fn test_capture_test_waehrend_sitzung_wirkungslos() {
    let agent = TestAgent::new();
    let (instanz, host) = aufbauen(&agent, "geheim");
    let voice = instanz.voice_agent();
    voice.start_agent().await.unwrap();

    voice.start_capture_test().unwrap();
    let block: &[f32] = &[0.1; 32];
    host.feed(&[block]);

    let a = Arc::clone(&agent);
    warten_bis(move || a.audio_pakete.load(Ordering::SeqCst) == 1).await;
    assert_eq!(voice.controller().aufnahme_laenge(), 0);

    voice.play_captured_audio().unwrap();
    assert_eq!(host.ausgabe().verfuegbar(), 0);
}

#[tokio::test]
async fn test_capture_test_ohne_uebertragung() {
    let agent = TestAgent::new();
    let (instanz, host) = aufbauen(&agent, "geheim");
    let voice = instanz.voice_agent();

    voice.start_capture_test().unwrap();
    let block: &[f32] = &[0.2; 64];
    host.feed(&[block]);
    host.feed(&[block]);
    let v = voice.clone();
    warten_bis(move || v.controller().aufnahme_laenge() == 128).await;

    voice.stop_capture_test();
    voice.play_captured_audio().unwrap();

    assert_eq!(host.ausgabe().verfuegbar(), 128);
    assert_eq!(agent.verbindungen.load(Ordering::SeqCst), 0);
    assert_eq!(voice.agent_status(), AgentStatus::NotStarted);
}

// ---------------------------------------------------------------------------
// Transkript
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_inject_message_erzeugt_nutzer_eintrag() {
    let agent = TestAgent::new();
    let (instanz, _host) = aufbauen(&agent, "geheim");
    let voice = instanz.voice_agent();
    voice.start_agent().await.unwrap();

    let (updates, push) = aufzeichnen();
    let _sub = voice.subscribe().on_transcript_update(push);

    voice.inject_message("hello").unwrap();

    let updates = updates.lock();
    assert_eq!(updates.len(), 1);
    let letzter = updates[0].last().unwrap();
    assert_eq!(letzter.role, Role::User);
    assert_eq!(letzter.message, "hello");
    assert_eq!(letzter.conversation_id, ConversationId(1));

    let a = Arc::clone(&agent);
    warten_bis(move || {
        a.anzahl(|m| matches!(m, ClientMessage::InjectMessage(i) if i.text == "hello")) == 1
    })
    .await;
}

#[tokio::test]
async fn test_transkript_vom_agenten_monoton() {
    let agent = TestAgent::new();
    let (instanz, _host) = aufbauen(&agent, "geheim");
    let voice = instanz.voice_agent();
    voice.start_agent().await.unwrap();

    for (text, id) in [("eins", 1), ("zwei", 3), ("drei", 2), ("", 3)] {
        agent.senden(AgentMessage::Transcript(TranscriptMessage {
            role: Role::Ai,
            message: text.into(),
            conversation_id: ConversationId(id),
            force_display: false,
        }));
    }

    let v = voice.clone();
    warten_bis(move || v.transcript().len() == 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let transkript = voice.transcript();
    assert_eq!(transkript.len(), 3);
    let ids: Vec<u64> = transkript.iter().map(|e| e.conversation_id.0).collect();
    assert_eq!(ids, vec![1, 3, 3]);
    assert_eq!(transkript[2].message, "drei");
}

// ---------------------------------------------------------------------------
// Tool-Calls
// ---------------------------------------------------------------------------

fn tool_call(id: &str, name: &str) -> AgentMessage {
    let mut arguments = serde_json::Map::new();
    arguments.insert("ort".into(), serde_json::json!("Berlin"));
    AgentMessage::ToolCall(ToolCallRequest {
        call_id: CallId::new(id),
        name: name.into(),
        arguments,
    })
}

#[tokio::test]
async fn test_get_weather_genau_eine_antwort() {
    let agent = TestAgent::new();
    let (instanz, _host) = aufbauen(&agent, "geheim");
    let voice = instanz.voice_agent();
    let aufrufe = Arc::new(AtomicUsize::new(0));
    let a = Arc::clone(&aufrufe);
    let _handler = voice.subscribe().on_tool_call(move |payload| {
        let a = Arc::clone(&a);
        async move {
            assert_eq!(payload.name, "get_weather");
            assert_eq!(payload.arguments["ort"], "Berlin");
            a.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, anyhow::Error>("sunny".to_string())
        }
    });
    voice.start_agent().await.unwrap();

    agent.senden(tool_call("c1", "get_weather"));
    agent.senden(tool_call("c1", "get_weather"));
    agent.senden(tool_call("c1", "get_weather"));

    let ag = Arc::clone(&agent);
    warten_bis(move || !ag.tool_ergebnisse().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(
        agent.tool_ergebnisse(),
        vec![("c1".to_string(), true, "sunny".to_string())]
    );
    assert_eq!(aufrufe.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tool_handler_fehler_meldet_1005() {
    let agent = TestAgent::new();
    let (instanz, _host) = aufbauen(&agent, "geheim");
    let fehler = fehler_log(&instanz);
    let voice = instanz.voice_agent();
    let _handler = voice.subscribe().on_tool_call(|_payload| async {
        Err::<String, _>(anyhow::anyhow!("Wetterdienst nicht erreichbar"))
    });
    let (empfangen, push) = aufzeichnen::<String>();
    let _beobachter = voice
        .subscribe()
        .on_tool_call_received(move |p| push(p.name.clone()));
    voice.start_agent().await.unwrap();

    agent.senden(tool_call("c9", "get_weather"));

    let ag = Arc::clone(&agent);
    warten_bis(move || !ag.tool_ergebnisse().is_empty()).await;

    let ergebnisse = agent.tool_ergebnisse();
    assert_eq!(ergebnisse.len(), 1);
    assert_eq!(ergebnisse[0].0, "c9");
    assert!(!ergebnisse[0].1);
    assert!(ergebnisse[0].2.contains("Wetterdienst"));
    assert_eq!(*fehler.lock(), vec![ErrorCode::AgentRuntime]);
    assert_eq!(*empfangen.lock(), vec!["get_weather".to_string()]);
    assert_eq!(voice.agent_status(), AgentStatus::Listening);
}

#[tokio::test]
async fn test_fehler_1005_vom_agenten_zurueck_zu_listening() {
    let agent = TestAgent::new();
    let (instanz, _host) = aufbauen(&agent, "geheim");
    let fehler = fehler_log(&instanz);
    let voice = instanz.voice_agent();
    voice.start_agent().await.unwrap();

    agent.senden(AgentMessage::status(AgentStatus::Thinking));
    agent.senden(AgentMessage::error(ErrorCode::AgentRuntime, "Modellfehler"));

    let f = Arc::clone(&fehler);
    warten_bis(move || !f.lock().is_empty()).await;
    let v = voice.clone();
    warten_bis(move || v.agent_status() == AgentStatus::Listening).await;
    assert!(instanz.socket().is_connected());
}

#[tokio::test]
async fn test_kontingent_erschoepft_trennt() {
    let agent = TestAgent::new();
    let (instanz, host) = aufbauen(&agent, "geheim");
    let fehler = fehler_log(&instanz);
    instanz.voice_agent().start_agent().await.unwrap();

    agent.senden(AgentMessage::error(ErrorCode::QuotaExceeded, "Kontingent aufgebraucht"));

    let f = Arc::clone(&fehler);
    warten_bis(move || !f.lock().is_empty()).await;
    let s = instanz.socket();
    warten_bis(move || !s.is_connected()).await;
    assert_eq!(*fehler.lock(), vec![ErrorCode::QuotaExceeded]);
    assert!(!host.ist_angeschlossen());
}

// ---------------------------------------------------------------------------
// Verbindungsqualitaet
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_schwaches_netz_meldet_1004_pro_uebergang() {
    let agent = TestAgent::new();
    let (instanz, _host) = aufbauen(&agent, "geheim");
    let fehler = fehler_log(&instanz);
    let voice = instanz.voice_agent();
    let (qualitaet, push) = aufzeichnen();
    let _sub = voice
        .subscribe()
        .on_connection_quality_change(move |q| push(q.weak_for_voice));
    voice.start_agent().await.unwrap();

    let signale = [
        (1, Some(5.0)),
        (1, Some(5.0)),
        (3, Some(-1.0)),
        (3, Some(10.0)),
        (2, Some(0.1)),
    ];
    for (signal_strength, speed_mbps) in signale {
        agent.senden(AgentMessage::NetworkQuality(NetworkQualitySample {
            signal_strength,
            speed_mbps,
            network_type: Some("wifi".into()),
        }));
    }

    let q = Arc::clone(&qualitaet);
    warten_bis(move || q.lock().len() == 4).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Negative Geschwindigkeit wird verworfen
    assert_eq!(*qualitaet.lock(), vec![true, true, false, true]);
    assert_eq!(
        *fehler.lock(),
        vec![ErrorCode::WeakNetwork, ErrorCode::WeakNetwork]
    );
    assert!(instanz.socket().is_connected());
}

#[tokio::test]
async fn test_unlesbare_nachrichten_werden_verworfen() {
    let agent = TestAgent::new();
    let (instanz, _host) = aufbauen(&agent, "geheim");
    let fehler = fehler_log(&instanz);
    let voice = instanz.voice_agent();
    let (qualitaet, push) = aufzeichnen();
    let _sub = voice
        .subscribe()
        .on_connection_quality_change(move |q| push(q.signal_strength));
    voice.start_agent().await.unwrap();

    agent.roh_senden(r#"{"type":"metrics","cpu":0.4}"#);
    agent.roh_senden(
        r#"{"type":"network_quality","signal_strength":-1,"speed_mbps":2.0,"network_type":"wifi"}"#,
    );
    agent.roh_senden(r#"{"type":"status","status":"THINKING","extra":1}"#);
    agent.senden(AgentMessage::NetworkQuality(NetworkQualitySample {
        signal_strength: 3,
        speed_mbps: Some(20.0),
        network_type: None,
    }));

    let q = Arc::clone(&qualitaet);
    warten_bis(move || q.lock().len() == 1).await;

    assert_eq!(*qualitaet.lock(), vec![3]);
    assert_eq!(voice.agent_status(), AgentStatus::Thinking);
    assert!(instanz.socket().is_connected());
    assert!(fehler.lock().is_empty());
}
