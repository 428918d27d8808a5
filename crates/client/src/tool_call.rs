//! Tool-Call-Broker
//!
//! Vermittelt Tool-Call-Anfragen des Agenten an den einen registrierten
//! Handler der Host-Anwendung und sendet dessen Ergebnis mit der
//! urspruenglichen `call_id` zurueck.
//!
//! - Pro `call_id` laeuft hoechstens ein Handler; Duplikate waehrend der
//!   Ausfuehrung werden ignoriert.
//! - Fehler oder Zeitueberschreitung des Handlers melden CNKZ_ERR_1005 und
//!   senden trotzdem ein `tool_result` mit `success = false`.
//! - Eine spaetere Registrierung ersetzt die vorherige.
//! - Jede Ausfuehrung traegt eine Auftragsnummer; nur die noch eingetragene
//!   Ausfuehrung darf ihr Ergebnis senden. Nach `abbrechen` bleiben
//!   verspaetete Ergebnisse wirkungslos.

use connekz_core::error::{ConnekzError, ErrorCode};
use connekz_core::event::{ErrorRaised, ToolCallReceived};
use connekz_core::types::{AgentStatus, CallId, ToolCallPayload};
use connekz_core::{SubscriptionHub, Unsubscriber};
use connekz_protocol::control::{ClientMessage, ToolCallRequest};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::SessionHandle;
use crate::transport::TransportSocket;

/// Handler der Host-Anwendung; liefert das Ergebnis als Text
pub type ToolCallHandler =
    Arc<dyn Fn(ToolCallPayload) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

pub struct ToolCallBroker {
    handler: Mutex<Option<(u64, ToolCallHandler)>>,
    naechste_id: AtomicU64,
    naechster_auftrag: AtomicU64,
    /// Laufende Ausfuehrungen mit ihrer Auftragsnummer
    laufend: DashMap<CallId, u64>,
    transport: Arc<TransportSocket>,
    session: Arc<SessionHandle>,
    hub: Arc<SubscriptionHub>,
    timeout: Duration,
    abbruch: Mutex<CancellationToken>,
}

impl ToolCallBroker {
    pub fn new(
        transport: Arc<TransportSocket>,
        session: Arc<SessionHandle>,
        hub: Arc<SubscriptionHub>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Mutex::new(None),
            naechste_id: AtomicU64::new(1),
            naechster_auftrag: AtomicU64::new(1),
            laufend: DashMap::new(),
            transport,
            session,
            hub,
            timeout,
            abbruch: Mutex::new(CancellationToken::new()),
        })
    }

    /// Registriert den Handler und ersetzt einen vorherigen
    ///
    /// Das zurueckgegebene Token meldet nur diese Registrierung ab; nach
    /// einer Ersetzung ist es wirkungslos.
    pub fn registrieren(self: &Arc<Self>, handler: ToolCallHandler) -> Unsubscriber {
        let id = self.naechste_id.fetch_add(1, Ordering::Relaxed);
        if self.handler.lock().replace((id, handler)).is_some() {
            info!("Tool-Call-Handler ersetzt");
        }

        let broker = Arc::downgrade(self);
        Unsubscriber::new(move || {
            if let Some(broker) = broker.upgrade() {
                let mut slot = broker.handler.lock();
                if slot.as_ref().is_some_and(|(aktuell, _)| *aktuell == id) {
                    *slot = None;
                    debug!("Tool-Call-Handler abgemeldet");
                }
            }
        })
    }

    /// Entfernt den registrierten Handler
    pub fn handler_entfernen(&self) {
        if self.handler.lock().take().is_some() {
            debug!("Tool-Call-Handler entfernt");
        }
    }

    pub fn hat_handler(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Anzahl laufender Handler
    pub fn laufend(&self) -> usize {
        self.laufend.len()
    }

    /// Nimmt eine Anfrage des Agenten entgegen
    pub fn anfrage(self: &Arc<Self>, anfrage: ToolCallRequest) {
        let auftrag = self.naechster_auftrag.fetch_add(1, Ordering::Relaxed);
        match self.laufend.entry(anfrage.call_id.clone()) {
            Entry::Occupied(_) => {
                debug!(call_id = %anfrage.call_id, "Doppelter Tool-Call ignoriert");
                return;
            }
            Entry::Vacant(frei) => {
                frei.insert(auftrag);
            }
        }

        info!(call_id = %anfrage.call_id, name = %anfrage.name, "Tool-Call empfangen");
        let payload = anfrage.payload();
        self.hub.enqueue::<ToolCallReceived>(payload.clone());
        if let Err(e) = self.session.status_setzen(AgentStatus::Executing) {
            debug!("EXECUTING nicht gesetzt: {e}");
        }
        self.hub.flush();

        let handler = self.handler.lock().as_ref().map(|(_, h)| Arc::clone(h));
        let abbruch = self.abbruch.lock().clone();
        let broker = Arc::clone(self);
        let call_id = anfrage.call_id;

        tokio::spawn(async move {
            let ergebnis = match handler {
                Some(handler) => {
                    tokio::select! {
                        biased;
                        _ = abbruch.cancelled() => {
                            debug!(call_id = %call_id, "Tool-Call abgebrochen");
                            return;
                        }
                        r = tokio::time::timeout(broker.timeout, handler(payload)) => match r {
                            Ok(Ok(ausgabe)) => Ok(ausgabe),
                            Ok(Err(e)) => Err(format!("Tool-Handler fehlgeschlagen: {e:#}")),
                            Err(_) => Err(format!(
                                "Tool-Handler nach {} ms ohne Ergebnis",
                                broker.timeout.as_millis()
                            )),
                        },
                    }
                }
                None => Err("Kein Tool-Handler registriert".to_string()),
            };
            broker.abschliessen(call_id, auftrag, ergebnis);
        });
    }

    fn abschliessen(&self, call_id: CallId, auftrag: u64, ergebnis: Result<String, String>) {
        if self
            .laufend
            .remove_if(&call_id, |_, eingetragen| *eingetragen == auftrag)
            .is_none()
        {
            debug!(call_id = %call_id, auftrag, "Verspaetetes Tool-Ergebnis verworfen");
            return;
        }

        let antwort = match ergebnis {
            Ok(ausgabe) => {
                debug!(call_id = %call_id, "Tool-Call erfolgreich");
                ClientMessage::tool_result(call_id.clone(), true, ausgabe)
            }
            Err(grund) => {
                warn!(call_id = %call_id, "{grund}");
                self.hub.enqueue::<ErrorRaised>(ConnekzError::new(
                    ErrorCode::AgentRuntime,
                    grund.clone(),
                ));
                if let Err(e) = self.session.status_setzen(AgentStatus::Listening) {
                    debug!("LISTENING nicht gesetzt: {e}");
                }
                ClientMessage::tool_result(call_id.clone(), false, grund)
            }
        };
        self.hub.flush();

        if let Err(e) = self.transport.senden(antwort) {
            warn!(call_id = %call_id, "Tool-Ergebnis nicht sendbar: {e}");
        }
    }

    /// Bricht alle laufenden Handler ab
    pub fn abbrechen(&self) {
        let alt = std::mem::replace(&mut *self.abbruch.lock(), CancellationToken::new());
        alt.cancel();
        if !self.laufend.is_empty() {
            debug!(anzahl = self.laufend.len(), "Laufende Tool-Calls verworfen");
        }
        self.laufend.clear();
    }
}
