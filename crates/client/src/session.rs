//! Sitzungszustand
//!
//! Verbindungszustand, Agenten-Status, Mikrofon-Status und Schlaf-Flag
//! einer Instanz. Alle Mutationen reihen ihre Events unter dem Lock in den
//! Hub ein; der Aufrufer stellt sie nach Freigabe aller Locks per
//! `SubscriptionHub::flush` zu.
//!
//! ## Status-Invariante
//! ```text
//! NOT_STARTED, DISCONNECTED, STOPPED, ERROR  -> jederzeit
//! INITIATING                                 -> Connecting oder Connected
//! alle anderen                               -> nur Connected
//! ```

use connekz_core::error::{ClientError, Result};
use connekz_core::event::{
    AgentStatusChanged, IsConnectedChanged, IsConnectingChanged, MicStatusChanged,
};
use connekz_core::types::{AgentStatus, MicStatus};
use connekz_core::SubscriptionHub;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Verbindungszustand des Transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Momentaufnahme einer Sitzung
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub verbindung: ConnectionState,
    pub agent_status: AgentStatus,
    pub mic_status: MicStatus,
    pub schlafend: bool,
    /// Sitzung wurde explizit beendet (Trennung fuehrt zu STOPPED)
    pub gestoppt: bool,
}

/// Prueft ob `neu` im Verbindungszustand `verbindung` gesetzt werden darf
pub fn status_erlaubt(verbindung: ConnectionState, neu: AgentStatus) -> bool {
    if neu.ist_terminal() {
        return true;
    }
    match neu {
        AgentStatus::Initiating => verbindung != ConnectionState::Disconnected,
        _ => verbindung == ConnectionState::Connected,
    }
}

/// Geteilter Sitzungszustand
pub struct SessionHandle {
    zustand: Mutex<Session>,
    hub: Arc<SubscriptionHub>,
}

impl SessionHandle {
    pub fn new(hub: Arc<SubscriptionHub>) -> Arc<Self> {
        Arc::new(Self {
            zustand: Mutex::new(Session::default()),
            hub,
        })
    }

    pub fn snapshot(&self) -> Session {
        self.zustand.lock().clone()
    }

    pub fn verbindung(&self) -> ConnectionState {
        self.zustand.lock().verbindung
    }

    pub fn ist_verbunden(&self) -> bool {
        self.verbindung() == ConnectionState::Connected
    }

    pub fn agent_status(&self) -> AgentStatus {
        self.zustand.lock().agent_status
    }

    pub fn mic_status(&self) -> MicStatus {
        self.zustand.lock().mic_status
    }

    pub fn ist_schlafend(&self) -> bool {
        self.zustand.lock().schlafend
    }

    pub fn ist_gestoppt(&self) -> bool {
        self.zustand.lock().gestoppt
    }

    /// Setzt den Verbindungszustand
    pub(crate) fn verbindung_setzen(&self, neu: ConnectionState) {
        let mut s = self.zustand.lock();
        self.verbindung_intern(&mut s, neu);
    }

    /// Beginnt einen Verbindungsaufbau, optional mit Status im selben Schritt
    pub(crate) fn verbindungsaufbau(&self, status: Option<AgentStatus>) -> Result<()> {
        let mut s = self.zustand.lock();
        self.verbindung_intern(&mut s, ConnectionState::Connecting);
        if let Some(status) = status {
            self.status_intern(&mut s, status)?;
        }
        Ok(())
    }

    /// Setzt den Agenten-Status
    ///
    /// Gibt `Ok(false)` zurueck wenn der Status bereits gilt.
    pub(crate) fn status_setzen(&self, neu: AgentStatus) -> Result<bool> {
        let mut s = self.zustand.lock();
        self.status_intern(&mut s, neu)
    }

    /// Setzt einen terminalen Status und die Verbindung in einem Schritt
    pub(crate) fn trennen(&self, endstatus: AgentStatus) {
        let mut s = self.zustand.lock();
        self.verbindung_intern(&mut s, ConnectionState::Disconnected);
        // terminale Status sind immer erlaubt
        let _ = self.status_intern(&mut s, endstatus);
    }

    /// Schaltet das Mikrofon um und gibt den neuen Status zurueck
    pub(crate) fn mic_umschalten(&self) -> MicStatus {
        let mut s = self.zustand.lock();
        s.mic_status = s.mic_status.umgeschaltet();
        self.hub.enqueue::<MicStatusChanged>(s.mic_status);
        debug!(mic = ?s.mic_status, "Mikrofon umgeschaltet");
        s.mic_status
    }

    /// Setzt die Flags fuer eine neue Sitzung zurueck
    pub(crate) fn neue_sitzung(&self) {
        let mut s = self.zustand.lock();
        s.gestoppt = false;
        s.schlafend = false;
    }

    /// Markiert die Sitzung als explizit beendet
    pub(crate) fn stoppen_markieren(&self) {
        self.zustand.lock().gestoppt = true;
    }

    /// Endstatus einer Trennung
    pub(crate) fn endstatus(&self) -> AgentStatus {
        if self.ist_gestoppt() {
            AgentStatus::Stopped
        } else {
            AgentStatus::Disconnected
        }
    }

    fn verbindung_intern(&self, s: &mut Session, neu: ConnectionState) {
        let alt = s.verbindung;
        if alt == neu {
            return;
        }
        s.verbindung = neu;
        debug!(von = ?alt, nach = ?neu, "Verbindungszustand");

        let verbindet = neu == ConnectionState::Connecting;
        if (alt == ConnectionState::Connecting) != verbindet {
            self.hub.enqueue::<IsConnectingChanged>(verbindet);
        }
        let verbunden = neu == ConnectionState::Connected;
        if (alt == ConnectionState::Connected) != verbunden {
            self.hub.enqueue::<IsConnectedChanged>(verbunden);
        }
    }

    fn status_intern(&self, s: &mut Session, neu: AgentStatus) -> Result<bool> {
        if !status_erlaubt(s.verbindung, neu) {
            return Err(ClientError::UngueltigerStatus {
                von: s.agent_status,
                nach: neu,
            });
        }
        if s.agent_status == neu {
            return Ok(false);
        }

        debug!(von = %s.agent_status, nach = %neu, "Agenten-Status");
        s.agent_status = neu;
        s.schlafend = neu == AgentStatus::Sleeping;
        self.hub.enqueue::<AgentStatusChanged>(neu);
        Ok(true)
    }
}
