//! SubscriptionHub – typisiertes Publish/Subscribe
//!
//! Jeder Kanal ist ein Marker-Typ mit genau einem Payload-Typ, der Compiler
//! verhindert also falsche Payloads. Jede Zustandsaenderung der Laufzeit
//! laeuft ueber diesen Hub.
//!
//! ## Zustellung
//! - Events werden in eine FIFO-Queue eingereiht (`enqueue`) und von genau
//!   einem Zusteller gleichzeitig ausgeliefert (`flush`). Die Reihenfolge
//!   entspricht damit der Reihenfolge in der die Events erzeugt wurden.
//! - Callbacks duerfen re-entrant weitere Events ausloesen oder abmelden;
//!   solche Events werden nach dem aktuellen Event zugestellt.
//! - Liefert gerade ein anderer Thread aus, wartet `flush` bis auch die
//!   eigenen Events zugestellt sind. Nach der Rueckkehr von `flush` sind
//!   damit alle zuvor eingereihten Events bei den Abonnenten angekommen.
//! - Pro Kanal werden Abonnenten in Anmeldereihenfolge bedient.
//! - Ein abgemeldeter Callback wird ab dem Abmelden nie wieder aufgerufen,
//!   auch nicht fuer ein Event das gerade zugestellt wird.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use crate::error::ConnekzError;
use crate::types::{AgentStatus, ConnectionQuality, MicStatus, ToolCallPayload, Transcript};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

struct Eintrag<T> {
    id: u64,
    aktiv: Arc<AtomicBool>,
    callback: Callback<T>,
}

/// Abonnentenliste eines Kanals
pub struct Topic<T> {
    eintraege: Mutex<Vec<Eintrag<T>>>,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self {
            eintraege: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Topic<T> {
    fn hinzufuegen(&self, id: u64, callback: Callback<T>) -> Arc<AtomicBool> {
        let aktiv = Arc::new(AtomicBool::new(true));
        self.eintraege.lock().push(Eintrag {
            id,
            aktiv: Arc::clone(&aktiv),
            callback,
        });
        aktiv
    }

    fn entfernen(&self, id: u64) {
        self.eintraege.lock().retain(|e| e.id != id);
    }

    fn zustellen(&self, wert: &T) {
        // Snapshot ohne gehaltenen Lock, damit Callbacks an- und abmelden koennen
        let snapshot: Vec<(Arc<AtomicBool>, Callback<T>)> = self
            .eintraege
            .lock()
            .iter()
            .map(|e| (Arc::clone(&e.aktiv), Arc::clone(&e.callback)))
            .collect();

        for (aktiv, callback) in snapshot {
            if aktiv.load(Ordering::Acquire) {
                callback(wert);
            }
        }
    }

    fn leeren(&self) {
        for eintrag in self.eintraege.lock().drain(..) {
            eintrag.aktiv.store(false, Ordering::Release);
        }
    }

    fn anzahl(&self) -> usize {
        self.eintraege.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Kanaele
// ---------------------------------------------------------------------------

/// Ein Kanal des Hubs mit festem Payload-Typ
pub trait Channel: 'static {
    type Payload: Send + Sync + 'static;

    /// Name fuer Logs
    const NAME: &'static str;

    #[doc(hidden)]
    fn topic(topics: &Topics) -> &Topic<Self::Payload>;

    #[doc(hidden)]
    fn verpacken(payload: Self::Payload) -> HubEvent;
}

macro_rules! kanaele {
    ($( $(#[$doc:meta])* $name:ident => $feld:ident : $payload:ty ),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy)]
            pub struct $name;

            impl Channel for $name {
                type Payload = $payload;
                const NAME: &'static str = stringify!($feld);

                fn topic(topics: &Topics) -> &Topic<$payload> {
                    &topics.$feld
                }

                fn verpacken(payload: $payload) -> HubEvent {
                    HubEvent::$name(payload)
                }
            }
        )*

        /// Abonnentenlisten aller Kanaele
        #[doc(hidden)]
        #[derive(Default)]
        pub struct Topics {
            $( $feld: Topic<$payload>, )*
        }

        impl Topics {
            fn leeren(&self) {
                $( self.$feld.leeren(); )*
            }
        }

        /// Ein eingereihtes, noch nicht zugestelltes Event
        #[doc(hidden)]
        pub enum HubEvent {
            $( $name($payload), )*
        }

        impl HubEvent {
            fn zustellen(&self, topics: &Topics) {
                match self {
                    $( HubEvent::$name(wert) => topics.$feld.zustellen(wert), )*
                }
            }
        }
    };
}

kanaele! {
    /// Verbindungsaufbau laeuft / laeuft nicht mehr
    IsConnectingChanged => is_connecting: bool,
    /// Verbindung steht / steht nicht mehr
    IsConnectedChanged => is_connected: bool,
    AgentStatusChanged => agent_status: AgentStatus,
    MicStatusChanged => mic_status: MicStatus,
    /// Pegel des Mikrofons (RMS, 0.0..=1.0)
    UserWaveformUpdated => user_waveform: f32,
    /// Pegel der Agenten-Stimme (RMS, 0.0..=1.0)
    AgentWaveformUpdated => agent_waveform: f32,
    /// Vollstaendige, unveraenderliche Transkript-Sequenz
    TranscriptUpdated => transcript: Transcript,
    /// Eingehender Tool-Call (nur Beobachtung, das Ergebnis liefert der Broker-Handler)
    ToolCallReceived => tool_call: ToolCallPayload,
    ConnectionQualityChanged => connection_quality: ConnectionQuality,
    ErrorRaised => error: ConnekzError,
}

// ---------------------------------------------------------------------------
// Unsubscriber
// ---------------------------------------------------------------------------

/// Abmelde-Token eines Abonnements
///
/// `unsubscribe` darf beliebig oft aufgerufen werden; nur der erste Aufruf
/// wirkt. Droppen meldet nicht ab.
pub struct Unsubscriber {
    aktion: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Unsubscriber {
    /// Erstellt ein Token das beim ersten `unsubscribe` die Aktion ausfuehrt
    pub fn new(aktion: impl FnOnce() + Send + 'static) -> Self {
        Self {
            aktion: Mutex::new(Some(Box::new(aktion))),
        }
    }

    /// Token ohne Wirkung
    pub fn noop() -> Self {
        Self {
            aktion: Mutex::new(None),
        }
    }

    /// Meldet den Callback ab
    pub fn unsubscribe(&self) {
        let aktion = self.aktion.lock().take();
        if let Some(aktion) = aktion {
            aktion();
        }
    }
}

impl std::fmt::Debug for Unsubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscriber")
            .field("aktiv", &self.aktion.lock().is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SubscriptionHub
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Zustellung {
    events: VecDeque<HubEvent>,
    /// Thread der gerade ausliefert
    zusteller: Option<ThreadId>,
    /// Laufende Nummern: eingereihte und ausgelieferte Events
    eingereiht: u64,
    zugestellt: u64,
}

/// Gibt die Zustellung frei, auch wenn ein Callback panict
struct ZustellerGuard<'a> {
    zustellung: &'a Mutex<Zustellung>,
    signal: &'a Condvar,
}

impl Drop for ZustellerGuard<'_> {
    fn drop(&mut self) {
        self.zustellung.lock().zusteller = None;
        self.signal.notify_all();
    }
}

/// Zentraler Event-Hub einer Connekz-Instanz
#[derive(Default)]
pub struct SubscriptionHub {
    topics: Topics,
    zustellung: Mutex<Zustellung>,
    /// Meldet Fortschritt und Ende einer Zustellung
    zugestellt_signal: Condvar,
    naechste_id: AtomicU64,
}

impl SubscriptionHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Meldet einen Callback auf einem Kanal an
    pub fn subscribe<C: Channel>(
        self: &Arc<Self>,
        callback: impl Fn(&C::Payload) + Send + Sync + 'static,
    ) -> Unsubscriber {
        let id = self.naechste_id.fetch_add(1, Ordering::Relaxed);
        let aktiv = C::topic(&self.topics).hinzufuegen(id, Arc::new(callback));
        let hub: Weak<Self> = Arc::downgrade(self);

        Unsubscriber::new(move || {
            aktiv.store(false, Ordering::Release);
            if let Some(hub) = hub.upgrade() {
                C::topic(&hub.topics).entfernen(id);
            }
        })
    }

    /// Reiht ein Event ein ohne es zuzustellen
    ///
    /// Darf unter einem Zustands-Lock aufgerufen werden; die Zustellung
    /// erfolgt beim naechsten `flush`.
    pub fn enqueue<C: Channel>(&self, payload: C::Payload) {
        let mut zustellung = self.zustellung.lock();
        zustellung.events.push_back(C::verpacken(payload));
        zustellung.eingereiht += 1;
    }

    /// Stellt alle eingereihten Events zu
    ///
    /// Re-entrant aus einem Callback kehrt der Aufruf sofort zurueck, die
    /// laufende Zustellung uebernimmt die neuen Events. Liefert ein anderer
    /// Thread aus, blockiert der Aufruf bis alle bis hierhin eingereihten
    /// Events zugestellt sind.
    pub fn flush(&self) {
        let ich = thread::current().id();
        {
            let mut zustellung = self.zustellung.lock();
            let marke = zustellung.eingereiht;
            loop {
                match zustellung.zusteller {
                    None => break,
                    Some(zusteller) if zusteller == ich => return,
                    Some(_) if zustellung.zugestellt >= marke => return,
                    Some(_) => self.zugestellt_signal.wait(&mut zustellung),
                }
            }
            if zustellung.events.is_empty() {
                return;
            }
            zustellung.zusteller = Some(ich);
        }

        let _guard = ZustellerGuard {
            zustellung: &self.zustellung,
            signal: &self.zugestellt_signal,
        };

        loop {
            let event = {
                let mut zustellung = self.zustellung.lock();
                match zustellung.events.pop_front() {
                    Some(event) => event,
                    None => return,
                }
            };
            event.zustellen(&self.topics);
            self.zustellung.lock().zugestellt += 1;
            self.zugestellt_signal.notify_all();
        }
    }

    /// Reiht ein Event ein und stellt sofort zu
    pub fn publish<C: Channel>(&self, payload: C::Payload) {
        self.enqueue::<C>(payload);
        self.flush();
    }

    /// Meldet alle Abonnenten aller Kanaele ab
    pub fn alle_abmelden(&self) {
        self.topics.leeren();
    }

    /// Anzahl der Abonnenten eines Kanals
    pub fn anzahl<C: Channel>(&self) -> usize {
        C::topic(&self.topics).anzahl()
    }
}
