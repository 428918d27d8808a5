//! Capture-Knoten und Relay
//!
//! Der Knoten laeuft im Echtzeit-Thread des Audio-Graphen und leitet den
//! ersten Eingangskanal jedes Blocks unveraendert an den Steuer-Kontext
//! weiter. Das Relay ist ein begrenzter Kanal; ist er voll, wird der
//! angebotene (neueste) Block verworfen. Der Knoten blockiert nie.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Erstellt einen Capture-Knoten und das zugehoerige Empfangsende
///
/// `capacity` ist die Anzahl Bloecke die das Relay puffert (mindestens 1).
pub fn relay(capacity: usize) -> (AudioCaptureNode, CaptureReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    let released = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicU64::new(0));

    let node = AudioCaptureNode {
        tx,
        released: Arc::clone(&released),
        dropped: Arc::clone(&dropped),
    };
    let receiver = CaptureReceiver {
        rx,
        released,
        dropped,
    };
    (node, receiver)
}

/// Knoten im Audio-Graphen
pub struct AudioCaptureNode {
    tx: Sender<Vec<f32>>,
    released: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl AudioCaptureNode {
    /// Wird einmal pro Block vom Audio-Thread aufgerufen
    ///
    /// Gibt `false` zurueck sobald der Knoten freigegeben wurde; der Host
    /// ruft ihn danach nicht mehr auf.
    pub fn process(&self, inputs: &[&[f32]]) -> bool {
        if self.released.load(Ordering::Acquire) {
            return false;
        }

        if let Some(erster) = inputs.first() {
            match self.tx.try_send(erster.to_vec()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Kein Logging im Echtzeit-Thread; der Zaehler wird im Steuer-Kontext gelesen
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.released.store(true, Ordering::Release);
                    return false;
                }
            }
        }

        true
    }

    /// Gibt true zurueck wenn der Steuer-Kontext das Relay freigegeben hat
    pub fn ist_freigegeben(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for AudioCaptureNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioCaptureNode")
            .field("released", &self.ist_freigegeben())
            .finish()
    }
}

/// Empfangsende des Relays im Steuer-Kontext
pub struct CaptureReceiver {
    rx: Receiver<Vec<f32>>,
    released: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl CaptureReceiver {
    /// Wartet hoechstens `timeout` auf den naechsten Block
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Vec<f32>, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<Vec<f32>, TryRecvError> {
        self.rx.try_recv()
    }

    /// Anzahl wegen Ueberlauf verworfener Bloecke
    pub fn verworfen(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Gibt den Knoten frei; `process` liefert danach `false`
    pub fn freigeben(&self) {
        self.released.store(true, Ordering::Release);
    }
}

impl Drop for CaptureReceiver {
    fn drop(&mut self) {
        self.freigeben();
    }
}
