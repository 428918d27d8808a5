//! Playback-Queue
//!
//! Lock-free Ring-Buffer zwischen dem Steuer-Kontext (schreibt Agenten-Audio
//! bzw. Capture-Test-Aufnahmen) und dem Ausgabe-Callback des Audio-Graphen
//! (liest). Beide Haelften sind einzeln gesperrt, sodass Schreiber und
//! Leser sich nicht gegenseitig blockieren.

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::warn;

pub struct PlaybackQueue {
    producer: Mutex<HeapProd<f32>>,
    consumer: Mutex<HeapCons<f32>>,
    kapazitaet: usize,
}

impl PlaybackQueue {
    /// Erstellt eine Queue fuer `kapazitaet` Samples
    pub fn new(kapazitaet: usize) -> Self {
        let kapazitaet = kapazitaet.max(1);
        let (producer, consumer) = HeapRb::<f32>::new(kapazitaet).split();
        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            kapazitaet,
        }
    }

    /// Schreibt Samples; gibt die Anzahl geschriebener Samples zurueck
    pub fn schreiben(&self, samples: &[f32]) -> usize {
        let written = self.producer.lock().push_slice(samples);
        if written < samples.len() {
            warn!(
                "Playback-Queue voll, {} Samples verworfen",
                samples.len() - written
            );
        }
        written
    }

    /// Fuellt `ausgabe`; fehlende Samples werden mit Stille aufgefuellt
    ///
    /// Gibt die Anzahl echter Samples zurueck.
    pub fn lesen(&self, ausgabe: &mut [f32]) -> usize {
        let read = self.consumer.lock().pop_slice(ausgabe);
        ausgabe[read..].fill(0.0);
        read
    }

    /// Anzahl wartender Samples
    pub fn verfuegbar(&self) -> usize {
        self.consumer.lock().occupied_len()
    }

    pub fn kapazitaet(&self) -> usize {
        self.kapazitaet
    }

    /// Verwirft alle wartenden Samples
    pub fn leeren(&self) {
        self.consumer.lock().clear();
    }
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackQueue")
            .field("kapazitaet", &self.kapazitaet)
            .field("verfuegbar", &self.verfuegbar())
            .finish()
    }
}
