//! Schnittstelle zum Audio-Graphen
//!
//! Der Host besitzt den Echtzeit-Thread und ruft den angeschlossenen
//! `AudioCaptureNode` einmal pro Block auf. Wiedergabe (Agenten-Stimme,
//! Capture-Test) laeuft ueber `play`.

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::capture::AudioCaptureNode;
use crate::error::{AudioError, AudioResult};
use crate::playback::PlaybackQueue;

/// Audio-Graph der Host-Umgebung
pub trait AudioHost: Send + Sync {
    /// Schliesst einen Capture-Knoten an
    ///
    /// Pro Host ist hoechstens ein aktiver Knoten erlaubt.
    fn attach(&self, node: AudioCaptureNode) -> AudioResult<()>;

    /// Trennt den Capture-Knoten (idempotent)
    fn detach(&self);

    /// Reiht Samples zur lokalen Wiedergabe ein
    fn play(&self, samples: &[f32]) -> AudioResult<()>;

    /// Abtastrate des Graphen in Hz
    fn sample_rate(&self) -> u32 {
        48_000
    }
}

/// In-Process-Host ohne Audio-Hardware
///
/// `feed` uebernimmt die Rolle des Echtzeit-Threads; Wiedergabe landet
/// in einer `PlaybackQueue`.
pub struct HeadlessAudioHost {
    node: Mutex<Option<AudioCaptureNode>>,
    ausgabe: PlaybackQueue,
    sample_rate: u32,
}

impl HeadlessAudioHost {
    pub fn new(sample_rate: u32, playback_kapazitaet: usize) -> Self {
        Self {
            node: Mutex::new(None),
            ausgabe: PlaybackQueue::new(playback_kapazitaet),
            sample_rate,
        }
    }

    /// Liefert einen Block an den angeschlossenen Knoten
    ///
    /// Gibt `false` zurueck wenn kein Knoten angeschlossen ist oder der
    /// Knoten nicht weiter aufgerufen werden will.
    pub fn feed(&self, inputs: &[&[f32]]) -> bool {
        let mut node = self.node.lock();
        let weiter = match node.as_ref() {
            Some(n) => n.process(inputs),
            None => return false,
        };
        if !weiter {
            trace!("Capture-Knoten beendet, wird entfernt");
            *node = None;
        }
        weiter
    }

    pub fn ist_angeschlossen(&self) -> bool {
        self.node.lock().is_some()
    }

    pub fn ausgabe(&self) -> &PlaybackQueue {
        &self.ausgabe
    }
}

impl Default for HeadlessAudioHost {
    fn default() -> Self {
        Self::new(48_000, 48_000 * 2)
    }
}

impl AudioHost for HeadlessAudioHost {
    fn attach(&self, node: AudioCaptureNode) -> AudioResult<()> {
        let mut slot = self.node.lock();
        if slot.as_ref().is_some_and(|n| !n.ist_freigegeben()) {
            return Err(AudioError::KnotenAktiv);
        }
        *slot = Some(node);
        debug!("Capture-Knoten angeschlossen");
        Ok(())
    }

    fn detach(&self) {
        if self.node.lock().take().is_some() {
            debug!("Capture-Knoten getrennt");
        }
    }

    fn play(&self, samples: &[f32]) -> AudioResult<()> {
        self.ausgabe.schreiben(samples);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
