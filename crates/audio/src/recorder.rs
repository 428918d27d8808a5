//! Aufnahmepuffer fuer den Capture-Test
//!
//! Sammelt Mikrofon-Bloecke lokal, ohne sie zu uebertragen. Die Laenge
//! ist begrenzt; darueber hinausgehende Samples werden verworfen.

use tracing::debug;

#[derive(Debug, Default)]
pub struct CaptureRecorder {
    samples: Vec<f32>,
    max_samples: usize,
    aktiv: bool,
}

impl CaptureRecorder {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::new(),
            max_samples,
            aktiv: false,
        }
    }

    /// Startet eine neue Aufnahme und verwirft die vorherige
    pub fn starten(&mut self) {
        self.samples.clear();
        self.aktiv = true;
    }

    /// Beendet die Aufnahme, der Puffer bleibt fuer die Wiedergabe erhalten
    pub fn stoppen(&mut self) {
        if self.aktiv {
            debug!(samples = self.samples.len(), "Capture-Test beendet");
        }
        self.aktiv = false;
    }

    /// Haengt einen Block an; gibt die Anzahl uebernommener Samples zurueck
    pub fn aufnehmen(&mut self, block: &[f32]) -> usize {
        if !self.aktiv {
            return 0;
        }
        let frei = self.max_samples.saturating_sub(self.samples.len());
        let n = frei.min(block.len());
        self.samples.extend_from_slice(&block[..n]);
        n
    }

    pub fn ist_aktiv(&self) -> bool {
        self.aktiv
    }

    pub fn ist_voll(&self) -> bool {
        self.samples.len() >= self.max_samples
    }

    pub fn aufnahme(&self) -> &[f32] {
        &self.samples
    }

    pub fn laenge(&self) -> usize {
        self.samples.len()
    }
}
