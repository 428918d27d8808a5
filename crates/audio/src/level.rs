//! Pegelmessung fuer die Waveform-Anzeige

/// Berechnet den RMS-Pegel eines Blocks (0.0 bei leerem Block)
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Verdichtet einen Sample-Strom zu periodischen Pegelwerten
///
/// Pro abgeschlossenem Fenster von `fenster` Samples entsteht ein Wert
/// im Bereich 0.0..=1.0. Angefangene Fenster werden ueber Bloecke hinweg
/// fortgesetzt.
#[derive(Debug, Clone)]
pub struct WaveformMeter {
    fenster: usize,
    summe_quadrate: f32,
    anzahl: usize,
}

impl WaveformMeter {
    pub fn new(fenster: usize) -> Self {
        Self {
            fenster: fenster.max(1),
            summe_quadrate: 0.0,
            anzahl: 0,
        }
    }

    /// Nimmt einen Block auf; gibt den Pegel des letzten vollen Fensters zurueck
    pub fn messen(&mut self, samples: &[f32]) -> Option<f32> {
        let mut letzter = None;
        for s in samples {
            self.summe_quadrate += s * s;
            self.anzahl += 1;
            if self.anzahl == self.fenster {
                let pegel = (self.summe_quadrate / self.fenster as f32).sqrt();
                letzter = Some(pegel.clamp(0.0, 1.0));
                self.summe_quadrate = 0.0;
                self.anzahl = 0;
            }
        }
        letzter
    }

    pub fn zuruecksetzen(&mut self) {
        self.summe_quadrate = 0.0;
        self.anzahl = 0;
    }
}
