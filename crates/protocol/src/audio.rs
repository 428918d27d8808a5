//! Audio-Pakete
//!
//! Binaerformat fuer Mikrofon-Bloecke (Client -> Agent) und
//! Sprachausgabe (Agent -> Client).
//!
//! ## Paket-Layout
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Sequenznummer (u32 BE)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                Samples (f32 LE, je 4 Bytes) ...               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::io;

/// Groesse des Headers in Bytes
pub const HEADER_SIZE: usize = 4;

/// Maximale Anzahl Samples pro Paket (1 Sekunde bei 48 kHz)
pub const MAX_SAMPLES: usize = 48_000;

/// Ein Block Mono-Samples mit Sequenznummer
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    /// Fortlaufend pro Verbindung, Ueberlauf erlaubt
    pub sequence: u32,
    pub samples: Vec<f32>,
}

impl AudioPacket {
    pub fn new(sequence: u32, samples: Vec<f32>) -> Self {
        Self { sequence, samples }
    }

    /// Serialisiert das Paket
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.groesse());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        for sample in &self.samples {
            buf.extend_from_slice(&sample.to_le_bytes());
        }
        buf
    }

    /// Deserialisiert ein Paket
    ///
    /// # Fehler
    /// - `InvalidData` wenn der Header fehlt
    /// - `InvalidData` wenn die Nutzdaten kein Vielfaches von 4 Bytes sind
    /// - `InvalidData` wenn mehr als `MAX_SAMPLES` Samples enthalten sind
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Audio-Paket zu kurz: {} Bytes (erwartet mindestens {})",
                    buf.len(),
                    HEADER_SIZE
                ),
            ));
        }

        let sequence = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let nutzdaten = &buf[HEADER_SIZE..];

        if nutzdaten.len() % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Nutzdaten nicht f32-ausgerichtet: {} Bytes", nutzdaten.len()),
            ));
        }

        let anzahl = nutzdaten.len() / 4;
        if anzahl > MAX_SAMPLES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Zu viele Samples: {} (Maximum {})", anzahl, MAX_SAMPLES),
            ));
        }

        let samples = nutzdaten
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self { sequence, samples })
    }

    /// Gesamtgroesse des serialisierten Pakets in Bytes
    pub fn groesse(&self) -> usize {
        HEADER_SIZE + self.samples.len() * 4
    }
}
