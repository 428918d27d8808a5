//! Wire-Format fuer die Agenten-Verbindung
//!
//! Frame-basiertes Protokoll: Art(u8) + Length(u32 big-endian) + Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+--------+----...----+
//! |  Art   | Laenge (u32 BE)                   | Payload    |
//! +--------+--------+--------+--------+--------+----...----+
//! ```
//!
//! Art 1 = Steuer-Nachricht (JSON), Art 2 = Audio-Paket (binaer).
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne Header).
//! Maximale Frame-Groesse ist konfigurierbar (Standard: 1 MB).

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::io;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

use crate::audio::AudioPacket;
use crate::control::{AgentMessage, ClientMessage};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Headers (Art + Laenge) in Bytes
pub const HEADER_SIZE: usize = 5;

/// Frame-Art: Steuer-Nachricht
pub const KIND_CONTROL: u8 = 1;

/// Frame-Art: Audio-Paket
pub const KIND_AUDIO: u8 = 2;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Ein Frame auf der Leitung
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<C> {
    Control(C),
    Audio(AudioPacket),
    /// Vollstaendig empfangener Frame dessen Inhalt nicht lesbar ist
    ///
    /// Der Strom bleibt ueber das Laengenfeld synchron; der Empfaenger
    /// verwirft den Frame. Wird nur vom Decoder erzeugt.
    Ungueltig(String),
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer die Agenten-Verbindung
///
/// `In` ist der Typ eingehender Steuer-Nachrichten, `Out` der ausgehender.
/// Client und Agent verwenden dieselbe Implementierung mit vertauschten
/// Typen, siehe [`ClientCodec`] und [`AgentCodec`].
///
/// # Beispiel
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use connekz_protocol::wire::ClientCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, ClientCodec::new());
/// ```
pub struct FrameCodec<In, Out> {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
    _typen: PhantomData<fn(Out) -> In>,
}

/// Codec der Client-Seite
pub type ClientCodec = FrameCodec<AgentMessage, ClientMessage>;

/// Codec der Agenten-Seite (Gegenstellen in Tests und Werkzeugen)
pub type AgentCodec = FrameCodec<ClientMessage, AgentMessage>;

impl<In, Out> FrameCodec<In, Out> {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            _typen: PhantomData,
        }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn groesse_pruefen(&self, laenge: usize) -> io::Result<()> {
        if laenge > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                    laenge, self.max_frame_size
                ),
            ));
        }
        Ok(())
    }
}

impl<In, Out> Default for FrameCodec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> Clone for FrameCodec<In, Out> {
    fn clone(&self) -> Self {
        Self::with_max_size(self.max_frame_size)
    }
}

impl<In, Out> fmt::Debug for FrameCodec<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCodec")
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl<In: DeserializeOwned, Out> Decoder for FrameCodec<In, Out> {
    type Item = Frame<In>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Header lesen ohne den Buffer zu veraendern
        let art = src[0];
        let length = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        self.groesse_pruefen(length)?;

        let total_size = HEADER_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length);

        let frame = match art {
            KIND_CONTROL => match serde_json::from_slice::<In>(&payload) {
                Ok(nachricht) => Frame::Control(nachricht),
                Err(e) => Frame::Ungueltig(format!("Steuer-Nachricht nicht lesbar: {}", e)),
            },
            KIND_AUDIO => match AudioPacket::decode(&payload) {
                Ok(paket) => Frame::Audio(paket),
                Err(e) => Frame::Ungueltig(format!("Audio-Paket nicht lesbar: {}", e)),
            },
            andere => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Unbekannte Frame-Art: {}", andere),
                ))
            }
        };

        Ok(Some(frame))
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl<In, Out: Serialize> Encoder<Frame<Out>> for FrameCodec<In, Out> {
    type Error = io::Error;

    fn encode(&mut self, item: Frame<Out>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (art, payload) = match item {
            Frame::Control(nachricht) => {
                let json = serde_json::to_vec(&nachricht).map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("JSON-Serialisierung fehlgeschlagen: {}", e),
                    )
                })?;
                (KIND_CONTROL, json)
            }
            Frame::Audio(paket) => (KIND_AUDIO, paket.encode()),
            Frame::Ungueltig(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Ungueltiger Frame kann nicht gesendet werden",
                ))
            }
        };

        self.groesse_pruefen(payload.len())?;

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_u8(art);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
