//! connekz-protocol – Drahtprotokoll zum Agenten-Dienst
//!
//! Definiert Steuer-Nachrichten (JSON), Audio-Pakete (binaer) und den
//! Frame-Codec, der beide ueber eine Duplex-Verbindung transportiert.

pub mod audio;
pub mod control;
pub mod wire;

pub use audio::AudioPacket;
pub use control::{AgentMessage, ClientMessage};
pub use wire::{AgentCodec, ClientCodec, Frame, FrameCodec};
