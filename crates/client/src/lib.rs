//! connekz-client – Laufzeit des Connekz Voice-Agent-Clients
//!
//! Verbindet eine Host-Anwendung mit einem entfernten Voice-Agenten.
//!
//! ## Module
//! - [`config`] – Initialisierungs-Optionen und Laufzeit-Einstellungen
//! - [`logging`] – tracing-subscriber Setup fuer Binaries
//! - [`session`] – Verbindungs- und Agenten-Status einer Instanz
//! - [`transport`] – Duplex-Verbindung, Handshake und Frame-Versand
//! - [`transcript`] – Append-only Transkript mit Snapshots
//! - [`tool_call`] – Vermittlung von Tool-Calls an den Host-Handler
//! - [`agent`] – Steuerung des Voice-Agents und der Audio-Pumpe
//! - [`instance`] – `init_connekz` und die headless Sub-APIs

pub mod agent;
pub mod config;
pub mod instance;
pub mod logging;
pub mod session;
pub mod tool_call;
pub mod transcript;
pub mod transport;

pub use agent::VoiceAgentController;
pub use config::ConnekzOptions;
pub use instance::{
    init_connekz, ConnekzEnvironment, ConnekzInstance, ConnekzSocketApi, Surface, SurfaceHost,
    VoiceAgentApi,
};
pub use session::{ConnectionState, Session};
pub use transport::{AgentConnector, BoxedIo, TcpConnector};

pub use connekz_core::{
    AgentStatus, ClientError, ConnekzError, ErrorCode, MicStatus, Result, Role, ToolCallPayload,
    Transcript, TranscriptEntry, Unsubscriber,
};
