//! connekz-core – Gemeinsame Typen, Fehler und Event-Verteilung
//!
//! Dieses Crate stellt die Bausteine bereit, die Protokoll, Audio und
//! Client-Laufzeit gemeinsam nutzen: das Datenmodell einer Sitzung, die
//! feste Fehlertaxonomie (`CNKZ_ERR_1001`..`1005`) und den typisierten
//! `SubscriptionHub`.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{ClientError, ConnekzError, ErrorCode, Result};
pub use event::{Channel, SubscriptionHub, Unsubscriber};
pub use types::{
    AgentStatus, CallId, ConnectionQuality, ConversationId, MicStatus, Role, ToolCallPayload,
    Transcript, TranscriptEntry,
};
