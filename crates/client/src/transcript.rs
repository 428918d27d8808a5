//! Transkript
//!
//! Append-only Folge von Gespraechsbeitraegen. Einziger Mutator ist
//! `append`; jede Aufnahme meldet die vollstaendige Sequenz als
//! unveraenderlichen Snapshot an `on_transcript_update`.
//!
//! Regeln beim Einfuegen (ausser bei `force_display`):
//! - leere bzw. nur aus Leerzeichen bestehende Nachrichten werden verworfen
//! - ein exaktes Duplikat des letzten Eintrags (Rolle, Text, Gespraech) wird verworfen
//!
//! Eine rueckschreitende Gespraechs-ID wird immer auf die aktuelle ID gekappt.

use connekz_core::event::TranscriptUpdated;
use connekz_core::types::{ConversationId, Transcript, TranscriptEntry};
use connekz_core::SubscriptionHub;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

struct Inhalt {
    eintraege: Vec<Arc<TranscriptEntry>>,
    snapshot: Transcript,
    aktuelle_id: ConversationId,
}

pub struct TranscriptStore {
    inhalt: Mutex<Inhalt>,
    hub: Arc<SubscriptionHub>,
}

impl TranscriptStore {
    pub fn new(hub: Arc<SubscriptionHub>) -> Self {
        Self {
            inhalt: Mutex::new(Inhalt {
                eintraege: Vec::new(),
                snapshot: Arc::from(Vec::new()),
                aktuelle_id: ConversationId::default(),
            }),
            hub,
        }
    }

    /// Fuegt einen Eintrag an; gibt false zurueck wenn er gefiltert wurde
    pub fn append(&self, mut eintrag: TranscriptEntry) -> bool {
        {
            let mut inhalt = self.inhalt.lock();

            if eintrag.conversation_id < inhalt.aktuelle_id {
                warn!(
                    id = %eintrag.conversation_id,
                    aktuell = %inhalt.aktuelle_id,
                    "Rueckschreitende Gespraechs-ID gekappt"
                );
                eintrag.conversation_id = inhalt.aktuelle_id;
            } else {
                inhalt.aktuelle_id = eintrag.conversation_id;
            }

            if !eintrag.force_display {
                if eintrag.message.trim().is_empty() {
                    debug!("Leerer Transkript-Eintrag verworfen");
                    return false;
                }
                let duplikat = inhalt.eintraege.last().is_some_and(|letzter| {
                    letzter.role == eintrag.role
                        && letzter.message == eintrag.message
                        && letzter.conversation_id == eintrag.conversation_id
                });
                if duplikat {
                    debug!("Doppelter Transkript-Eintrag verworfen");
                    return false;
                }
            }

            inhalt.eintraege.push(Arc::new(eintrag));
            inhalt.snapshot = Arc::from(inhalt.eintraege.as_slice());
            self.hub
                .enqueue::<TranscriptUpdated>(Arc::clone(&inhalt.snapshot));
        }
        self.hub.flush();
        true
    }

    /// Unveraenderlicher Snapshot der Sequenz
    pub fn eintraege(&self) -> Transcript {
        Arc::clone(&self.inhalt.lock().snapshot)
    }

    pub fn aktuelle_id(&self) -> ConversationId {
        self.inhalt.lock().aktuelle_id
    }

    /// Beginnt ein neues logisches Gespraech
    pub fn begin_conversation(&self) -> ConversationId {
        let mut inhalt = self.inhalt.lock();
        inhalt.aktuelle_id = inhalt.aktuelle_id.naechste();
        debug!(id = %inhalt.aktuelle_id, "Neues Gespraech");
        inhalt.aktuelle_id
    }

    pub fn len(&self) -> usize {
        self.inhalt.lock().eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
