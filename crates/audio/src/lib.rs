//! connekz-audio – Audio-Relay des Connekz-Clients
//!
//! - Capture-Knoten fuer den Echtzeit-Audio-Thread mit begrenztem Relay
//! - Pegelmessung fuer die Waveform-Anzeige
//! - Aufnahmepuffer fuer den Capture-Test
//! - Playback-Queue (lock-free Ring-Buffer)
//! - `AudioHost`-Schnittstelle zum eigentlichen Audio-Graphen

pub mod capture;
pub mod error;
pub mod host;
pub mod level;
pub mod playback;
pub mod recorder;

pub use capture::{relay, AudioCaptureNode, CaptureReceiver};
pub use error::{AudioError, AudioResult};
pub use host::{AudioHost, HeadlessAudioHost};
pub use level::{rms_level, WaveformMeter};
pub use playback::PlaybackQueue;
pub use recorder::CaptureRecorder;
