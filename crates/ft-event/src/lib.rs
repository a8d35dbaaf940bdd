//! ft-event: Sequencer events, the prioritized event queue, and the
//! timing synchronizer for Ferrotone
//!
//! The sequencer talks to the audio thread exclusively through these
//! types: events carry sample timestamps, the queue orders them by
//! (timestamp, priority, sequence), and the synchronizer turns BPM and
//! steps into sample-accurate boundaries.

pub mod event;
pub mod queue;
pub mod timing;

pub use event::{EventPayload, EventPriority, PrioritizedEvent, TransportCommand};
pub use queue::{EventQueue, EventSender};
pub use timing::{StepEvent, TimeSignature, TimingState, TimingSynchronizer, TransportState};
