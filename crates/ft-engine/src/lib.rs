//! ft-engine: The Ferrotone audio engine façade
//!
//! Ties the workspace together: the engine lifecycle state machine and
//! real-time process cycle, the sequencer bridge dispatching events to
//! voice machines, the parameter bridge (UI scaling + persistence),
//! error recovery, metrics, and preset storage.

pub mod engine;
pub mod machine_node;
pub mod bridge;
pub mod param_bridge;
pub mod recovery;
pub mod metrics;
pub mod preset;

pub use engine::{AudioEngine, EngineHandle, EngineState};
pub use machine_node::{MachineAction, MachineNode};
pub use bridge::{DispatchStats, SequencerBridge};
pub use param_bridge::{ParameterBridge, PersistenceHandle, PersistenceWorker, SAVE_COALESCE_WINDOW};
pub use recovery::{ErrorRecovery, RecoveryConfig, RecoveryStats, RecoveryStrategy};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use preset::{KeyValueStore, MemoryStore, PresetBlob, load_preset, preset_key};
