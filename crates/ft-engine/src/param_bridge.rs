//! Parameter bridge: UI-normalized ↔ native scaling plus persistence
//!
//! The UI talks in normalized 0..1 values. `update` scales through the
//! machine's spec table, posts the change onto the audio event path
//! (smoother targets pick it up next cycle), and fires a non-blocking
//! persistence save. Saves coalesce to at most one write per
//! `(preset, param)` per 100 ms with the trailing value winning. The
//! bridge works with no persistence backend attached.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use uuid::Uuid;

use ft_core::{EngineError, EngineResult, ParamKey, ParamSpec};
use ft_event::{EventPayload, EventSender};

use crate::preset::{KeyValueStore, preset_key};

/// Coalescing window for repeated saves of one parameter
pub const SAVE_COALESCE_WINDOW: Duration = Duration::from_millis(100);

/// Worker mailbox depth; saves drop (with a warning) past this
const SAVE_MAILBOX_DEPTH: usize = 1024;

// ═══════════════════════════════════════════════════════════════════════════════
// PERSISTENCE WORKER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct SaveRequest {
    preset: Uuid,
    param_id: String,
    value: f32,
}

/// Fire-and-forget save handle
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: Sender<SaveRequest>,
}

impl PersistenceHandle {
    fn save(&self, preset: Uuid, param_id: String, value: f32) {
        if self
            .tx
            .try_send(SaveRequest {
                preset,
                param_id,
                value,
            })
            .is_err()
        {
            log::warn!("persistence mailbox full, dropping save");
        }
    }
}

/// Background worker applying the coalescing policy before the store
pub struct PersistenceWorker {
    handle: Option<thread::JoinHandle<()>>,
    tx: Option<Sender<SaveRequest>>,
}

impl PersistenceWorker {
    pub fn spawn(store: Arc<dyn KeyValueStore>) -> (Self, PersistenceHandle) {
        let (tx, rx) = bounded::<SaveRequest>(SAVE_MAILBOX_DEPTH);
        let handle = thread::Builder::new()
            .name("ft-persistence".into())
            .spawn(move || Self::run(store, rx))
            .ok();
        (
            Self {
                handle,
                tx: Some(tx.clone()),
            },
            PersistenceHandle { tx },
        )
    }

    fn run(store: Arc<dyn KeyValueStore>, rx: Receiver<SaveRequest>) {
        let mut last_flush: HashMap<(Uuid, String), Instant> = HashMap::new();
        let mut pending: HashMap<(Uuid, String), f32> = HashMap::new();

        loop {
            match rx.recv_timeout(SAVE_COALESCE_WINDOW / 4) {
                Ok(req) => {
                    let key = (req.preset, req.param_id);
                    let now = Instant::now();
                    let due = last_flush
                        .get(&key)
                        .is_none_or(|&at| now.duration_since(at) >= SAVE_COALESCE_WINDOW);
                    if due {
                        store.put(&preset_key(&key.0, &key.1), req.value);
                        last_flush.insert(key, now);
                    } else {
                        // Trailing value wins when the window reopens
                        pending.insert(key, req.value);
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            pending.retain(|key, value| {
                let due = last_flush
                    .get(key)
                    .is_none_or(|&at| now.duration_since(at) >= SAVE_COALESCE_WINDOW);
                if due {
                    store.put(&preset_key(&key.0, &key.1), *value);
                    last_flush.insert(key.clone(), now);
                    false
                } else {
                    true
                }
            });
        }

        // Final flush on shutdown so trailing values persist
        for (key, value) in pending {
            store.put(&preset_key(&key.0, &key.1), value);
        }
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARAMETER BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

struct ParamEntry {
    spec: &'static ParamSpec,
    id: String,
}

/// Scaling and dispatch for one machine's parameters
pub struct ParameterBridge {
    track: u8,
    entries: HashMap<ParamKey, ParamEntry>,
    by_id: HashMap<String, ParamKey>,
    events: EventSender,
    persistence: Option<PersistenceHandle>,
    preset: Uuid,
}

impl ParameterBridge {
    pub fn new(track: u8, events: EventSender) -> Self {
        Self {
            track,
            entries: HashMap::new(),
            by_id: HashMap::new(),
            events,
            persistence: None,
            preset: Uuid::new_v4(),
        }
    }

    /// Bridge pre-registered with the FM TONE parameter table
    pub fn for_fm_machine(track: u8, events: EventSender) -> Self {
        let mut bridge = Self::new(track, events);
        for key in ft_synth::params::all_keys() {
            if let (Some(spec), Some(id)) =
                (ft_synth::params::spec(key), ft_synth::params::id(key))
            {
                bridge.register(key, id, spec);
            }
        }
        bridge
    }

    pub fn register(&mut self, key: ParamKey, id: String, spec: &'static ParamSpec) {
        self.by_id.insert(id.clone(), key);
        self.entries.insert(key, ParamEntry { spec, id });
    }

    pub fn attach_persistence(&mut self, handle: PersistenceHandle) {
        self.persistence = Some(handle);
    }

    pub fn set_preset(&mut self, preset: Uuid) {
        self.preset = preset;
    }

    pub fn preset(&self) -> Uuid {
        self.preset
    }

    pub fn key_for(&self, id: &str) -> Option<ParamKey> {
        self.by_id.get(id).copied()
    }

    fn entry(&self, key: ParamKey) -> EngineResult<&ParamEntry> {
        self.entries.get(&key).ok_or_else(|| {
            EngineError::InvalidConfig(format!("unknown parameter key {:#06x}", key.0))
        })
    }

    /// Normalized 0..1 → native units
    pub fn scale(&self, key: ParamKey, normalized: f32) -> EngineResult<f32> {
        Ok(self.entry(key)?.spec.scale(normalized))
    }

    /// Native units → normalized 0..1
    pub fn normalize(&self, key: ParamKey, native: f32) -> EngineResult<f32> {
        Ok(self.entry(key)?.spec.normalize(native))
    }

    /// Apply one normalized change: post to the audio path and schedule
    /// a persistence save. Never blocks.
    pub fn update(&self, key: ParamKey, normalized: f32) -> EngineResult<()> {
        let entry = self.entry(key)?;
        let normalized = normalized.clamp(0.0, 1.0);

        self.events.send(
            EventPayload::ParamChange {
                track: self.track,
                key,
                value: normalized,
            },
            0,
        );

        if let Some(persistence) = &self.persistence {
            // Native values persist; they stay meaningful across UI
            // curve changes
            persistence.save(self.preset, entry.id.clone(), entry.spec.scale(normalized));
        }
        Ok(())
    }

    /// Batched update: scale and post everything, one pass
    pub fn update_many(&self, changes: &[(ParamKey, f32)]) -> EngineResult<()> {
        for &(key, normalized) in changes {
            self.update(key, normalized)?;
        }
        Ok(())
    }

    /// Push a stored preset through the normal update path
    pub fn apply_preset(&self, entries: &[(String, f32)]) -> usize {
        let mut applied = 0;
        for (id, native) in entries {
            if let Some(key) = self.key_for(id) {
                if let Ok(normalized) = self.normalize(key, *native) {
                    if self.update(key, normalized).is_ok() {
                        applied += 1;
                    }
                }
            }
        }
        applied
    }
}
