//! Preset persistence
//!
//! Presets are flat `param_id → f32` maps. Two representations:
//!
//! - an opaque key-value store (`preset:<uuid>:<param_id>` → f32), the
//!   contract external persistence backends implement;
//! - a self-contained binary blob: 4-byte magic, u16 version, u32
//!   entry count, then `(u16 id_len, id bytes, f32 value)` entries,
//!   integers little-endian.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use ft_core::{EngineError, EngineResult};

/// Blob magic: "FTPR"
pub const PRESET_MAGIC: [u8; 4] = *b"FTPR";
pub const PRESET_VERSION: u16 = 1;

/// KV key for one parameter of one preset
pub fn preset_key(preset: &Uuid, param_id: &str) -> String {
    format!("preset:{preset}:{param_id}")
}

/// Opaque key-value persistence contract
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &str, value: f32);
    fn get(&self, key: &str) -> Option<f32>;
    /// All `(key, value)` pairs under a key prefix
    fn scan_prefix(&self, prefix: &str) -> Vec<(String, f32)>;
}

/// In-memory store for tests and standalone use
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, f32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&self, key: &str, value: f32) {
        self.map.lock().insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<f32> {
        self.map.lock().get(key).copied()
    }

    fn scan_prefix(&self, prefix: &str) -> Vec<(String, f32)> {
        self.map
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, &v)| (k.clone(), v))
            .collect()
    }
}

/// Load every parameter of a preset from a store
pub fn load_preset(store: &dyn KeyValueStore, preset: &Uuid) -> Vec<(String, f32)> {
    let prefix = format!("preset:{preset}:");
    store
        .scan_prefix(&prefix)
        .into_iter()
        .map(|(k, v)| (k[prefix.len()..].to_string(), v))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOB CODEC
// ═══════════════════════════════════════════════════════════════════════════════

/// A preset as an ordered list of `(param_id, value)` entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresetBlob {
    pub entries: Vec<(String, f32)>,
}

impl PresetBlob {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.entries.len() * 12);
        out.extend_from_slice(&PRESET_MAGIC);
        out.extend_from_slice(&PRESET_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (id, value) in &self.entries {
            out.extend_from_slice(&(id.len() as u16).to_le_bytes());
            out.extend_from_slice(id.as_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.len() < 10 {
            return Err(EngineError::MalformedPreset("blob too short".into()));
        }
        if bytes[..4] != PRESET_MAGIC {
            return Err(EngineError::MalformedPreset("bad magic".into()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != PRESET_VERSION {
            return Err(EngineError::MalformedPreset(format!(
                "unsupported version {version}"
            )));
        }
        let count = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;

        let mut entries = Vec::with_capacity(count);
        let mut at = 10;
        for _ in 0..count {
            if bytes.len() < at + 2 {
                return Err(EngineError::MalformedPreset("truncated entry header".into()));
            }
            let id_len = u16::from_le_bytes([bytes[at], bytes[at + 1]]) as usize;
            at += 2;
            if bytes.len() < at + id_len + 4 {
                return Err(EngineError::MalformedPreset("truncated entry body".into()));
            }
            let id = std::str::from_utf8(&bytes[at..at + id_len])
                .map_err(|_| EngineError::MalformedPreset("param id not UTF-8".into()))?
                .to_string();
            at += id_len;
            let mut value_bytes = [0u8; 4];
            value_bytes.copy_from_slice(&bytes[at..at + 4]);
            at += 4;
            entries.push((id, f32::from_le_bytes(value_bytes)));
        }

        Ok(Self { entries })
    }

    /// Store every entry under a preset id
    pub fn save_to(&self, store: &dyn KeyValueStore, preset: &Uuid) {
        for (id, value) in &self.entries {
            store.put(&preset_key(preset, id), *value);
        }
    }
}
