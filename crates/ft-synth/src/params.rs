//! FM TONE parameter table
//!
//! Stable parameter identities for the FM machine: a numeric key for
//! wire dispatch, a string id for persistence, and a [`ParamSpec`] for
//! normalized ↔ native scaling.
//!
//! Key layout: `(block << 8) | field`, block 0 = global, blocks 1..=4 =
//! operators A, B1, B2, C.

use ft_core::{ParamKey, ParamSpec};

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

pub const ALGORITHM: ParamKey = ParamKey(0x0000);
pub const MASTER_LEVEL: ParamKey = ParamKey(0x0001);
pub const PHASE_RESET: ParamKey = ParamKey(0x0002);

// ═══════════════════════════════════════════════════════════════════════════════
// PER-OPERATOR FIELDS
// ═══════════════════════════════════════════════════════════════════════════════

pub const FIELD_RATIO: u8 = 0;
pub const FIELD_DETUNE: u8 = 1;
pub const FIELD_LEVEL: u8 = 2;
pub const FIELD_MOD_INDEX: u8 = 3;
pub const FIELD_FEEDBACK: u8 = 4;
pub const FIELD_ENV_ATTACK: u8 = 5;
pub const FIELD_ENV_DECAY: u8 = 6;
pub const FIELD_ENV_END: u8 = 7;
pub const FIELD_ENV_RELEASE: u8 = 8;
pub const FIELD_KEY_TRACKING: u8 = 9;

const FIELD_COUNT: u8 = 10;

/// Key for an operator field; `op` is 0..=3 (A, B1, B2, C)
pub const fn op_key(op: usize, field: u8) -> ParamKey {
    ParamKey(((op as u16 + 1) << 8) | field as u16)
}

/// Inverse of [`op_key`]
pub fn split_key(key: ParamKey) -> Option<(usize, u8)> {
    let block = (key.0 >> 8) as usize;
    let field = (key.0 & 0xff) as u8;
    if (1..=4).contains(&block) && field < FIELD_COUNT {
        Some((block - 1, field))
    } else {
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SPECS AND STRING IDS
// ═══════════════════════════════════════════════════════════════════════════════

static SPEC_ALGORITHM: ParamSpec = ParamSpec::discrete(1.0, 8.0, 1.0, 8, "");
static SPEC_MASTER_LEVEL: ParamSpec = ParamSpec::linear(0.0, 1.0, 0.8, "");
static SPEC_PHASE_RESET: ParamSpec = ParamSpec::discrete(0.0, 1.0, 1.0, 2, "");

static SPEC_RATIO: ParamSpec = ParamSpec::exponential(0.25, 16.0, 1.0, 2.0, "x");
static SPEC_DETUNE: ParamSpec = ParamSpec::linear(-50.0, 50.0, 0.0, "ct");
static SPEC_LEVEL: ParamSpec = ParamSpec::linear(0.0, 1.0, 1.0, "");
static SPEC_MOD_INDEX: ParamSpec = ParamSpec::exponential(0.0, 10.0, 0.0, 2.0, "");
static SPEC_FEEDBACK: ParamSpec = ParamSpec::linear(0.0, 1.0, 0.0, "");
static SPEC_ENV_ATTACK: ParamSpec = ParamSpec::exponential(0.0, 2.0, 0.001, 3.0, "s");
static SPEC_ENV_DECAY: ParamSpec = ParamSpec::exponential(0.0, 4.0, 0.1, 3.0, "s");
static SPEC_ENV_END: ParamSpec = ParamSpec::linear(0.0, 1.0, 0.8, "");
static SPEC_ENV_RELEASE: ParamSpec = ParamSpec::exponential(0.0, 4.0, 0.15, 3.0, "s");
static SPEC_KEY_TRACKING: ParamSpec = ParamSpec::linear(0.0, 1.0, 0.0, "");

const OP_NAMES: [&str; 4] = ["opA", "opB1", "opB2", "opC"];
const FIELD_NAMES: [&str; FIELD_COUNT as usize] = [
    "ratio",
    "detune",
    "level",
    "mod_index",
    "feedback",
    "env_attack",
    "env_decay",
    "env_end",
    "env_release",
    "key_tracking",
];

/// Spec for any FM machine key
pub fn spec(key: ParamKey) -> Option<&'static ParamSpec> {
    match key {
        ALGORITHM => Some(&SPEC_ALGORITHM),
        MASTER_LEVEL => Some(&SPEC_MASTER_LEVEL),
        PHASE_RESET => Some(&SPEC_PHASE_RESET),
        other => split_key(other).map(|(_, field)| match field {
            FIELD_RATIO => &SPEC_RATIO,
            FIELD_DETUNE => &SPEC_DETUNE,
            FIELD_LEVEL => &SPEC_LEVEL,
            FIELD_MOD_INDEX => &SPEC_MOD_INDEX,
            FIELD_FEEDBACK => &SPEC_FEEDBACK,
            FIELD_ENV_ATTACK => &SPEC_ENV_ATTACK,
            FIELD_ENV_DECAY => &SPEC_ENV_DECAY,
            FIELD_ENV_END => &SPEC_ENV_END,
            FIELD_ENV_RELEASE => &SPEC_ENV_RELEASE,
            _ => &SPEC_KEY_TRACKING,
        }),
    }
}

/// Stable string id, e.g. `"opA_ratio"`, used for persistence keys
pub fn id(key: ParamKey) -> Option<String> {
    match key {
        ALGORITHM => Some("algorithm".to_string()),
        MASTER_LEVEL => Some("master_level".to_string()),
        PHASE_RESET => Some("phase_reset".to_string()),
        other => split_key(other)
            .map(|(op, field)| format!("{}_{}", OP_NAMES[op], FIELD_NAMES[field as usize])),
    }
}

/// Look a key up by its string id
pub fn lookup(name: &str) -> Option<ParamKey> {
    match name {
        "algorithm" => return Some(ALGORITHM),
        "master_level" => return Some(MASTER_LEVEL),
        "phase_reset" => return Some(PHASE_RESET),
        _ => {}
    }
    let (op_name, field_name) = name.split_once('_')?;
    let op = OP_NAMES.iter().position(|&n| n == op_name)?;
    // Field names themselves contain underscores, so match the suffix
    let field = FIELD_NAMES.iter().position(|&n| n == field_name)?;
    Some(op_key(op, field as u8))
}

/// Every key the FM machine understands
pub fn all_keys() -> impl Iterator<Item = ParamKey> {
    [ALGORITHM, MASTER_LEVEL, PHASE_RESET].into_iter().chain(
        (0..4usize).flat_map(|op| (0..FIELD_COUNT).map(move |field| op_key(op, field))),
    )
}
