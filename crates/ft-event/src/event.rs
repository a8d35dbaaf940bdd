//! Sequencer event definitions and wire codec
//!
//! Events are ordered by `(timestamp asc, priority desc, sequence asc)`.
//! The binary encoding is a 1-byte tag followed by the payload fields,
//! all integers little-endian:
//!
//! ```text
//! 0x01 NoteOn      { u8 note, u8 velocity, u8 track, u64 sample_time }
//! 0x02 NoteOff     { u8 note, u8 track, u64 sample_time }
//! 0x03 ParamChange { u8 track, u16 key_id, f32 value, u64 sample_time }
//! 0x04 Transport   { u8 cmd (0=stop, 1=play, 2=pause), u64 sample_time }
//! 0x05 PatternChange { u8 pattern, u64 sample_time }
//! ```

use serde::{Deserialize, Serialize};

use ft_core::{EngineError, EngineResult, ParamKey};

// ═══════════════════════════════════════════════════════════════════════════════
// PRIORITY
// ═══════════════════════════════════════════════════════════════════════════════

/// Delivery priority; higher wins at equal timestamps
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(u8)]
pub enum EventPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAYLOADS
// ═══════════════════════════════════════════════════════════════════════════════

/// Transport commands carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransportCommand {
    Stop = 0,
    Play = 1,
    Pause = 2,
}

impl TransportCommand {
    fn try_from_u8(cmd: u8) -> EngineResult<Self> {
        match cmd {
            0 => Ok(Self::Stop),
            1 => Ok(Self::Play),
            2 => Ok(Self::Pause),
            other => Err(EngineError::MalformedEvent(format!(
                "transport command {other}"
            ))),
        }
    }
}

/// What the event does when dispatched
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    NoteOn { note: u8, velocity: u8, track: u8 },
    NoteOff { note: u8, track: u8 },
    ParamChange { track: u8, key: ParamKey, value: f32 },
    Transport(TransportCommand),
    PatternChange { pattern: u8 },
}

impl EventPayload {
    /// Priority assigned when the producer does not override it
    pub fn default_priority(&self) -> EventPriority {
        match self {
            Self::Transport(_) => EventPriority::Critical,
            Self::NoteOn { .. } | Self::NoteOff { .. } => EventPriority::High,
            Self::PatternChange { .. } => EventPriority::Normal,
            Self::ParamChange { .. } => EventPriority::Low,
        }
    }

    /// Track the event targets, if any
    pub fn track(&self) -> Option<u8> {
        match self {
            Self::NoteOn { track, .. }
            | Self::NoteOff { track, .. }
            | Self::ParamChange { track, .. } => Some(*track),
            Self::Transport(_) | Self::PatternChange { .. } => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRIORITIZED EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// A payload with its delivery coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrioritizedEvent {
    pub payload: EventPayload,
    pub priority: EventPriority,
    /// Absolute engine sample time at which the event fires
    pub timestamp: u64,
    /// Insertion sequence, assigned by the queue
    pub seq: u64,
}

impl PrioritizedEvent {
    pub fn new(payload: EventPayload, timestamp: u64) -> Self {
        Self {
            priority: payload.default_priority(),
            payload,
            timestamp,
            seq: 0,
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Scheduling order: timestamp asc, priority desc, sequence asc.
    /// "Less" means "delivered earlier".
    pub fn schedule_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(other.priority.cmp(&self.priority))
            .then(self.seq.cmp(&other.seq))
    }
}

impl Eq for PrioritizedEvent {}

impl Ord for PrioritizedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.schedule_cmp(other)
    }
}

impl PartialOrd for PrioritizedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WIRE CODEC
// ═══════════════════════════════════════════════════════════════════════════════

const TAG_NOTE_ON: u8 = 0x01;
const TAG_NOTE_OFF: u8 = 0x02;
const TAG_PARAM_CHANGE: u8 = 0x03;
const TAG_TRANSPORT: u8 = 0x04;
const TAG_PATTERN_CHANGE: u8 = 0x05;

impl EventPayload {
    /// Append the wire form of `(payload, sample_time)` to `out`
    pub fn encode(&self, sample_time: u64, out: &mut Vec<u8>) {
        match *self {
            Self::NoteOn {
                note,
                velocity,
                track,
            } => {
                out.push(TAG_NOTE_ON);
                out.push(note);
                out.push(velocity);
                out.push(track);
            }
            Self::NoteOff { note, track } => {
                out.push(TAG_NOTE_OFF);
                out.push(note);
                out.push(track);
            }
            Self::ParamChange { track, key, value } => {
                out.push(TAG_PARAM_CHANGE);
                out.push(track);
                out.extend_from_slice(&key.0.to_le_bytes());
                out.extend_from_slice(&value.to_le_bytes());
            }
            Self::Transport(cmd) => {
                out.push(TAG_TRANSPORT);
                out.push(cmd as u8);
            }
            Self::PatternChange { pattern } => {
                out.push(TAG_PATTERN_CHANGE);
                out.push(pattern);
            }
        }
        out.extend_from_slice(&sample_time.to_le_bytes());
    }

    /// Decode one event; returns the payload, its sample time, and the
    /// number of bytes consumed
    pub fn decode(bytes: &[u8]) -> EngineResult<(Self, u64, usize)> {
        let tag = *bytes
            .first()
            .ok_or_else(|| EngineError::MalformedEvent("empty buffer".into()))?;

        let (payload, body_len) = match tag {
            TAG_NOTE_ON => {
                require(bytes, 1 + 3 + 8)?;
                (
                    Self::NoteOn {
                        note: bytes[1],
                        velocity: bytes[2],
                        track: bytes[3],
                    },
                    3,
                )
            }
            TAG_NOTE_OFF => {
                require(bytes, 1 + 2 + 8)?;
                (
                    Self::NoteOff {
                        note: bytes[1],
                        track: bytes[2],
                    },
                    2,
                )
            }
            TAG_PARAM_CHANGE => {
                require(bytes, 1 + 7 + 8)?;
                let key = u16::from_le_bytes([bytes[2], bytes[3]]);
                let value = f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
                (
                    Self::ParamChange {
                        track: bytes[1],
                        key: ParamKey(key),
                        value,
                    },
                    7,
                )
            }
            TAG_TRANSPORT => {
                require(bytes, 1 + 1 + 8)?;
                (Self::Transport(TransportCommand::try_from_u8(bytes[1])?), 1)
            }
            TAG_PATTERN_CHANGE => {
                require(bytes, 1 + 1 + 8)?;
                (Self::PatternChange { pattern: bytes[1] }, 1)
            }
            other => {
                return Err(EngineError::MalformedEvent(format!("unknown tag {other:#04x}")));
            }
        };

        let ts_start = 1 + body_len;
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&bytes[ts_start..ts_start + 8]);
        Ok((payload, u64::from_le_bytes(ts_bytes), ts_start + 8))
    }
}

fn require(bytes: &[u8], len: usize) -> EngineResult<()> {
    if bytes.len() < len {
        return Err(EngineError::MalformedEvent(format!(
            "truncated event: {} of {} bytes",
            bytes.len(),
            len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_layout_note_on() {
        let mut out = Vec::new();
        EventPayload::NoteOn {
            note: 60,
            velocity: 100,
            track: 2,
        }
        .encode(0x0102030405060708, &mut out);

        assert_eq!(out[0], 0x01);
        assert_eq!(out[1], 60);
        assert_eq!(out[2], 100);
        assert_eq!(out[3], 2);
        assert_eq!(out.len(), 12);
        assert_eq!(&out[4..], &0x0102030405060708u64.to_le_bytes());
    }

    #[test]
    fn decode_matches_encode() {
        let payloads = [
            EventPayload::NoteOn {
                note: 64,
                velocity: 127,
                track: 0,
            },
            EventPayload::NoteOff { note: 64, track: 0 },
            EventPayload::ParamChange {
                track: 3,
                key: ParamKey(0x2001),
                value: 0.75,
            },
            EventPayload::Transport(TransportCommand::Play),
            EventPayload::PatternChange { pattern: 7 },
        ];

        for payload in payloads {
            let mut out = Vec::new();
            payload.encode(123_456, &mut out);
            let (decoded, ts, consumed) = EventPayload::decode(&out).unwrap();
            assert_eq!(decoded, payload);
            assert_eq!(ts, 123_456);
            assert_eq!(consumed, out.len());
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(EventPayload::decode(&[]).is_err());
        assert!(EventPayload::decode(&[0xff, 0, 0]).is_err());
        // Truncated NoteOn
        assert!(EventPayload::decode(&[0x01, 60, 100]).is_err());
        // Bad transport command
        let mut out = Vec::new();
        EventPayload::Transport(TransportCommand::Stop).encode(0, &mut out);
        out[1] = 9;
        assert!(EventPayload::decode(&out).is_err());
    }

    #[test]
    fn schedule_order() {
        let early_low = PrioritizedEvent {
            payload: EventPayload::PatternChange { pattern: 0 },
            priority: EventPriority::Low,
            timestamp: 100,
            seq: 0,
        };
        let late_critical = PrioritizedEvent {
            payload: EventPayload::Transport(TransportCommand::Stop),
            priority: EventPriority::Critical,
            timestamp: 200,
            seq: 1,
        };
        // Timestamp dominates priority
        assert!(early_low < late_critical);

        // Same timestamp: priority descending
        let t_low = PrioritizedEvent {
            priority: EventPriority::Low,
            ..early_low
        };
        let t_high = PrioritizedEvent {
            priority: EventPriority::High,
            seq: 5,
            ..early_low
        };
        assert!(t_high < t_low);

        // Same timestamp and priority: insertion order
        let first = PrioritizedEvent { seq: 1, ..t_low };
        let second = PrioritizedEvent { seq: 2, ..t_low };
        assert!(first < second);
    }

    #[test]
    fn default_priorities() {
        assert_eq!(
            EventPayload::Transport(TransportCommand::Play).default_priority(),
            EventPriority::Critical
        );
        assert_eq!(
            EventPayload::NoteOn {
                note: 0,
                velocity: 0,
                track: 0
            }
            .default_priority(),
            EventPriority::High
        );
        assert_eq!(
            EventPayload::ParamChange {
                track: 0,
                key: ParamKey(0),
                value: 0.0
            }
            .default_priority(),
            EventPriority::Low
        );
    }
}
