//! Audio format descriptions
//!
//! A format is the `(sample rate, channel count, bit depth)` triple
//! negotiated with the host and assigned to every graph connection.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Sample rates the engine accepts from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz44100 = 44100,
    Hz48000 = 48000,
    Hz88200 = 88200,
    Hz96000 = 96000,
}

impl SampleRate {
    pub const ALL: [Self; 4] = [
        Self::Hz44100,
        Self::Hz48000,
        Self::Hz88200,
        Self::Hz96000,
    ];

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    #[inline]
    pub fn as_f64(self) -> f64 {
        self as u32 as f64
    }

    pub fn try_from_u32(rate: u32) -> EngineResult<Self> {
        match rate {
            44100 => Ok(Self::Hz44100),
            48000 => Ok(Self::Hz48000),
            88200 => Ok(Self::Hz88200),
            96000 => Ok(Self::Hz96000),
            other => Err(EngineError::UnsupportedFormat(format!(
                "sample rate {other} Hz"
            ))),
        }
    }
}

/// Bit depths the format converter understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BitDepth {
    Int16 = 16,
    Int24 = 24,
    Float32 = 32,
}

impl BitDepth {
    pub fn try_from_bits(bits: u8) -> EngineResult<Self> {
        match bits {
            16 => Ok(Self::Int16),
            24 => Ok(Self::Int24),
            32 => Ok(Self::Float32),
            other => Err(EngineError::UnsupportedFormat(format!("{other}-bit depth"))),
        }
    }
}

/// Channel counts a buffer may carry
pub const SUPPORTED_CHANNEL_COUNTS: [u16; 5] = [1, 2, 4, 6, 8];

/// Full audio format triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: BitDepth,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, bit_depth: BitDepth) -> Self {
        Self {
            sample_rate,
            channels,
            bit_depth,
        }
    }

    /// Engine-native format at the given rate and channel count
    pub fn native(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, channels, BitDepth::Float32)
    }

    pub fn validate(&self) -> EngineResult<()> {
        SampleRate::try_from_u32(self.sample_rate)?;
        if !SUPPORTED_CHANNEL_COUNTS.contains(&self.channels) {
            return Err(EngineError::UnsupportedFormat(format!(
                "{} channels",
                self.channels
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz / {} ch / {:?}",
            self.sample_rate, self.channels, self.bit_depth
        )
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::native(44100, 2)
    }
}
