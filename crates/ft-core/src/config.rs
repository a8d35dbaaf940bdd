//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::format::SampleRate;

/// Engine configuration, negotiated once at `initialize`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Host buffer size in frames (power of two, 64..=8192)
    pub buffer_size: u32,
    /// Output channel count (1 or 2)
    pub channel_count: u8,
    /// Collect per-cycle timing statistics
    pub enable_performance_monitoring: bool,
    /// Route component errors through the recovery manager
    pub enable_error_recovery: bool,
    /// Reject non-realtime-safe nodes at graph insertion
    pub enable_lock_free_operations: bool,
    /// Maximum nodes the audio graph accepts
    pub max_graph_nodes: u32,
    /// Maximum connections the routing matrix accepts
    pub max_routing_connections: u32,
    /// Buffers pre-allocated in the pool
    pub buffer_pool_size: u32,
    /// SPSC transport ring capacity in frames
    pub circular_buffer_capacity: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            buffer_size: 512,
            channel_count: 2,
            enable_performance_monitoring: true,
            enable_error_recovery: true,
            enable_lock_free_operations: true,
            max_graph_nodes: 64,
            max_routing_connections: 128,
            buffer_pool_size: 64,
            circular_buffer_capacity: 4096,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        SampleRate::try_from_u32(self.sample_rate)?;

        if !self.buffer_size.is_power_of_two()
            || !(64..=8192).contains(&self.buffer_size)
        {
            return Err(EngineError::InvalidConfig(format!(
                "buffer size {} (must be a power of two in 64..=8192)",
                self.buffer_size
            )));
        }

        if !(self.channel_count == 1 || self.channel_count == 2) {
            return Err(EngineError::InvalidConfig(format!(
                "channel count {} (must be 1 or 2)",
                self.channel_count
            )));
        }

        if self.max_graph_nodes == 0 {
            return Err(EngineError::InvalidConfig("max_graph_nodes is 0".into()));
        }
        if self.max_routing_connections == 0 {
            return Err(EngineError::InvalidConfig(
                "max_routing_connections is 0".into(),
            ));
        }
        if self.buffer_pool_size == 0 {
            return Err(EngineError::InvalidConfig("buffer_pool_size is 0".into()));
        }
        if self.circular_buffer_capacity < self.buffer_size {
            return Err(EngineError::InvalidConfig(format!(
                "circular_buffer_capacity {} smaller than buffer size {}",
                self.circular_buffer_capacity, self.buffer_size
            )));
        }

        Ok(())
    }
}
