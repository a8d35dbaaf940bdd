//! ft-audio: Real-time audio infrastructure for Ferrotone
//!
//! Buffer pool, SPSC transport ring, the audio node graph with
//! topological scheduling, and the routing matrix with sequence-guarded
//! snapshot publication. Everything reachable from the audio callback
//! is wait-free or bounded-retry lock-free.

pub mod ringbuf;
pub mod pool;
pub mod node;
pub mod graph;
pub mod routing;

pub use ringbuf::SpscRingBuffer;
pub use pool::{AudioBuffer, BufferPool, PooledBuffer};
pub use node::{
    AudioNode, GainNode, MixerNode, NodeId, NodeKind, OutputNode, PassthroughNode, ProcessContext,
};
pub use graph::AudioGraph;
pub use routing::{RoutingChange, RoutingConnection, RoutingMatrix, RoutingReader, RoutingSnapshot};
