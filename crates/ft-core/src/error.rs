//! Engine-wide error taxonomy
//!
//! Every fallible operation across the workspace returns `EngineResult`.
//! Each error maps to a class (what subsystem failed) and a severity
//! (how the recovery manager should react). The audio path never
//! unwinds; errors cross the host boundary as status codes only.

use thiserror::Error;

/// How bad an error is, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Warning,
    Minor,
    Major,
    Critical,
}

/// Which subsystem an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Initialization,
    Format,
    RealtimeSafety,
    Graph,
    Performance,
    Resource,
    Hardware,
    Conversion,
}

/// Core error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    // ── Initialization ──────────────────────────────────────────────
    #[error("engine start failed: {0}")]
    EngineStartFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("engine is in state {0}, operation requires {1}")]
    InvalidState(&'static str, &'static str),

    // ── Format ──────────────────────────────────────────────────────
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("format mismatch: expected {expected}, got {actual}")]
    FormatMismatch { expected: String, actual: String },

    // ── Realtime safety ─────────────────────────────────────────────
    #[error("non-realtime-safe operation rejected: {0}")]
    NonRealtimeSafe(String),

    // ── Graph ───────────────────────────────────────────────────────
    #[error("cycle detected through node {0}")]
    GraphCycle(u32),

    #[error("node {0} not present in graph")]
    DanglingNode(u32),

    #[error("port {port} out of range on node {node}")]
    PortOutOfRange { node: u32, port: u32 },

    #[error("input {port} on node {node} already connected")]
    InputOccupied { node: u32, port: u32 },

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("graph is full ({0} nodes)")]
    GraphFull(u32),

    // ── Performance ─────────────────────────────────────────────────
    #[error("processing deadline missed ({elapsed_us} µs elapsed)")]
    DeadlineMiss { elapsed_us: u64 },

    #[error("buffer underrun")]
    BufferUnderrun,

    // ── Resource ────────────────────────────────────────────────────
    #[error("buffer pool exhausted")]
    PoolExhausted,

    #[error("event queue overflow")]
    EventQueueOverflow,

    #[error("routing matrix is full ({0} connections)")]
    RoutingFull(u32),

    // ── Hardware ────────────────────────────────────────────────────
    #[error("audio device lost: {0}")]
    DeviceLost(String),

    // ── Conversion ──────────────────────────────────────────────────
    #[error("converter construction failed: {0}")]
    ConversionFailed(String),

    #[error("format conversion timed out after {0} ms")]
    ConversionTimeout(u64),

    // ── Wire / persistence ──────────────────────────────────────────
    #[error("malformed event payload: {0}")]
    MalformedEvent(String),

    #[error("malformed preset blob: {0}")]
    MalformedPreset(String),
}

impl EngineError {
    /// Subsystem classification, used by the recovery manager
    pub fn class(&self) -> ErrorClass {
        use EngineError::*;
        match self {
            EngineStartFailed(_) | InvalidConfig(_) | InvalidState(..) => {
                ErrorClass::Initialization
            }
            UnsupportedFormat(_) | FormatMismatch { .. } => ErrorClass::Format,
            NonRealtimeSafe(_) => ErrorClass::RealtimeSafety,
            GraphCycle(_) | DanglingNode(_) | PortOutOfRange { .. } | InputOccupied { .. }
            | InvalidTopology(_) | GraphFull(_) => ErrorClass::Graph,
            DeadlineMiss { .. } | BufferUnderrun => ErrorClass::Performance,
            PoolExhausted | EventQueueOverflow | RoutingFull(_) => ErrorClass::Resource,
            DeviceLost(_) => ErrorClass::Hardware,
            ConversionFailed(_) | ConversionTimeout(_) => ErrorClass::Conversion,
            MalformedEvent(_) | MalformedPreset(_) => ErrorClass::Format,
        }
    }

    /// Severity drives the recovery strategy selection
    pub fn severity(&self) -> ErrorSeverity {
        match self.class() {
            ErrorClass::Initialization | ErrorClass::Hardware => ErrorSeverity::Critical,
            ErrorClass::Format
            | ErrorClass::RealtimeSafety
            | ErrorClass::Graph
            | ErrorClass::Conversion => ErrorSeverity::Major,
            ErrorClass::Performance => ErrorSeverity::Warning,
            ErrorClass::Resource => ErrorSeverity::Minor,
        }
    }
}

/// Result alias used across the workspace
pub type EngineResult<T> = Result<T, EngineError>;
