//! Audio graph nodes

use std::any::Any;

use ft_core::{AudioFormat, EngineResult, Sample};
use ft_dsp::LinearSmoother;
use serde::Serialize;

/// Unique node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

/// Node role in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    Source,
    Processor,
    Mixer,
    Output,
}

/// Per-cycle processing context
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    pub sample_rate: u32,
    pub frames: usize,
    /// Engine sample time at the start of the buffer
    pub sample_time: u64,
}

/// A processing unit in the audio graph
///
/// Buffers are interleaved at the node's assigned format. `process`
/// receives the summed input bus and writes the output bus; it must not
/// allocate, lock, or block when `is_realtime_safe` reports true.
pub trait AudioNode: Send {
    fn kind(&self) -> NodeKind;

    /// Input port count (0 for pure sources)
    fn max_inputs(&self) -> usize;

    /// Output port count (0 for sinks)
    fn max_outputs(&self) -> usize;

    /// Whether `process` is safe on the real-time thread
    fn is_realtime_safe(&self) -> bool {
        true
    }

    /// Called once before the node joins the schedule
    fn prepare(&mut self, format: AudioFormat, max_frames: usize) -> EngineResult<()>;

    fn process(&mut self, input: &[Sample], output: &mut [Sample], ctx: &ProcessContext);

    /// Drop internal state (tails, phases)
    fn reset(&mut self) {}

    /// Downcast to the concrete node type
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ═══════════════════════════════════════════════════════════════════════════════
// BASIC NODES
// ═══════════════════════════════════════════════════════════════════════════════

/// Copies input to output unchanged
pub struct PassthroughNode;

impl AudioNode for PassthroughNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Processor
    }

    fn max_inputs(&self) -> usize {
        1
    }

    fn max_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, _format: AudioFormat, _max_frames: usize) -> EngineResult<()> {
        Ok(())
    }

    fn process(&mut self, input: &[Sample], output: &mut [Sample], _ctx: &ProcessContext) {
        let len = input.len().min(output.len());
        output[..len].copy_from_slice(&input[..len]);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Smoothed gain stage
pub struct GainNode {
    gain: LinearSmoother,
}

impl GainNode {
    /// Ramps are timed against `sample_rate`; `prepare` re-reads the
    /// rate from the assigned format if the graph runs at another one
    pub fn new(sample_rate: f32, initial_gain: f32) -> Self {
        Self {
            gain: LinearSmoother::new(sample_rate, initial_gain),
        }
    }

    pub fn set_gain(&mut self, gain: f32, smoothing_secs: f32) {
        self.gain.set_target(gain, smoothing_secs);
    }
}

impl AudioNode for GainNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Processor
    }

    fn max_inputs(&self) -> usize {
        1
    }

    fn max_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, format: AudioFormat, _max_frames: usize) -> EngineResult<()> {
        self.gain.set_sample_rate(format.sample_rate as f32);
        Ok(())
    }

    fn process(&mut self, input: &[Sample], output: &mut [Sample], ctx: &ProcessContext) {
        let channels = input.len() / ctx.frames.max(1);
        let len = input.len().min(output.len());
        // One smoother step per frame, applied across the frame's channels
        for frame in 0..len / channels.max(1) {
            let g = self.gain.next_sample();
            for ch in 0..channels {
                let i = frame * channels + ch;
                output[i] = input[i] * g;
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Sums its (pre-summed) input bus into the output with a master gain
pub struct MixerNode {
    master_gain: f32,
}

impl MixerNode {
    pub fn new(master_gain: f32) -> Self {
        Self { master_gain }
    }
}

impl AudioNode for MixerNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Mixer
    }

    fn max_inputs(&self) -> usize {
        16
    }

    fn max_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, _format: AudioFormat, _max_frames: usize) -> EngineResult<()> {
        Ok(())
    }

    fn process(&mut self, input: &[Sample], output: &mut [Sample], _ctx: &ProcessContext) {
        let len = input.len().min(output.len());
        output[..len].copy_from_slice(&input[..len]);
        ft_dsp::apply_gain(&mut output[..len], self.master_gain);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Terminal node; the engine reads the final mix from its buffer
pub struct OutputNode;

impl AudioNode for OutputNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Output
    }

    fn max_inputs(&self) -> usize {
        1
    }

    fn max_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, _format: AudioFormat, _max_frames: usize) -> EngineResult<()> {
        Ok(())
    }

    fn process(&mut self, input: &[Sample], output: &mut [Sample], _ctx: &ProcessContext) {
        let len = input.len().min(output.len());
        output[..len].copy_from_slice(&input[..len]);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
