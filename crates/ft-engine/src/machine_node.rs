//! Voice machine as a graph source node
//!
//! Wraps a [`VoiceMachine`] so it participates in the audio graph. The
//! sequencer bridge queues sample-offset actions on the node; `process`
//! renders segment-wise around those offsets so notes and parameter
//! changes land sample-accurately inside the buffer.

use ft_audio::{AudioNode, NodeKind, ProcessContext};
use ft_core::{AudioFormat, EngineResult, ParamKey, Sample};
use ft_synth::VoiceMachine;

/// Maximum actions buffered per cycle
const MAX_PENDING_ACTIONS: usize = 256;

/// One dispatched sequencer action
#[derive(Debug, Clone, Copy)]
pub enum MachineAction {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    /// Value already scaled to native units
    SetParam { key: ParamKey, value: f32 },
    ReleaseAll,
}

/// Graph node owning one voice machine
pub struct MachineNode {
    machine: Box<dyn VoiceMachine>,
    /// (sample offset, action), queued by the bridge before the cycle
    pending: Vec<(u32, MachineAction)>,
}

impl MachineNode {
    pub fn new(machine: Box<dyn VoiceMachine>) -> Self {
        Self {
            machine,
            pending: Vec::with_capacity(MAX_PENDING_ACTIONS),
        }
    }

    pub fn machine(&self) -> &dyn VoiceMachine {
        self.machine.as_ref()
    }

    pub fn machine_mut(&mut self) -> &mut dyn VoiceMachine {
        self.machine.as_mut()
    }

    /// Queue an action for the coming cycle. Silently drops past the
    /// buffer bound; the bridge respects `MAX_PENDING_ACTIONS`.
    pub fn queue_action(&mut self, sample_offset: u32, action: MachineAction) {
        if self.pending.len() < MAX_PENDING_ACTIONS {
            self.pending.push((sample_offset, action));
        }
    }

    pub fn pending_actions(&self) -> usize {
        self.pending.len()
    }

    fn apply(machine: &mut dyn VoiceMachine, action: MachineAction) {
        match action {
            MachineAction::NoteOn { note, velocity } => machine.note_on(note, velocity),
            MachineAction::NoteOff { note } => machine.note_off(note),
            MachineAction::SetParam { key, value } => {
                if let Err(err) = machine.set_param(key, value) {
                    log::debug!("machine rejected param: {err}");
                }
            }
            MachineAction::ReleaseAll => machine.release_all(),
        }
    }
}

impl AudioNode for MachineNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Source
    }

    fn max_inputs(&self) -> usize {
        0
    }

    fn max_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, _format: AudioFormat, _max_frames: usize) -> EngineResult<()> {
        Ok(())
    }

    fn process(&mut self, _input: &[Sample], output: &mut [Sample], ctx: &ProcessContext) {
        output.fill(0.0);
        let frames = ctx.frames.min(output.len() / 2);

        if self.pending.is_empty() {
            self.machine.process(&mut output[..frames * 2]);
            return;
        }

        // Render in segments split at action offsets
        self.pending.sort_by_key(|(offset, _)| *offset);
        let mut frame = 0usize;
        let mut next = 0usize;
        while frame < frames {
            // Apply everything due at the current frame
            while next < self.pending.len() && self.pending[next].0 as usize <= frame {
                Self::apply(self.machine.as_mut(), self.pending[next].1);
                next += 1;
            }
            let until = if next < self.pending.len() {
                (self.pending[next].0 as usize).min(frames)
            } else {
                frames
            };
            if until > frame {
                self.machine
                    .process(&mut output[frame * 2..until * 2]);
                frame = until;
            }
        }
        // Anything stamped past the buffer end applies now rather than
        // leaking into the next cycle
        while next < self.pending.len() {
            Self::apply(self.machine.as_mut(), self.pending[next].1);
            next += 1;
        }
        self.pending.clear();
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.machine.reset();
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
