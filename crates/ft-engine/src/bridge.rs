//! Sequencer bridge
//!
//! Pulls due events from the queue each cycle and dispatches them to
//! the voice machine registered for their track, stamped with a sample
//! offset inside the buffer. Transport events drive the timing
//! synchronizer; same-key parameter changes coalesce so only the
//! newest value lands.

use std::collections::HashMap;

use ft_audio::{AudioGraph, NodeId};
use ft_core::ParamKey;
use ft_event::{EventPayload, EventQueue, EventSender, PrioritizedEvent, TimingSynchronizer, TransportCommand};

use crate::machine_node::{MachineAction, MachineNode};

/// Per-cycle dispatch summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub notes_on: usize,
    pub notes_off: usize,
    pub param_changes: usize,
    pub transports: usize,
    /// Events whose track has no registered machine
    pub unrouted: usize,
}

/// Connects the event queue to voice machines
pub struct SequencerBridge {
    queue: EventQueue,
    /// track → machine node in the graph
    tracks: HashMap<u8, NodeId>,
    /// Scratch for one cycle's events; capacity fixed at construction
    scratch: Vec<PrioritizedEvent>,
}

impl SequencerBridge {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue: EventQueue::new(queue_capacity),
            tracks: HashMap::new(),
            scratch: Vec::with_capacity(queue_capacity),
        }
    }

    /// Producer handle for sequencer/UI threads
    pub fn sender(&self) -> EventSender {
        self.queue.sender()
    }

    pub fn register_track(&mut self, track: u8, node: NodeId) {
        self.tracks.insert(track, node);
    }

    pub fn unregister_track(&mut self, track: u8) {
        self.tracks.remove(&track);
    }

    pub fn track_node(&self, track: u8) -> Option<NodeId> {
        self.tracks.get(&track).copied()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn overflow_count(&self) -> u64 {
        self.queue.overflow_count()
    }

    /// Drop all queued events (engine stop)
    pub fn drain(&mut self) {
        self.queue.drain();
    }

    /// Dispatch everything due inside `[buffer_start, buffer_start + frames)`.
    /// Late events (timestamp before the buffer) deliver at offset 0.
    pub fn process_events(
        &mut self,
        graph: &mut AudioGraph,
        timing: &mut TimingSynchronizer,
        buffer_start: u64,
        frames: usize,
    ) -> DispatchStats {
        let mut stats = DispatchStats::default();
        let upto = buffer_start + frames.saturating_sub(1) as u64;

        self.scratch.clear();
        self.queue.dequeue_upto(upto, &mut self.scratch);

        for i in 0..self.scratch.len() {
            let event = self.scratch[i];
            let offset = event
                .timestamp
                .saturating_sub(buffer_start)
                .min(frames.saturating_sub(1) as u64) as u32;

            match event.payload {
                EventPayload::Transport(cmd) => {
                    stats.transports += 1;
                    self.apply_transport(graph, timing, cmd);
                }
                EventPayload::PatternChange { .. } => {
                    // Pattern selection is the sequencer's concern; the
                    // bridge only forwards audio-side effects
                }
                EventPayload::NoteOn {
                    note,
                    velocity,
                    track,
                } => {
                    stats.notes_on += 1;
                    if !self.route(
                        graph,
                        track,
                        offset,
                        MachineAction::NoteOn { note, velocity },
                    ) {
                        stats.unrouted += 1;
                    }
                }
                EventPayload::NoteOff { note, track } => {
                    stats.notes_off += 1;
                    if !self.route(graph, track, offset, MachineAction::NoteOff { note }) {
                        stats.unrouted += 1;
                    }
                }
                EventPayload::ParamChange { track, key, value } => {
                    // Newest change for the same (track, key) supersedes
                    if self.superseded(track, key, i) {
                        continue;
                    }
                    stats.param_changes += 1;
                    if !self.route_param(graph, track, offset, key, value) {
                        stats.unrouted += 1;
                    }
                }
            }
        }

        stats
    }

    /// Whether a later event in this batch targets the same (track, key)
    fn superseded(&self, track: u8, key: ParamKey, index: usize) -> bool {
        self.scratch[index + 1..].iter().any(|e| {
            matches!(
                e.payload,
                EventPayload::ParamChange { track: t, key: k, .. } if t == track && k == key
            )
        })
    }

    fn route(
        &self,
        graph: &mut AudioGraph,
        track: u8,
        offset: u32,
        action: MachineAction,
    ) -> bool {
        let Some(&node_id) = self.tracks.get(&track) else {
            return false;
        };
        let Some(node) = graph.node_mut(node_id) else {
            return false;
        };
        let Some(machine_node) = node.as_any_mut().downcast_mut::<MachineNode>() else {
            return false;
        };
        machine_node.queue_action(offset, action);
        true
    }

    /// Parameter values arrive normalized on the wire; scale through
    /// the machine's own spec table before dispatch
    fn route_param(
        &self,
        graph: &mut AudioGraph,
        track: u8,
        offset: u32,
        key: ParamKey,
        normalized: f32,
    ) -> bool {
        let Some(&node_id) = self.tracks.get(&track) else {
            return false;
        };
        let Some(node) = graph.node_mut(node_id) else {
            return false;
        };
        let Some(machine_node) = node.as_any_mut().downcast_mut::<MachineNode>() else {
            return false;
        };
        let native = match machine_node.machine().param_spec(key) {
            Some(spec) => spec.scale(normalized),
            None => normalized,
        };
        machine_node.queue_action(offset, MachineAction::SetParam { key, value: native });
        true
    }

    fn apply_transport(
        &self,
        graph: &mut AudioGraph,
        timing: &mut TimingSynchronizer,
        cmd: TransportCommand,
    ) {
        match cmd {
            TransportCommand::Play => timing.play(),
            TransportCommand::Pause => timing.pause(),
            TransportCommand::Stop => {
                timing.stop();
                // Quiesce every registered machine to release
                for &node_id in self.tracks.values() {
                    if let Some(node) = graph.node_mut(node_id) {
                        if let Some(machine_node) =
                            node.as_any_mut().downcast_mut::<MachineNode>()
                        {
                            machine_node.queue_action(0, MachineAction::ReleaseAll);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ft_audio::OutputNode;
    use ft_core::{AudioFormat, BitDepth};
    use ft_event::TransportState;
    use ft_synth::{FmToneMachine, params};

    const FORMAT: AudioFormat = AudioFormat {
        sample_rate: 48000,
        channels: 2,
        bit_depth: BitDepth::Float32,
    };

    fn setup() -> (SequencerBridge, AudioGraph, TimingSynchronizer, NodeId) {
        let mut graph = AudioGraph::new(16, true);
        let machine = graph
            .add_node(Box::new(MachineNode::new(Box::new(FmToneMachine::new(
                48000.0,
            )))))
            .unwrap();
        let out = graph.add_node(Box::new(OutputNode)).unwrap();
        graph.prepare(FORMAT, 256).unwrap();
        graph.connect(machine, 0, out, 0).unwrap();
        graph.prepare(FORMAT, 256).unwrap();

        let mut bridge = SequencerBridge::new(256);
        bridge.register_track(0, machine);
        let timing = TimingSynchronizer::new(48000.0, 120.0);
        (bridge, graph, timing, machine)
    }

    fn machine_node<'a>(graph: &'a mut AudioGraph, id: NodeId) -> &'a mut MachineNode {
        graph
            .node_mut(id)
            .unwrap()
            .as_any_mut()
            .downcast_mut::<MachineNode>()
            .unwrap()
    }

    #[test]
    fn note_events_reach_the_machine() {
        let (mut bridge, mut graph, mut timing, machine) = setup();

        bridge.sender().send(
            EventPayload::NoteOn {
                note: 60,
                velocity: 100,
                track: 0,
            },
            100,
        );
        let stats = bridge.process_events(&mut graph, &mut timing, 0, 256);
        assert_eq!(stats.notes_on, 1);
        assert_eq!(stats.unrouted, 0);
        assert_eq!(machine_node(&mut graph, machine).pending_actions(), 1);
    }

    #[test]
    fn events_outside_buffer_stay_queued() {
        let (mut bridge, mut graph, mut timing, _) = setup();

        bridge.sender().send(
            EventPayload::NoteOn {
                note: 60,
                velocity: 100,
                track: 0,
            },
            1000,
        );
        let stats = bridge.process_events(&mut graph, &mut timing, 0, 256);
        assert_eq!(stats.notes_on, 0);
        assert_eq!(bridge.queue_depth(), 1);

        // The next buffer that covers t=1000 picks it up
        let stats = bridge.process_events(&mut graph, &mut timing, 768, 256);
        assert_eq!(stats.notes_on, 1);
    }

    #[test]
    fn unrouted_tracks_counted() {
        let (mut bridge, mut graph, mut timing, _) = setup();
        bridge.sender().send(
            EventPayload::NoteOn {
                note: 60,
                velocity: 100,
                track: 9,
            },
            0,
        );
        let stats = bridge.process_events(&mut graph, &mut timing, 0, 256);
        assert_eq!(stats.unrouted, 1);
    }

    #[test]
    fn param_changes_coalesce_per_key() {
        let (mut bridge, mut graph, mut timing, machine) = setup();
        let key = params::MASTER_LEVEL;

        for (t, value) in [(10u64, 0.1f32), (20, 0.5), (30, 0.9)] {
            bridge.sender().send(
                EventPayload::ParamChange {
                    track: 0,
                    key,
                    value,
                },
                t,
            );
        }
        let stats = bridge.process_events(&mut graph, &mut timing, 0, 256);
        // Only the newest survives
        assert_eq!(stats.param_changes, 1);
        assert_eq!(machine_node(&mut graph, machine).pending_actions(), 1);
    }

    #[test]
    fn transport_drives_timing() {
        let (mut bridge, mut graph, mut timing, _) = setup();

        bridge
            .sender()
            .send(EventPayload::Transport(TransportCommand::Play), 0);
        bridge.process_events(&mut graph, &mut timing, 0, 256);
        assert_eq!(timing.transport(), TransportState::Playing);

        bridge
            .sender()
            .send(EventPayload::Transport(TransportCommand::Stop), 300);
        bridge.process_events(&mut graph, &mut timing, 256, 256);
        assert_eq!(timing.transport(), TransportState::Stopped);
    }

    #[test]
    fn late_events_deliver_at_offset_zero() {
        let (mut bridge, mut graph, mut timing, machine) = setup();

        bridge.sender().send(
            EventPayload::NoteOn {
                note: 60,
                velocity: 100,
                track: 0,
            },
            5,
        );
        // Buffer starts well past the event's timestamp
        let stats = bridge.process_events(&mut graph, &mut timing, 5000, 256);
        assert_eq!(stats.notes_on, 1);
        assert_eq!(machine_node(&mut graph, machine).pending_actions(), 1);
    }
}
