//! Audio graph with topological scheduling
//!
//! A DAG of [`AudioNode`]s. Mutations happen on the control plane (the
//! engine drains its edit queue before each cycle); `process` runs on
//! the audio thread against the order and fan-in lists cached by
//! `prepare`, with no allocation.

use std::collections::HashMap;

use smallvec::SmallVec;

use ft_core::{AudioFormat, EngineError, EngineResult, Sample};

use crate::node::{AudioNode, NodeId, NodeKind, ProcessContext};

/// Directed edge between two node ports
#[derive(Debug, Clone, Copy)]
pub struct GraphConnection {
    pub source: NodeId,
    pub source_port: u16,
    pub dest: NodeId,
    pub dest_port: u16,
    pub format: AudioFormat,
    /// Mix weight applied when summing into the destination, clamped
    /// to [0, 2] by the routing layer
    pub gain: f32,
    pub active: bool,
    pub latency_samples: u32,
}

/// Per-node processing statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeStats {
    pub cycles: u64,
    pub samples: u64,
}

struct NodeSlot {
    node: Box<dyn AudioNode>,
    kind: NodeKind,
    max_inputs: usize,
    max_outputs: usize,
    format: Option<AudioFormat>,
    bypass: bool,
    prepared: bool,
    stats: NodeStats,
    out_buf: Vec<Sample>,
}

/// The audio processing graph
pub struct AudioGraph {
    slots: HashMap<NodeId, NodeSlot>,
    connections: Vec<GraphConnection>,
    /// Cached topological order, rebuilt by `prepare`
    order: Vec<NodeId>,
    /// Cached fan-in: connection indices per destination
    fan_in: HashMap<NodeId, SmallVec<[u32; 4]>>,
    scratch: Vec<Sample>,
    max_nodes: u32,
    lock_free: bool,
    next_id: u32,
    dirty: bool,
}

impl AudioGraph {
    /// `lock_free` rejects nodes that are not real-time safe
    pub fn new(max_nodes: u32, lock_free: bool) -> Self {
        Self {
            slots: HashMap::new(),
            connections: Vec::new(),
            order: Vec::new(),
            fan_in: HashMap::new(),
            scratch: Vec::new(),
            max_nodes,
            lock_free,
            next_id: 1,
            dirty: true,
        }
    }

    // ── Topology edits (control plane) ──────────────────────────────

    pub fn add_node(&mut self, node: Box<dyn AudioNode>) -> EngineResult<NodeId> {
        if self.slots.len() as u32 >= self.max_nodes {
            return Err(EngineError::GraphFull(self.max_nodes));
        }
        if self.lock_free && !node.is_realtime_safe() {
            return Err(EngineError::NonRealtimeSafe(
                "node rejected: graph runs in lock-free mode".into(),
            ));
        }

        let id = NodeId::new(self.next_id);
        self.next_id += 1;

        let kind = node.kind();
        let max_inputs = node.max_inputs();
        let max_outputs = node.max_outputs();
        self.slots.insert(
            id,
            NodeSlot {
                node,
                kind,
                max_inputs,
                max_outputs,
                format: None,
                bypass: false,
                prepared: false,
                stats: NodeStats::default(),
                out_buf: Vec::new(),
            },
        );
        self.dirty = true;
        Ok(id)
    }

    pub fn remove_node(&mut self, id: NodeId) -> EngineResult<Box<dyn AudioNode>> {
        let slot = self
            .slots
            .remove(&id)
            .ok_or(EngineError::DanglingNode(id.0))?;
        self.connections
            .retain(|c| c.source != id && c.dest != id);
        self.dirty = true;
        Ok(slot.node)
    }

    pub fn connect(
        &mut self,
        source: NodeId,
        source_port: u16,
        dest: NodeId,
        dest_port: u16,
    ) -> EngineResult<()> {
        let src_slot = self
            .slots
            .get(&source)
            .ok_or(EngineError::DanglingNode(source.0))?;
        let dst_slot = self
            .slots
            .get(&dest)
            .ok_or(EngineError::DanglingNode(dest.0))?;

        // Nodes join edges only once prepared with an assigned format
        let src_format = match (src_slot.prepared, src_slot.format) {
            (true, Some(format)) => format,
            _ => {
                return Err(EngineError::InvalidTopology(format!(
                    "source node {} not prepared",
                    source.0
                )));
            }
        };
        let dst_format = match (dst_slot.prepared, dst_slot.format) {
            (true, Some(format)) => format,
            _ => {
                return Err(EngineError::InvalidTopology(format!(
                    "destination node {} not prepared",
                    dest.0
                )));
            }
        };

        if source_port as usize >= src_slot.max_outputs {
            return Err(EngineError::PortOutOfRange {
                node: source.0,
                port: source_port as u32,
            });
        }
        if dest_port as usize >= dst_slot.max_inputs {
            return Err(EngineError::PortOutOfRange {
                node: dest.0,
                port: dest_port as u32,
            });
        }
        if self
            .connections
            .iter()
            .any(|c| c.dest == dest && c.dest_port == dest_port)
        {
            return Err(EngineError::InputOccupied {
                node: dest.0,
                port: dest_port as u32,
            });
        }
        if src_format != dst_format && !dst_slot.bypass {
            return Err(EngineError::FormatMismatch {
                expected: dst_format.to_string(),
                actual: src_format.to_string(),
            });
        }
        if self.reaches(dest, source) {
            return Err(EngineError::GraphCycle(source.0));
        }

        self.connections.push(GraphConnection {
            source,
            source_port,
            dest,
            dest_port,
            format: src_format,
            gain: 1.0,
            active: true,
            latency_samples: 0,
        });
        self.dirty = true;
        Ok(())
    }

    pub fn disconnect(&mut self, source: NodeId, dest: NodeId) -> EngineResult<()> {
        let before = self.connections.len();
        self.connections
            .retain(|c| c.source != source || c.dest != dest);
        if self.connections.len() == before {
            return Err(EngineError::DanglingNode(dest.0));
        }
        self.dirty = true;
        Ok(())
    }

    pub fn set_bypass(&mut self, id: NodeId, bypass: bool) -> EngineResult<()> {
        let slot = self
            .slots
            .get_mut(&id)
            .ok_or(EngineError::DanglingNode(id.0))?;
        slot.bypass = bypass;
        Ok(())
    }

    /// Update mix weight/activation of an existing edge (applied from
    /// the routing snapshot at cycle start)
    pub fn set_edge_state(
        &mut self,
        source: NodeId,
        dest: NodeId,
        gain: f32,
        active: bool,
    ) -> EngineResult<()> {
        let conn = self
            .connections
            .iter_mut()
            .find(|c| c.source == source && c.dest == dest)
            .ok_or(EngineError::DanglingNode(dest.0))?;
        conn.gain = gain.clamp(0.0, 2.0);
        conn.active = active;
        Ok(())
    }

    // ── Validation ──────────────────────────────────────────────────

    /// Check the structural invariants: sources and an output exist,
    /// every source reaches an output, no cycles, formats line up, and
    /// port indices are in range.
    pub fn validate(&self) -> EngineResult<()> {
        let has_source = self.slots.values().any(|s| s.kind == NodeKind::Source);
        let has_output = self.slots.values().any(|s| s.kind == NodeKind::Output);
        if !has_source || !has_output {
            return Err(EngineError::InvalidTopology(
                "graph needs at least one source and one output".into(),
            ));
        }

        for conn in &self.connections {
            let src = self
                .slots
                .get(&conn.source)
                .ok_or(EngineError::DanglingNode(conn.source.0))?;
            let dst = self
                .slots
                .get(&conn.dest)
                .ok_or(EngineError::DanglingNode(conn.dest.0))?;
            if conn.source_port as usize >= src.max_outputs {
                return Err(EngineError::PortOutOfRange {
                    node: conn.source.0,
                    port: conn.source_port as u32,
                });
            }
            if conn.dest_port as usize >= dst.max_inputs {
                return Err(EngineError::PortOutOfRange {
                    node: conn.dest.0,
                    port: conn.dest_port as u32,
                });
            }
            if !dst.bypass {
                match dst.format {
                    Some(format) if format == conn.format => {}
                    Some(format) => {
                        return Err(EngineError::FormatMismatch {
                            expected: format.to_string(),
                            actual: conn.format.to_string(),
                        });
                    }
                    None => {
                        return Err(EngineError::InvalidTopology(format!(
                            "node {} has no assigned format",
                            conn.dest.0
                        )));
                    }
                }
            }
        }

        self.compute_order()?;

        for (&id, slot) in &self.slots {
            if slot.kind == NodeKind::Source && !self.reaches_output(id) {
                return Err(EngineError::InvalidTopology(format!(
                    "source {} does not reach an output",
                    id.0
                )));
            }
        }

        Ok(())
    }

    /// Depth-first reachability from `from` to `to`
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        let mut stack = vec![from];
        let mut seen = std::collections::HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            for conn in self.connections.iter().filter(|c| c.source == id) {
                if conn.dest == to {
                    return true;
                }
                stack.push(conn.dest);
            }
        }
        false
    }

    fn reaches_output(&self, from: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = std::collections::HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(slot) = self.slots.get(&id) {
                if slot.kind == NodeKind::Output {
                    return true;
                }
            }
            for conn in self.connections.iter().filter(|c| c.source == id) {
                stack.push(conn.dest);
            }
        }
        false
    }

    /// Kahn's algorithm; errors with the id of a node on a cycle
    fn compute_order(&self) -> EngineResult<Vec<NodeId>> {
        let mut indegree: HashMap<NodeId, usize> =
            self.slots.keys().map(|&id| (id, 0)).collect();
        for conn in &self.connections {
            if let Some(d) = indegree.get_mut(&conn.dest) {
                *d += 1;
            }
        }

        let mut ready: Vec<NodeId> = indegree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        ready.sort();

        let mut order = Vec::with_capacity(self.slots.len());
        while let Some(id) = ready.pop() {
            order.push(id);
            for conn in self.connections.iter().filter(|c| c.source == id) {
                if let Some(d) = indegree.get_mut(&conn.dest) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(conn.dest);
                    }
                }
            }
        }

        if order.len() != self.slots.len() {
            let stuck = indegree
                .keys()
                .filter(|id| !order.contains(*id))
                .map(|id| id.0)
                .min()
                .unwrap_or(0);
            return Err(EngineError::GraphCycle(stuck));
        }
        Ok(order)
    }

    // ── Scheduling ──────────────────────────────────────────────────

    /// Assign formats, prepare nodes, and cache the schedule. Must be
    /// called after topology edits and before `process`.
    pub fn prepare(&mut self, format: AudioFormat, max_frames: usize) -> EngineResult<()> {
        let buf_len = max_frames * format.channels as usize;
        for slot in self.slots.values_mut() {
            if slot.format.is_none() {
                slot.format = Some(format);
            }
            let node_format = slot.format.unwrap_or(format);
            slot.node.prepare(node_format, max_frames)?;
            slot.out_buf.resize(buf_len, 0.0);
            slot.prepared = true;
        }
        self.scratch.resize(buf_len, 0.0);

        self.order = self.compute_order()?;
        self.fan_in.clear();
        for (idx, conn) in self.connections.iter().enumerate() {
            self.fan_in
                .entry(conn.dest)
                .or_default()
                .push(idx as u32);
        }
        self.dirty = false;
        Ok(())
    }

    /// Whether topology changed since the last `prepare`
    pub fn needs_prepare(&self) -> bool {
        self.dirty
    }

    /// Run one cycle. Zero allocation; nodes execute in cached
    /// topological order with their fan-in summed via the DSP mixers.
    pub fn process(&mut self, ctx: &ProcessContext) {
        let len = self.scratch.len().min(ctx.frames * self.channel_factor());

        for i in 0..self.order.len() {
            let id = self.order[i];

            self.scratch[..len].fill(0.0);
            if let Some(indices) = self.fan_in.get(&id) {
                for &idx in indices {
                    let conn = self.connections[idx as usize];
                    if !conn.active {
                        continue;
                    }
                    if let Some(src) = self.slots.get(&conn.source) {
                        ft_dsp::mix_into(
                            &mut self.scratch[..len],
                            &src.out_buf[..len],
                            conn.gain,
                        );
                    }
                }
            }

            if let Some(slot) = self.slots.get_mut(&id) {
                if slot.bypass {
                    slot.out_buf[..len].copy_from_slice(&self.scratch[..len]);
                } else {
                    slot.node
                        .process(&self.scratch[..len], &mut slot.out_buf[..len], ctx);
                }
                slot.stats.cycles += 1;
                slot.stats.samples += ctx.frames as u64;
            }
        }
    }

    fn channel_factor(&self) -> usize {
        self.slots
            .values()
            .find_map(|s| s.format.map(|f| f.channels as usize))
            .unwrap_or(2)
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Output buffer of the first output-kind node
    pub fn output_buffer(&self) -> Option<&[Sample]> {
        self.order
            .iter()
            .find(|&id| {
                self.slots
                    .get(id)
                    .is_some_and(|s| s.kind == NodeKind::Output)
            })
            .and_then(|id| self.slots.get(id))
            .map(|s| s.out_buf.as_slice())
    }

    /// Output buffer of a specific node
    pub fn node_output(&self, id: NodeId) -> Option<&[Sample]> {
        self.slots.get(&id).map(|s| s.out_buf.as_slice())
    }

    pub fn node_stats(&self, id: NodeId) -> Option<NodeStats> {
        self.slots.get(&id).map(|s| s.stats)
    }

    pub fn node_count(&self) -> usize {
        self.slots.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Worst-case latency across the graph (max over declared
    /// per-connection compensation)
    pub fn total_latency(&self) -> u32 {
        self.connections
            .iter()
            .map(|c| c.latency_samples)
            .max()
            .unwrap_or(0)
    }

    /// Access a node for control-plane mutation
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Box<dyn AudioNode>> {
        self.slots.get_mut(&id).map(|s| &mut s.node)
    }

    pub fn reset(&mut self) {
        for slot in self.slots.values_mut() {
            slot.node.reset();
            slot.out_buf.fill(0.0);
        }
    }
}
