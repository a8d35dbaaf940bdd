//! The audio engine
//!
//! Owns the graph, voice machines (through the sequencer bridge), the
//! timing synchronizer, routing matrix, buffer pool, and metrics, and
//! drives one real-time cycle per host callback. Lifecycle:
//!
//! ```text
//! Uninitialized → Initializing → Ready → Starting → Running
//!                                          Running ↔ Suspended
//!                            Running → Stopping → Stopped → Starting…
//!                     any state → Error → (reset) → Uninitialized
//! ```
//!
//! Control-plane calls (initialize, topology edits, parameter updates)
//! come from the host or UI thread; `process` is the only method the
//! audio thread touches.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use ft_audio::{
    AudioGraph, BufferPool, MixerNode, NodeId, OutputNode, RoutingConnection, RoutingMatrix,
    RoutingReader, SpscRingBuffer,
};
use ft_core::{AudioFormat, EngineConfig, EngineError, EngineResult, Sample};
use ft_dsp::{ConverterCache, ConverterCacheConfig, set_denormals_zero};
use ft_event::{EventSender, TimingSynchronizer};
use ft_synth::FmToneMachine;

use crate::bridge::SequencerBridge;
use crate::machine_node::MachineNode;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::param_bridge::ParameterBridge;
use crate::recovery::{ErrorRecovery, RecoveryConfig};

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EngineState {
    #[default]
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Starting = 3,
    Running = 4,
    Stopping = 5,
    Stopped = 6,
    Suspended = 7,
    Error = 8,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initializing,
            2 => Self::Ready,
            3 => Self::Starting,
            4 => Self::Running,
            5 => Self::Stopping,
            6 => Self::Stopped,
            7 => Self::Suspended,
            8 => Self::Error,
            _ => Self::Uninitialized,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Suspended => "suspended",
            Self::Error => "error",
        }
    }
}

/// Cheap cloneable handle for UI threads: state, metrics, and the
/// event producer
#[derive(Clone)]
pub struct EngineHandle {
    state: Arc<AtomicU8>,
    metrics: Arc<EngineMetrics>,
    events: EventSender,
}

impl EngineHandle {
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUBSYSTEMS
// ═══════════════════════════════════════════════════════════════════════════════

struct Subsystems {
    graph: AudioGraph,
    bridge: SequencerBridge,
    timing: TimingSynchronizer,
    pool: BufferPool,
    routing: RoutingMatrix,
    routing_reader: RoutingReader,
    converters: ConverterCache,
    monitor_ring: Arc<SpscRingBuffer>,
    mixer: NodeId,
    output: NodeId,
    /// track → (machine node, parameter bridge)
    tracks: Vec<(u8, NodeId)>,
    param_bridges: std::collections::HashMap<u8, ParameterBridge>,
    format: AudioFormat,
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// The engine. Constructed once at program start; the UI holds an
/// [`EngineHandle`], never the engine itself.
pub struct AudioEngine {
    config: EngineConfig,
    state: Arc<AtomicU8>,
    metrics: Arc<EngineMetrics>,
    recovery: Arc<ErrorRecovery>,
    subsystems: Option<Subsystems>,
    sample_time: u64,
}

impl AudioEngine {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            state: Arc::new(AtomicU8::new(EngineState::Uninitialized as u8)),
            metrics: Arc::new(EngineMetrics::new()),
            recovery: Arc::new(ErrorRecovery::new(RecoveryConfig::default())),
            subsystems: None,
            sample_time: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn recovery(&self) -> &ErrorRecovery {
        &self.recovery
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Build every subsystem from the configuration
    pub fn initialize(&mut self, config: EngineConfig) -> EngineResult<()> {
        match self.state() {
            EngineState::Uninitialized | EngineState::Stopped | EngineState::Ready => {}
            other => {
                return Err(EngineError::InvalidState(other.name(), "uninitialized"));
            }
        }
        self.set_state(EngineState::Initializing);

        if let Err(err) = config.validate() {
            self.set_state(EngineState::Uninitialized);
            return Err(err);
        }

        let format = AudioFormat::native(config.sample_rate, config.channel_count as u16);
        let frames = config.buffer_size as usize;

        let mut graph = AudioGraph::new(config.max_graph_nodes, config.enable_lock_free_operations);
        let mixer = graph.add_node(Box::new(MixerNode::new(1.0)))?;
        let output = graph.add_node(Box::new(OutputNode))?;
        graph.prepare(format, frames)?;
        graph.connect(mixer, 0, output, 0)?;
        graph.prepare(format, frames)?;

        let pool = BufferPool::new(
            config.buffer_pool_size as usize,
            frames,
            format.channels,
            config.sample_rate,
        )?;

        let routing = RoutingMatrix::new(
            config.max_routing_connections,
            config.max_graph_nodes,
            config.max_graph_nodes,
        );
        let routing_reader = routing.reader();

        let monitor_ring = Arc::new(SpscRingBuffer::new(
            config.circular_buffer_capacity as usize * format.channels as usize,
        ));

        self.subsystems = Some(Subsystems {
            graph,
            bridge: SequencerBridge::new(1024),
            timing: TimingSynchronizer::new(config.sample_rate as f64, 120.0),
            pool,
            routing,
            routing_reader,
            converters: ConverterCache::new(ConverterCacheConfig::default()),
            monitor_ring,
            mixer,
            output,
            tracks: Vec::new(),
            param_bridges: std::collections::HashMap::new(),
            format,
        });
        self.config = config;
        self.sample_time = 0;

        // One FM TONE machine on track 0 by default
        self.add_fm_track(0)?;

        self.set_state(EngineState::Ready);
        log::info!(
            "engine initialized: {} Hz, {} frames, {} ch",
            self.config.sample_rate,
            self.config.buffer_size,
            self.config.channel_count
        );
        Ok(())
    }

    /// Add an FM TONE machine on a sequencer track. Control-plane only;
    /// call before `start` or between stop/start.
    pub fn add_fm_track(&mut self, track: u8) -> EngineResult<NodeId> {
        let config = self.config.clone();
        let subsystems = self.subsystems_mut()?;
        if subsystems.param_bridges.contains_key(&track) {
            return Err(EngineError::InvalidConfig(format!(
                "track {track} already registered"
            )));
        }

        let machine = FmToneMachine::new(config.sample_rate as f32);
        let node = subsystems
            .graph
            .add_node(Box::new(MachineNode::new(Box::new(machine))))?;
        subsystems
            .graph
            .prepare(subsystems.format, config.buffer_size as usize)?;

        let port = subsystems.tracks.len() as u16;
        let mixer = subsystems.mixer;
        subsystems.graph.connect(node, 0, mixer, port)?;
        subsystems
            .graph
            .prepare(subsystems.format, config.buffer_size as usize)?;

        subsystems.routing.add(RoutingConnection {
            source: node,
            source_port: 0,
            dest: mixer,
            dest_port: port,
            gain: 1.0,
            active: true,
            latency_samples: 0,
        })?;

        subsystems.bridge.register_track(track, node);
        subsystems.tracks.push((track, node));
        let param_bridge = ParameterBridge::for_fm_machine(track, subsystems.bridge.sender());
        subsystems.param_bridges.insert(track, param_bridge);

        Ok(node)
    }

    /// Begin processing. Fails if the engine was never initialized.
    pub fn start(&mut self) -> EngineResult<()> {
        match self.state() {
            EngineState::Ready | EngineState::Stopped => {}
            other => {
                let err = EngineError::EngineStartFailed(format!(
                    "cannot start from state {}",
                    other.name()
                ));
                self.report(&err);
                return Err(err);
            }
        }
        self.set_state(EngineState::Starting);

        // Flush-to-zero before the first callback; the host may reuse
        // this thread for processing
        set_denormals_zero();

        let subsystems = self.subsystems_mut()?;
        subsystems.graph.validate()?;

        self.set_state(EngineState::Running);
        log::info!("engine running");
        Ok(())
    }

    /// Stop processing: drain the event queue, quiesce voices, halt the
    /// transport
    pub fn stop(&mut self) -> EngineResult<()> {
        match self.state() {
            EngineState::Running | EngineState::Suspended => {}
            other => {
                return Err(EngineError::InvalidState(other.name(), "running"));
            }
        }
        self.set_state(EngineState::Stopping);

        let subsystems = self.subsystems_mut()?;
        subsystems.bridge.drain();
        subsystems.timing.stop();
        for i in 0..subsystems.tracks.len() {
            let node_id = subsystems.tracks[i].1;
            if let Some(node) = subsystems.graph.node_mut(node_id) {
                if let Some(machine) = node.as_any_mut().downcast_mut::<MachineNode>() {
                    machine.machine_mut().release_all();
                }
            }
        }

        self.set_state(EngineState::Stopped);
        log::info!("engine stopped");
        Ok(())
    }

    pub fn suspend(&mut self) -> EngineResult<()> {
        match self.state() {
            EngineState::Running => {
                self.set_state(EngineState::Suspended);
                Ok(())
            }
            other => Err(EngineError::InvalidState(other.name(), "running")),
        }
    }

    pub fn resume(&mut self) -> EngineResult<()> {
        match self.state() {
            EngineState::Suspended => {
                self.set_state(EngineState::Running);
                Ok(())
            }
            other => Err(EngineError::InvalidState(other.name(), "suspended")),
        }
    }

    /// Drop everything and return to uninitialized (the only exit from
    /// the error state)
    pub fn reset(&mut self) {
        self.subsystems = None;
        self.sample_time = 0;
        self.recovery.reset();
        self.set_state(EngineState::Uninitialized);
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            state: self.state.clone(),
            metrics: self.metrics.clone(),
            events: self.event_sender(),
        }
    }

    /// Producer handle for sequencer events. Panics never; before
    /// initialization it returns a sender wired to a throwaway queue.
    pub fn event_sender(&self) -> EventSender {
        match &self.subsystems {
            Some(s) => s.bridge.sender(),
            None => ft_event::EventQueue::new(1).sender(),
        }
    }

    pub fn param_bridge(&self, track: u8) -> Option<&ParameterBridge> {
        self.subsystems
            .as_ref()
            .and_then(|s| s.param_bridges.get(&track))
    }

    pub fn param_bridge_mut(&mut self, track: u8) -> Option<&mut ParameterBridge> {
        self.subsystems
            .as_mut()
            .and_then(|s| s.param_bridges.get_mut(&track))
    }

    pub fn routing_mut(&mut self) -> Option<&mut RoutingMatrix> {
        self.subsystems.as_mut().map(|s| &mut s.routing)
    }

    pub fn timing_mut(&mut self) -> Option<&mut TimingSynchronizer> {
        self.subsystems.as_mut().map(|s| &mut s.timing)
    }

    pub fn converter_cache(&self) -> Option<&ConverterCache> {
        self.subsystems.as_ref().map(|s| &s.converters)
    }

    /// UI-side tap on the rendered output (interleaved)
    pub fn monitor_ring(&self) -> Option<Arc<SpscRingBuffer>> {
        self.subsystems.as_ref().map(|s| s.monitor_ring.clone())
    }

    fn subsystems_mut(&mut self) -> EngineResult<&mut Subsystems> {
        self.subsystems
            .as_mut()
            .ok_or(EngineError::InvalidState("uninitialized", "initialized"))
    }

    /// Route an error through recovery; unrecovered errors latch the
    /// error state
    fn report(&self, error: &EngineError) {
        if !self.config.enable_error_recovery {
            return;
        }
        if !self.recovery.trigger(error) {
            self.set_state(EngineState::Error);
        }
    }

    // ── Audio thread ────────────────────────────────────────────────

    /// One real-time cycle. `_input` is accepted for the host contract;
    /// the synth engine generates, it does not process external audio.
    pub fn process(
        &mut self,
        _input: &[Sample],
        output: &mut [Sample],
        frames: usize,
        _host_time_ns: u64,
    ) -> EngineResult<()> {
        if self.state() != EngineState::Running {
            output.fill(0.0);
            return Ok(());
        }

        let monitoring = self.config.enable_performance_monitoring;
        let started = monitoring.then(Instant::now);
        let sample_rate = self.config.sample_rate;
        let channels = self.config.channel_count as usize;
        let sample_time = self.sample_time;

        let Some(subsystems) = self.subsystems.as_mut() else {
            output.fill(0.0);
            return Ok(());
        };

        // (1) Routing snapshot, acquired once for the whole cycle
        {
            let snapshot = subsystems.routing_reader.acquire();
            for conn in snapshot.connections() {
                let _ = subsystems.graph.set_edge_state(
                    conn.source,
                    conn.dest,
                    conn.gain,
                    conn.active,
                );
            }
        }

        // (2) Events due this buffer → machine actions / transport
        subsystems
            .bridge
            .process_events(&mut subsystems.graph, &mut subsystems.timing, sample_time, frames);

        // (3) Step clock advance
        subsystems.timing.process_buffer(frames, |_step| {});

        // (4) Render the graph
        let ctx = ft_audio::ProcessContext {
            sample_rate,
            frames,
            sample_time,
        };
        subsystems.graph.process(&ctx);

        // (5) Deliver to the host
        let wanted = frames * channels;
        let out_len = output.len().min(wanted);
        match subsystems.graph.output_buffer() {
            Some(rendered) if rendered.len() >= out_len => {
                output[..out_len].copy_from_slice(&rendered[..out_len]);
            }
            _ => {
                output.fill(0.0);
                self.metrics.record_underrun();
            }
        }

        // (6) Monitor tap; overflow just drops samples
        subsystems.monitor_ring.write(&output[..out_len]);

        self.sample_time += frames as u64;

        // (7) Metrics
        if let Some(started) = started {
            let elapsed_us = started.elapsed().as_secs_f32() * 1e6;
            let budget_us = frames as f32 / sample_rate as f32 * 1e6;
            self.metrics.record_cycle(elapsed_us, budget_us);

            let pool = subsystems.pool.stats();
            self.metrics
                .set_pool(pool.high_water as u64, pool.in_use as u64);
            self.metrics
                .set_ring_usage(subsystems.monitor_ring.available_read() as u64);
            self.metrics.set_routing(
                subsystems.routing.active_count() as u64,
                subsystems.routing.len() as u64,
            );
            self.metrics.set_event_queue(
                subsystems.bridge.queue_depth() as u64,
                subsystems.bridge.overflow_count(),
            );
        }

        Ok(())
    }
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new()
    }
}
