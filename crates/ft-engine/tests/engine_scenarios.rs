//! End-to-end engine scenarios
//!
//! Drives the full stack the way a host would: initialize, start, feed
//! sequencer events, pull rendered buffers, inspect metrics.

use std::f32::consts::TAU;

use ft_core::EngineConfig;
use ft_engine::AudioEngine;
use ft_event::{EventPayload, TransportCommand};
use ft_synth::params;

const SR: u32 = 48000;

fn engine_48k() -> AudioEngine {
    let mut engine = AudioEngine::new();
    let config = EngineConfig {
        sample_rate: SR,
        buffer_size: 512,
        ..Default::default()
    };
    engine.initialize(config).unwrap();
    engine
}

/// Configure track 0 as a bare sine: algorithm 1, no modulation,
/// instant full-level envelopes, master at unity
fn make_sine_patch(engine: &mut AudioEngine) {
    let bridge = engine.param_bridge(0).unwrap();
    let mut changes = Vec::new();
    changes.push((params::ALGORITHM, 0.0));
    changes.push((params::MASTER_LEVEL, 1.0));
    for op in 0..4 {
        let ratio_spec = params::spec(params::op_key(op, params::FIELD_RATIO)).unwrap();
        changes.push((
            params::op_key(op, params::FIELD_RATIO),
            ratio_spec.normalize(1.0),
        ));
        changes.push((params::op_key(op, params::FIELD_MOD_INDEX), 0.0));
        changes.push((params::op_key(op, params::FIELD_ENV_ATTACK), 0.0));
        changes.push((params::op_key(op, params::FIELD_ENV_DECAY), 0.0));
        changes.push((params::op_key(op, params::FIELD_ENV_END), 1.0));
    }
    bridge.update_many(&changes).unwrap();
}

fn run_cycles(engine: &mut AudioEngine, cycles: usize, frames: usize) -> Vec<f32> {
    let mut rendered = Vec::new();
    let mut out = vec![0.0f32; frames * 2];
    for _ in 0..cycles {
        engine.process(&[], &mut out, frames, 0).unwrap();
        rendered.extend_from_slice(&out);
    }
    rendered
}

#[test]
fn note_on_produces_audio() {
    let mut engine = engine_48k();
    engine.start().unwrap();

    engine.event_sender().send(
        EventPayload::NoteOn {
            note: 69,
            velocity: 127,
            track: 0,
        },
        0,
    );

    let rendered = run_cycles(&mut engine, 4, 512);
    let peak = rendered.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
    assert!(peak > 0.01, "engine produced silence (peak {peak})");
    assert!(rendered.iter().all(|s| s.is_finite()));
}

#[test]
fn fm_algorithm_one_is_analytically_pure() {
    let mut engine = engine_48k();
    make_sine_patch(&mut engine);
    engine.start().unwrap();

    // One warmup cycle so the parameter batch lands and smoothers settle
    run_cycles(&mut engine, 8, 512);

    let note_time = 8 * 512;
    engine.event_sender().send(
        EventPayload::NoteOn {
            note: 69,
            velocity: 127,
            track: 0,
        },
        note_time as u64,
    );

    let rendered = run_cycles(&mut engine, 2, 512);

    // Compare 1024 samples against the analytic 440 Hz sine
    let mut err_energy = 0.0f64;
    let mut ref_energy = 0.0f64;
    for n in 0..1024usize {
        let expected = (TAU * 440.0 * n as f32 / SR as f32).sin();
        let got = rendered[n * 2];
        assert_eq!(rendered[n * 2], rendered[n * 2 + 1]);
        err_energy += ((got - expected) as f64).powi(2);
        ref_energy += (expected as f64).powi(2);
    }
    let rel_rms = (err_energy / ref_energy).sqrt();
    assert!(rel_rms < 1e-3, "relative RMS error {rel_rms}");
}

#[test]
fn note_off_decays_to_silence() {
    let mut engine = engine_48k();
    make_sine_patch(&mut engine);
    engine.start().unwrap();
    run_cycles(&mut engine, 4, 512);

    let t0 = engine.metrics().cycles * 512;
    engine.event_sender().send(
        EventPayload::NoteOn {
            note: 60,
            velocity: 100,
            track: 0,
        },
        t0,
    );
    run_cycles(&mut engine, 4, 512);

    let t_off = engine.metrics().cycles * 512;
    engine.event_sender().send(
        EventPayload::NoteOff { note: 60, track: 0 },
        t_off,
    );

    // Default release is 0.15 s ≈ 7200 samples; render well past it
    let tail = run_cycles(&mut engine, 40, 512);
    let late = &tail[tail.len() - 1024..];
    let peak = late.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
    assert!(peak < 1e-3, "voice still sounding after release ({peak})");
}

#[test]
fn transport_events_drive_the_step_clock() {
    let mut engine = engine_48k();
    engine.start().unwrap();

    engine
        .event_sender()
        .send(EventPayload::Transport(TransportCommand::Play), 0);
    run_cycles(&mut engine, 8, 512);
    {
        let timing = engine.timing_mut().unwrap();
        assert_eq!(timing.transport(), ft_event::TransportState::Playing);
        assert!(timing.state().current_sample_time > 0);
    }

    let now = engine.metrics().cycles * 512;
    engine
        .event_sender()
        .send(EventPayload::Transport(TransportCommand::Stop), now);
    run_cycles(&mut engine, 1, 512);
    let timing = engine.timing_mut().unwrap();
    assert_eq!(timing.transport(), ft_event::TransportState::Stopped);
    assert_eq!(timing.state().current_sample_time, 0);
}

#[test]
fn param_sweep_stays_clickless_and_finite() {
    let mut engine = engine_48k();
    make_sine_patch(&mut engine);
    engine.start().unwrap();
    run_cycles(&mut engine, 4, 512);

    engine.event_sender().send(
        EventPayload::NoteOn {
            note: 57,
            velocity: 110,
            track: 0,
        },
        0,
    );
    run_cycles(&mut engine, 2, 512);

    // Sweep the master level down while rendering
    for i in 0..20 {
        let bridge = engine.param_bridge(0).unwrap();
        bridge
            .update(params::MASTER_LEVEL, 1.0 - i as f32 / 20.0)
            .unwrap();
        let out = run_cycles(&mut engine, 1, 512);
        assert!(out.iter().all(|s| s.is_finite()));
    }
}

#[test]
fn metrics_populate_during_processing() {
    let mut engine = engine_48k();
    engine.start().unwrap();

    engine.event_sender().send(
        EventPayload::NoteOn {
            note: 69,
            velocity: 127,
            track: 0,
        },
        0,
    );
    run_cycles(&mut engine, 10, 512);

    let snapshot = engine.metrics();
    assert_eq!(snapshot.cycles, 10);
    assert!(snapshot.avg_cycle_time_us > 0.0);
    assert!(snapshot.routing_connections_total >= 1);
    assert!(snapshot.ring_usage > 0);
}

#[test]
fn monitor_ring_carries_rendered_audio() {
    let mut engine = engine_48k();
    engine.start().unwrap();
    let ring = engine.monitor_ring().unwrap();

    engine.event_sender().send(
        EventPayload::NoteOn {
            note: 69,
            velocity: 127,
            track: 0,
        },
        0,
    );
    run_cycles(&mut engine, 2, 512);

    let mut tap = vec![0.0f32; 2048];
    let read = ring.read(&mut tap);
    assert!(read > 0, "monitor ring is empty");
    assert!(tap[..read].iter().any(|&s| s.abs() > 1e-4));
}

#[test]
fn second_track_renders_independently() {
    let mut engine = engine_48k();
    engine.add_fm_track(1).unwrap();
    engine.start().unwrap();

    engine.event_sender().send(
        EventPayload::NoteOn {
            note: 69,
            velocity: 127,
            track: 1,
        },
        0,
    );
    let rendered = run_cycles(&mut engine, 4, 512);
    assert!(rendered.iter().any(|&s| s.abs() > 0.01));
}

#[test]
fn preset_round_trip_through_param_bridge() {
    use ft_engine::{MemoryStore, PersistenceWorker, PresetBlob, load_preset};
    use std::sync::Arc;
    use uuid::Uuid;

    let store = Arc::new(MemoryStore::new());
    let (worker, handle) = PersistenceWorker::spawn(store.clone());

    let preset = Uuid::new_v4();
    {
        let mut engine = engine_48k();
        let bridge = engine.param_bridge_mut(0).unwrap();
        bridge.attach_persistence(handle);
        bridge.set_preset(preset);
        bridge.update(params::MASTER_LEVEL, 0.25).unwrap();
    }
    drop(worker);

    let entries = load_preset(store.as_ref(), &preset);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "master_level");

    // Re-apply through a fresh engine; the update path accepts it
    let blob = PresetBlob { entries };
    let decoded = PresetBlob::decode(&blob.encode()).unwrap();
    let mut engine = engine_48k();
    let bridge = engine.param_bridge(0).unwrap();
    assert_eq!(bridge.apply_preset(&decoded.entries), 1);
}
