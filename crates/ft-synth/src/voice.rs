//! FM voice: four operators through a fixed algorithm
//!
//! Operators A, B1, B2, C process in that order each sample; an
//! algorithm names, per operator, which earlier operators phase-
//! modulate it, and which operators are carriers (summed to the voice
//! output). Modulator contributions are scaled by the source
//! operator's modulation index.

use ft_core::Sample;

use crate::envelope::EnvelopeConfig;
use crate::midi_note_to_freq;
use crate::operator::{FmOperator, OperatorParams};

pub const OP_A: usize = 0;
pub const OP_B1: usize = 1;
pub const OP_B2: usize = 2;
pub const OP_C: usize = 3;

pub const OPERATOR_COUNT: usize = 4;
pub const ALGORITHM_COUNT: usize = 8;

/// One modulation graph over {A, B1, B2, C}
#[derive(Debug, Clone, Copy)]
pub struct Algorithm {
    /// Modulation sources per operator, indices into the operator array
    pub mod_sources: [&'static [usize]; OPERATOR_COUNT],
    /// Operators summed into the voice output
    pub carriers: &'static [usize],
}

/// The eight fixed algorithms, ordered from a full serial chain to four
/// parallel carriers
pub const ALGORITHMS: [Algorithm; ALGORITHM_COUNT] = [
    // 1: A→B1→B2→C, C carries
    Algorithm {
        mod_sources: [&[], &[OP_A], &[OP_B1], &[OP_B2]],
        carriers: &[OP_C],
    },
    // 2: A→B1→C, B2→C
    Algorithm {
        mod_sources: [&[], &[OP_A], &[], &[OP_B1, OP_B2]],
        carriers: &[OP_C],
    },
    // 3: A→C, B1→C, B2→C
    Algorithm {
        mod_sources: [&[], &[], &[], &[OP_A, OP_B1, OP_B2]],
        carriers: &[OP_C],
    },
    // 4: A→B1, B2→C, two carriers
    Algorithm {
        mod_sources: [&[], &[OP_A], &[], &[OP_B2]],
        carriers: &[OP_B1, OP_C],
    },
    // 5: A→(B1,B2), both →C
    Algorithm {
        mod_sources: [&[], &[OP_A], &[OP_A], &[OP_B1, OP_B2]],
        carriers: &[OP_C],
    },
    // 6: A→B1→B2, C free
    Algorithm {
        mod_sources: [&[], &[OP_A], &[OP_B1], &[]],
        carriers: &[OP_B2, OP_C],
    },
    // 7: A→B1, three carriers
    Algorithm {
        mod_sources: [&[], &[OP_A], &[], &[]],
        carriers: &[OP_B1, OP_B2, OP_C],
    },
    // 8: no modulation, four carriers
    Algorithm {
        mod_sources: [&[], &[], &[], &[]],
        carriers: &[OP_A, OP_B1, OP_B2, OP_C],
    },
];

/// One polyphony slot
#[derive(Debug, Clone)]
pub struct FmVoice {
    operators: [FmOperator; OPERATOR_COUNT],
    /// Algorithm index, 0-based into [`ALGORITHMS`]
    algorithm: usize,
    note: u8,
    velocity: u8,
    gate: bool,
    /// Allocation stamp for the stealing policy
    allocated_at: u64,
}

impl FmVoice {
    pub fn new(sample_rate: f32) -> Self {
        let op = FmOperator::new(sample_rate, OperatorParams::default(), EnvelopeConfig::default());
        Self {
            operators: [op.clone(), op.clone(), op.clone(), op],
            algorithm: 0,
            note: 0,
            velocity: 0,
            gate: false,
            allocated_at: 0,
        }
    }

    /// Select the modulation graph, 1-based id as on the panel
    pub fn set_algorithm(&mut self, id: usize) {
        self.algorithm = id.clamp(1, ALGORITHM_COUNT) - 1;
    }

    pub fn algorithm_id(&self) -> usize {
        self.algorithm + 1
    }

    pub fn operator(&self, index: usize) -> &FmOperator {
        &self.operators[index]
    }

    pub fn operator_mut(&mut self, index: usize) -> &mut FmOperator {
        &mut self.operators[index]
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn allocated_at(&self) -> u64 {
        self.allocated_at
    }

    /// All operators silent
    pub fn is_idle(&self) -> bool {
        self.operators.iter().all(|op| op.is_idle())
    }

    /// Gate closed but still sounding
    pub fn is_releasing(&self) -> bool {
        !self.gate && !self.is_idle()
    }

    pub fn is_held(&self) -> bool {
        self.gate
    }

    /// Start a note: retune every operator, optionally reset phases,
    /// trigger every envelope
    pub fn note_on(&mut self, note: u8, velocity: u8, stamp: u64, phase_reset: bool) {
        self.note = note;
        self.velocity = velocity;
        self.gate = true;
        self.allocated_at = stamp;

        let base = midi_note_to_freq(note);
        for op in &mut self.operators {
            op.set_note_frequency(base);
            op.note_on(phase_reset);
        }
    }

    /// Release every operator envelope
    pub fn note_off(&mut self) {
        self.gate = false;
        for op in &mut self.operators {
            op.note_off();
        }
    }

    pub fn reset(&mut self) {
        self.gate = false;
        for op in &mut self.operators {
            op.reset();
        }
    }

    /// Render one mono sample
    #[inline]
    pub fn tick(&mut self) -> Sample {
        let alg = &ALGORITHMS[self.algorithm];
        let mut outputs = [0.0f32; OPERATOR_COUNT];

        for i in 0..OPERATOR_COUNT {
            let mut phase_mod = 0.0;
            for &src in alg.mod_sources[i] {
                phase_mod += outputs[src] * self.operators[src].params().mod_index;
            }
            outputs[i] = self.operators[i].tick(phase_mod);
        }

        let mut sum = 0.0;
        for &carrier in alg.carriers {
            sum += outputs[carrier];
        }
        sum * (self.velocity as f32 / 127.0)
    }
}
