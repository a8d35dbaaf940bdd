//! SIMD per-buffer transforms
//!
//! Vectorized with `wide::f32x8` plus scalar tails. All operations work
//! on interleaved float data, in place or into a caller-provided output,
//! and never allocate. Finite input stays finite.

use ft_core::Sample;
use wide::f32x8;

const LANES: usize = 8;

// ═══════════════════════════════════════════════════════════════════════════════
// DENORMAL PROTECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Set CPU flags to flush denormals to zero (DAZ + FTZ)
///
/// Must be called once at audio thread startup. Affects the calling
/// thread only.
#[inline]
pub fn set_denormals_zero() {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: only changes floating-point control bits for this thread
        unsafe {
            use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};
            // DAZ = bit 6 (0x0040), FTZ = bit 15 (0x8000)
            let mxcsr = _mm_getcsr();
            _mm_setcsr(mxcsr | 0x8040);
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        // FPCR.FZ is the default on aarch64; nothing to do
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GAIN / MIX / FADE
// ═══════════════════════════════════════════════════════════════════════════════

/// Multiply every sample by `gain`, in place
pub fn apply_gain(buf: &mut [Sample], gain: Sample) {
    let g = f32x8::splat(gain);
    let mut chunks = buf.chunks_exact_mut(LANES);
    for chunk in &mut chunks {
        let mut lane = [0.0f32; LANES];
        lane.copy_from_slice(chunk);
        let v = f32x8::from(lane) * g;
        chunk.copy_from_slice(&v.to_array());
    }
    for s in chunks.into_remainder() {
        *s *= gain;
    }
}

/// `out[i] = in1[i]·g1 + in2[i]·g2` over the common length
pub fn mix(in1: &[Sample], in2: &[Sample], out: &mut [Sample], g1: Sample, g2: Sample) {
    let len = in1.len().min(in2.len()).min(out.len());
    let (v1, v2) = (f32x8::splat(g1), f32x8::splat(g2));

    let mut i = 0;
    while i + LANES <= len {
        let mut a = [0.0f32; LANES];
        let mut b = [0.0f32; LANES];
        a.copy_from_slice(&in1[i..i + LANES]);
        b.copy_from_slice(&in2[i..i + LANES]);
        let v = f32x8::from(a) * v1 + f32x8::from(b) * v2;
        out[i..i + LANES].copy_from_slice(&v.to_array());
        i += LANES;
    }
    while i < len {
        out[i] = in1[i] * g1 + in2[i] * g2;
        i += 1;
    }
}

/// Accumulate `src` into `dst` with gain: `dst[i] += src[i]·gain`
pub fn mix_into(dst: &mut [Sample], src: &[Sample], gain: Sample) {
    let len = dst.len().min(src.len());
    let g = f32x8::splat(gain);

    let mut i = 0;
    while i + LANES <= len {
        let mut a = [0.0f32; LANES];
        let mut b = [0.0f32; LANES];
        a.copy_from_slice(&dst[i..i + LANES]);
        b.copy_from_slice(&src[i..i + LANES]);
        let v = f32x8::from(a) + f32x8::from(b) * g;
        dst[i..i + LANES].copy_from_slice(&v.to_array());
        i += LANES;
    }
    while i < len {
        dst[i] += src[i] * gain;
        i += 1;
    }
}

/// Sample-linear gain ramp from `g_start` to `g_end` across the buffer
pub fn apply_fade(buf: &mut [Sample], g_start: Sample, g_end: Sample) {
    let len = buf.len();
    if len == 0 {
        return;
    }
    if len == 1 {
        buf[0] *= g_start;
        return;
    }

    let step = (g_end - g_start) / (len - 1) as f32;
    let lane_offsets = f32x8::from([0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    let step_v = f32x8::splat(step);

    let mut i = 0;
    while i + LANES <= len {
        let base = f32x8::splat(g_start + step * i as f32);
        let gains = base + lane_offsets * step_v;
        let mut lane = [0.0f32; LANES];
        lane.copy_from_slice(&buf[i..i + LANES]);
        let v = f32x8::from(lane) * gains;
        buf[i..i + LANES].copy_from_slice(&v.to_array());
        i += LANES;
    }
    while i < len {
        buf[i] *= g_start + step * i as f32;
        i += 1;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// METERING
// ═══════════════════════════════════════════════════════════════════════════════

/// Root-mean-square level of the buffer
pub fn rms(buf: &[Sample]) -> Sample {
    if buf.is_empty() {
        return 0.0;
    }

    let mut acc = f32x8::splat(0.0);
    let mut chunks = buf.chunks_exact(LANES);
    for chunk in &mut chunks {
        let mut lane = [0.0f32; LANES];
        lane.copy_from_slice(chunk);
        let v = f32x8::from(lane);
        acc += v * v;
    }
    let mut sum: f32 = acc.to_array().iter().sum();
    for &s in chunks.remainder() {
        sum += s * s;
    }
    (sum / buf.len() as f32).sqrt()
}

/// Peak absolute sample value
pub fn peak(buf: &[Sample]) -> Sample {
    let mut acc = f32x8::splat(0.0);
    let mut chunks = buf.chunks_exact(LANES);
    for chunk in &mut chunks {
        let mut lane = [0.0f32; LANES];
        lane.copy_from_slice(chunk);
        acc = acc.max(f32x8::from(lane).abs());
    }
    let mut max = acc.to_array().iter().fold(0.0f32, |m, &v| m.max(v));
    for &s in chunks.remainder() {
        max = max.max(s.abs());
    }
    max
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOFT CLIP
// ═══════════════════════════════════════════════════════════════════════════════

/// Cubic soft clip, `x − x³/3` scaled so `|out| ≤ threshold`
///
/// Input is normalized by the threshold and clamped to ±1 before the
/// cubic; the 3/2 factor makes the curve hit exactly ±threshold at the
/// clamp point.
pub fn soft_clip(buf: &mut [Sample], threshold: Sample) {
    if threshold <= f32::EPSILON {
        buf.fill(0.0);
        return;
    }

    let inv_t = f32x8::splat(1.0 / threshold);
    let t = f32x8::splat(threshold);
    let one = f32x8::splat(1.0);
    let neg_one = f32x8::splat(-1.0);
    let half = f32x8::splat(0.5);
    let three_halves = f32x8::splat(1.5);

    let mut chunks = buf.chunks_exact_mut(LANES);
    for chunk in &mut chunks {
        let mut lane = [0.0f32; LANES];
        lane.copy_from_slice(chunk);
        let u = (f32x8::from(lane) * inv_t).max(neg_one).min(one);
        let v = t * (three_halves * u - half * u * u * u);
        chunk.copy_from_slice(&v.to_array());
    }
    for s in chunks.into_remainder() {
        let u = (*s / threshold).clamp(-1.0, 1.0);
        *s = threshold * (1.5 * u - 0.5 * u * u * u);
    }
}
