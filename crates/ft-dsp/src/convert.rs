//! Format conversion with converter cache
//!
//! Converts between `(sample rate, channel count, bit depth)` triples.
//! Samples are f32 throughout, so depth conversion is a format-tag
//! concern; the real work is channel mapping and resampling. Converters
//! are built on the control plane and cached by `(src, dst, quality)`
//! with LRU eviction and a per-entry TTL. Build failures are cached for
//! the pair so the audio path never retries a known-bad conversion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ft_core::{AudioFormat, EngineError, EngineResult, Sample};

// ═══════════════════════════════════════════════════════════════════════════════
// QUALITY LEVELS
// ═══════════════════════════════════════════════════════════════════════════════

/// Resampling quality ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversionQuality {
    /// Linear interpolation
    Low,
    /// 4-point Catmull-Rom
    Medium,
    /// 16-tap windowed sinc
    High,
    /// 32-tap windowed sinc
    Maximum,
}

impl ConversionQuality {
    /// Sinc kernel width; zero means a polynomial interpolator
    fn sinc_taps(self) -> usize {
        match self {
            Self::Low | Self::Medium => 0,
            Self::High => 16,
            Self::Maximum => 32,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHANNEL MAPPING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum ChannelMap {
    Identity,
    /// mono → N, unit gain per output channel
    Broadcast,
    /// N → mono, 1/N gain
    Average,
    /// dst_channels × src_channels mix matrix, row-major
    Matrix(Vec<f32>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERTER
// ═══════════════════════════════════════════════════════════════════════════════

/// One-way converter between two concrete formats
#[derive(Debug)]
pub struct FormatConverter {
    src: AudioFormat,
    dst: AudioFormat,
    quality: ConversionQuality,
    map: ChannelMap,
}

impl FormatConverter {
    pub fn new(
        src: AudioFormat,
        dst: AudioFormat,
        quality: ConversionQuality,
    ) -> EngineResult<Self> {
        src.validate()?;
        dst.validate()?;

        let map = if src.channels == dst.channels {
            ChannelMap::Identity
        } else if src.channels == 1 {
            ChannelMap::Broadcast
        } else if dst.channels == 1 {
            ChannelMap::Average
        } else {
            return Err(EngineError::UnsupportedFormat(format!(
                "{} → {} channels without a mix matrix",
                src.channels, dst.channels
            )));
        };

        Ok(Self {
            src,
            dst,
            quality,
            map,
        })
    }

    /// Converter with an explicit `dst_channels × src_channels` mix matrix
    pub fn with_matrix(
        src: AudioFormat,
        dst: AudioFormat,
        quality: ConversionQuality,
        matrix: Vec<f32>,
    ) -> EngineResult<Self> {
        src.validate()?;
        dst.validate()?;
        let expected = dst.channels as usize * src.channels as usize;
        if matrix.len() != expected {
            return Err(EngineError::ConversionFailed(format!(
                "mix matrix has {} coefficients, expected {}",
                matrix.len(),
                expected
            )));
        }
        Ok(Self {
            src,
            dst,
            quality,
            map: ChannelMap::Matrix(matrix),
        })
    }

    pub fn src_format(&self) -> AudioFormat {
        self.src
    }

    pub fn dst_format(&self) -> AudioFormat {
        self.dst
    }

    /// Convert an interleaved buffer. Control-plane operation; allocates
    /// the output.
    pub fn convert(&self, input: &[Sample]) -> EngineResult<Vec<Sample>> {
        let src_ch = self.src.channels as usize;
        if src_ch == 0 || input.len() % src_ch != 0 {
            return Err(EngineError::ConversionFailed(format!(
                "input length {} not a multiple of {} channels",
                input.len(),
                src_ch
            )));
        }
        let frames = input.len() / src_ch;

        let mapped = self.map_channels(input, frames);
        if self.src.sample_rate == self.dst.sample_rate {
            return Ok(mapped);
        }

        let dst_ch = self.dst.channels as usize;
        let ratio = self.dst.sample_rate as f64 / self.src.sample_rate as f64;
        let out_frames = ((frames as f64) * ratio).round() as usize;
        let mut out = vec![0.0; out_frames * dst_ch];

        let mut channel = vec![0.0; frames];
        let mut resampled = vec![0.0; out_frames];
        for ch in 0..dst_ch {
            for f in 0..frames {
                channel[f] = mapped[f * dst_ch + ch];
            }
            self.resample_channel(&channel, &mut resampled, ratio);
            for f in 0..out_frames {
                out[f * dst_ch + ch] = resampled[f];
            }
        }

        Ok(out)
    }

    fn map_channels(&self, input: &[Sample], frames: usize) -> Vec<Sample> {
        let src_ch = self.src.channels as usize;
        let dst_ch = self.dst.channels as usize;

        match &self.map {
            ChannelMap::Identity => input.to_vec(),
            ChannelMap::Broadcast => {
                let mut out = vec![0.0; frames * dst_ch];
                for f in 0..frames {
                    let s = input[f];
                    for ch in 0..dst_ch {
                        out[f * dst_ch + ch] = s;
                    }
                }
                out
            }
            ChannelMap::Average => {
                let gain = 1.0 / src_ch as f32;
                let mut out = vec![0.0; frames];
                for f in 0..frames {
                    let mut acc = 0.0;
                    for ch in 0..src_ch {
                        acc += input[f * src_ch + ch];
                    }
                    out[f] = acc * gain;
                }
                out
            }
            ChannelMap::Matrix(matrix) => {
                let mut out = vec![0.0; frames * dst_ch];
                for f in 0..frames {
                    for (d, row) in matrix.chunks_exact(src_ch).enumerate() {
                        let mut acc = 0.0;
                        for (s, &coeff) in row.iter().enumerate() {
                            acc += input[f * src_ch + s] * coeff;
                        }
                        out[f * dst_ch + d] = acc;
                    }
                }
                out
            }
        }
    }

    fn resample_channel(&self, input: &[Sample], output: &mut [Sample], ratio: f64) {
        let taps = self.quality.sinc_taps();
        for (i, out) in output.iter_mut().enumerate() {
            let pos = i as f64 / ratio;
            *out = match self.quality {
                ConversionQuality::Low => interp_linear(input, pos),
                ConversionQuality::Medium => interp_cubic(input, pos),
                _ => interp_sinc(input, pos, taps, ratio.min(1.0)),
            };
        }
    }
}

#[inline]
fn sample_at(input: &[Sample], index: i64) -> f64 {
    let clamped = index.clamp(0, input.len() as i64 - 1) as usize;
    input[clamped] as f64
}

fn interp_linear(input: &[Sample], pos: f64) -> Sample {
    let n0 = pos.floor() as i64;
    let frac = pos - n0 as f64;
    let a = sample_at(input, n0);
    let b = sample_at(input, n0 + 1);
    (a + (b - a) * frac) as Sample
}

fn interp_cubic(input: &[Sample], pos: f64) -> Sample {
    let n0 = pos.floor() as i64;
    let t = pos - n0 as f64;
    let p0 = sample_at(input, n0 - 1);
    let p1 = sample_at(input, n0);
    let p2 = sample_at(input, n0 + 1);
    let p3 = sample_at(input, n0 + 2);

    // Catmull-Rom
    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    (((a * t + b) * t + c) * t + p1) as Sample
}

fn interp_sinc(input: &[Sample], pos: f64, taps: usize, cutoff: f64) -> Sample {
    let half = (taps / 2) as i64;
    let n0 = pos.floor() as i64;

    let mut acc = 0.0;
    let mut weight_sum = 0.0;
    for j in (n0 - half + 1)..=(n0 + half) {
        let x = pos - j as f64;
        let w = sinc(cutoff * x) * cutoff * blackman_harris(x / half as f64);
        acc += sample_at(input, j) * w;
        weight_sum += w;
    }
    // Normalize so DC passes at unity regardless of the fractional phase
    if weight_sum.abs() > 1e-12 {
        (acc / weight_sum) as Sample
    } else {
        0.0
    }
}

#[inline]
fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-9 {
        1.0
    } else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    }
}

/// Blackman-Harris window over x ∈ [-1, 1], zero outside
#[inline]
fn blackman_harris(x: f64) -> f64 {
    if x.abs() >= 1.0 {
        return 0.0;
    }
    let t = std::f64::consts::PI * (x + 1.0) / 2.0;
    0.35875 - 0.48829 * (2.0 * t).cos() + 0.14128 * (4.0 * t).cos() - 0.01168 * (6.0 * t).cos()
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERTER CACHE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ConverterCacheConfig {
    /// Maximum cached converters before LRU eviction
    pub max_entries: usize,
    /// Per-entry lifetime
    pub ttl: Duration,
    /// Budget for a single converter build
    pub build_budget: Duration,
}

impl Default for ConverterCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 16,
            ttl: Duration::from_secs(300),
            build_budget: Duration::from_millis(50),
        }
    }
}

type CacheKey = (AudioFormat, AudioFormat, ConversionQuality);

struct CacheEntry {
    result: Result<Arc<FormatConverter>, EngineError>,
    created: Instant,
    last_used: Instant,
}

/// LRU cache of format converters keyed by `(src, dst, quality)`
pub struct ConverterCache {
    config: ConverterCacheConfig,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ConverterCache {
    pub fn new(config: ConverterCacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a converter, building (and caching) it on miss
    pub fn get(
        &self,
        src: AudioFormat,
        dst: AudioFormat,
        quality: ConversionQuality,
    ) -> EngineResult<Arc<FormatConverter>> {
        let key = (src, dst, quality);
        let now = Instant::now();
        let mut entries = self.entries.lock();

        entries.retain(|_, e| now.duration_since(e.created) < self.config.ttl);

        if let Some(entry) = entries.get_mut(&key) {
            entry.last_used = now;
            return entry.result.clone();
        }

        let start = Instant::now();
        let built = FormatConverter::new(src, dst, quality).map(Arc::new);
        let elapsed = start.elapsed();

        let result = if built.is_ok() && elapsed > self.config.build_budget {
            log::warn!(
                "converter build {src} → {dst} exceeded budget ({} ms)",
                elapsed.as_millis()
            );
            Err(EngineError::ConversionTimeout(elapsed.as_millis() as u64))
        } else {
            built
        };

        if entries.len() >= self.config.max_entries {
            // Evict least recently used
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k)
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                result: result.clone(),
                created: now,
                last_used: now,
            },
        );

        result
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ft_core::BitDepth;

    fn fmt(rate: u32, channels: u16) -> AudioFormat {
        AudioFormat::new(rate, channels, BitDepth::Float32)
    }

    #[test]
    fn mono_to_stereo_broadcast() {
        let conv =
            FormatConverter::new(fmt(44100, 1), fmt(44100, 2), ConversionQuality::Low).unwrap();
        let input = vec![0.5f32; 256];
        let out = conv.convert(&input).unwrap();
        assert_eq!(out.len(), 512);
        for &s in &out {
            assert_eq!(s, 0.5);
        }
    }

    #[test]
    fn stereo_to_mono_average() {
        let conv =
            FormatConverter::new(fmt(48000, 2), fmt(48000, 1), ConversionQuality::Low).unwrap();
        // L = 1.0, R = 0.0 → 0.5
        let input: Vec<f32> = (0..200).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        let out = conv.convert(&input).unwrap();
        assert_eq!(out.len(), 100);
        for &s in &out {
            assert_relative_eq!(s, 0.5);
        }
    }

    #[test]
    fn custom_matrix() {
        // Stereo → quad: front pair copies, rear pair at half gain
        let matrix = vec![
            1.0, 0.0, //
            0.0, 1.0, //
            0.5, 0.0, //
            0.0, 0.5,
        ];
        let conv = FormatConverter::with_matrix(
            fmt(48000, 2),
            fmt(48000, 4),
            ConversionQuality::Low,
            matrix,
        )
        .unwrap();
        let out = conv.convert(&[0.8, 0.4]).unwrap();
        assert_eq!(out, vec![0.8, 0.4, 0.4, 0.2]);
    }

    #[test]
    fn unmappable_without_matrix() {
        let err = FormatConverter::new(fmt(48000, 4), fmt(48000, 6), ConversionQuality::Low)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    }

    #[test]
    fn resample_preserves_tone_rms() {
        // 997 Hz sine, 44.1k → 48k → 44.1k at High quality; RMS must
        // survive within 0.5 dB.
        let sr_a = 44100;
        let sr_b = 48000;
        let input: Vec<f32> = (0..sr_a)
            .map(|i| (2.0 * std::f32::consts::PI * 997.0 * i as f32 / sr_a as f32).sin())
            .collect();

        let up = FormatConverter::new(fmt(sr_a, 1), fmt(sr_b, 1), ConversionQuality::High)
            .unwrap()
            .convert(&input)
            .unwrap();
        let down = FormatConverter::new(fmt(sr_b, 1), fmt(sr_a, 1), ConversionQuality::High)
            .unwrap()
            .convert(&up)
            .unwrap();

        // Compare RMS over the middle to ignore kernel edge effects
        let mid = |buf: &[f32]| {
            let len = buf.len();
            crate::ops::rms(&buf[len / 10..len - len / 10])
        };
        let db = 20.0 * (mid(&down) / mid(&input)).log10();
        assert!(db.abs() < 0.5, "round-trip RMS drift {db} dB");
    }

    #[test]
    fn same_rate_is_identity() {
        let conv =
            FormatConverter::new(fmt(48000, 2), fmt(48000, 2), ConversionQuality::Maximum).unwrap();
        let input = vec![0.1, -0.2, 0.3, -0.4];
        assert_eq!(conv.convert(&input).unwrap(), input);
    }

    #[test]
    fn cache_hit_returns_same_converter() {
        let cache = ConverterCache::new(ConverterCacheConfig::default());
        let a = cache
            .get(fmt(44100, 1), fmt(48000, 2), ConversionQuality::High)
            .unwrap();
        let b = cache
            .get(fmt(44100, 1), fmt(48000, 2), ConversionQuality::High)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_evicts_lru() {
        let cache = ConverterCache::new(ConverterCacheConfig {
            max_entries: 2,
            ..Default::default()
        });
        let rates = [44100, 48000, 88200];
        for rate in rates {
            cache
                .get(fmt(rate, 1), fmt(96000, 1), ConversionQuality::Low)
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn cache_caches_failures() {
        let cache = ConverterCache::new(ConverterCacheConfig::default());
        let err = cache
            .get(fmt(44100, 4), fmt(44100, 6), ConversionQuality::Low)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
        // Failure is cached; second lookup yields the same error class
        let err2 = cache
            .get(fmt(44100, 4), fmt(44100, 6), ConversionQuality::Low)
            .unwrap_err();
        assert_eq!(err, err2);
        assert_eq!(cache.len(), 1);
    }
}
