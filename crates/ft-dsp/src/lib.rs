//! ft-dsp: Per-buffer DSP transforms, parameter smoothing, and format
//! conversion for Ferrotone
//!
//! Everything here is audio-thread-clean unless noted: the transforms
//! in [`ops`] never allocate, and the smoothers are wait-free. The
//! format converter and its cache are control-plane components.

pub mod ops;
pub mod smoothing;
pub mod convert;

pub use ops::*;
pub use smoothing::{LinearSmoother, SharedSmoother, SmootherHandle};
pub use convert::{ConversionQuality, ConverterCache, ConverterCacheConfig, FormatConverter};
