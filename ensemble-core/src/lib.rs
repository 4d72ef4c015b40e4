//! Ensemble Core: phase math, sequence notation and value generators.
//!
//! Modules
//! - [`phase`]     : wrap/delta helpers for a cycle phase in [0, 1)
//! - [`notation`]  : `"1-3,5"` style integer list parsing with a `[1]` fallback
//! - [`sequence`]  : sequencing behaviors and the per-axis cursor
//! - [`generator`] : periodic (harmonic ratio) and normalised (range) generators
//! - [`glide`]     : portamento ramps for the rendering side
//!
//! Design
//! - Pure data + explicit RNG: every random choice takes a caller-owned `Rng`
//! - `peek` never mutates; `advance` mutates only the generator it is called on
//! - Everything a scene needs to persist is `Clone + Serialize`

pub mod generator;
pub mod glide;
pub mod notation;
pub mod phase;
pub mod sequence;

/// Commonly used types/functions for convenience:
pub mod prelude {
    pub use crate::generator::{Generator, GeneratorConfig, GeneratorState, ResolveMode, ValueRange};
    pub use crate::glide::{GlideCurve, GlideRamp};
    pub use crate::notation::{format_sequence, parse_or_default, Sequence};
    pub use crate::phase::{near_cycle_start, phase_delta, wrap_phase01, EOC_EPSILON};
    pub use crate::sequence::{AxisCursor, SequenceBehavior};
}
