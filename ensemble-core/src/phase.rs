//! Phase and timing helpers shared by the clock reconstructor and the leader.
//!
//! Conventions:
//! - Phase is a fraction of one cycle, normalised to **[0, 1)**.
//! - Times are **seconds** as `f64` (audio-clock time on followers, elapsed time on the leader).
//! - Everything here is pure and side-effect free.

/// Default tolerance used when deciding whether a phase sits on a cycle boundary.
pub const EOC_EPSILON: f64 = 0.01;

/// Wrap any phase into [0, 1).
#[inline]
pub fn wrap_phase01(p: f64) -> f64 {
    if !p.is_finite() {
        return 0.0;
    }
    let w = p - p.floor();
    // `p - floor(p)` can round up to exactly 1.0 for tiny negative inputs.
    if w >= 1.0 { 0.0 } else { w }
}

/// Signed shortest distance from phase `from` to phase `to`, in (-0.5, 0.5].
///
/// A positive result means `to` lies ahead of `from`.
#[inline]
pub fn phase_delta(from: f64, to: f64) -> f64 {
    let d = wrap_phase01(to - from);
    if d > 0.5 { d - 1.0 } else { d }
}

/// `true` if `phase` is within `epsilon` of the 1.0 → 0.0 wrap, on either side.
#[inline]
pub fn near_cycle_start(phase: f64, epsilon: f64) -> bool {
    phase_delta(0.0, phase).abs() <= epsilon
}

#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Exponential moving-average step: move `current` toward `sample` by `alpha` in [0, 1].
#[inline]
pub fn smooth_toward(current: f64, sample: f64, alpha: f64) -> f64 {
    lerp(current, sample, alpha.clamp(0.0, 1.0))
}

/// Phase advance per second for a cycle of `cycle_length` seconds.
/// Non-positive or non-finite lengths yield 0 (the clock holds).
#[inline]
pub fn phase_rate(cycle_length: f64) -> f64 {
    if cycle_length.is_finite() && cycle_length > 0.0 { 1.0 / cycle_length } else { 0.0 }
}
