//! Portamento ramps for rendering resolved envelopes.
//!
//! Provided primitives:
//! - `GlideCurve` : linear / cosine / parabolic shaping of a 0..1 ramp position
//! - `GlideRamp`  : per-sample ramp from the current value to a target over N ms
//!
//! The engine only hands out targets and glide times; shaping belongs here, on
//! the rendering side. Allocation free; one `next()` per sample.

use serde::{Deserialize, Serialize};

/// Shape applied to the normalised ramp position `t` in [0, 1].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlideCurve {
    #[default]
    Linear,
    /// Half-cosine ease in/out.
    Cosine,
    /// Fast start, slow landing.
    Parabolic,
}

impl GlideCurve {
    #[inline]
    pub fn shape(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            GlideCurve::Linear => t,
            GlideCurve::Cosine => 0.5 - 0.5 * (core::f64::consts::PI * t).cos(),
            GlideCurve::Parabolic => 1.0 - (1.0 - t) * (1.0 - t),
        }
    }
}

/// Ramp toward a target value over a fixed duration.
#[derive(Copy, Clone, Debug)]
pub struct GlideRamp {
    curve: GlideCurve,
    from: f64,
    to: f64,
    value: f64,
    // ramp position in samples
    pos: u64,
    len: u64,
}

impl GlideRamp {
    #[inline]
    pub fn new(initial: f64, curve: GlideCurve) -> Self {
        Self { curve, from: initial, to: initial, value: initial, pos: 0, len: 0 }
    }

    #[inline] pub fn set_curve(&mut self, curve: GlideCurve) { self.curve = curve; }

    /// Start gliding from wherever we are now to `target` over `glide_ms`.
    /// A zero glide snaps on the next sample.
    pub fn set_target(&mut self, target: f64, glide_ms: f64, sr: f64) {
        self.from = self.value;
        self.to = target;
        self.pos = 0;
        self.len = if glide_ms > 0.0 && sr > 0.0 { (glide_ms * 0.001 * sr).round() as u64 } else { 0 };
        if self.len == 0 {
            self.value = target;
        }
    }

    /// Jump immediately, cancelling any running glide.
    #[inline]
    pub fn snap(&mut self, value: f64) {
        self.from = value;
        self.to = value;
        self.value = value;
        self.pos = 0;
        self.len = 0;
    }

    /// Advance by one sample.
    #[inline]
    pub fn next(&mut self) -> f64 {
        if self.pos < self.len {
            self.pos += 1;
            let t = self.pos as f64 / self.len as f64;
            self.value = self.from + (self.to - self.from) * self.curve.shape(t);
        } else {
            self.value = self.to;
        }
        self.value
    }

    #[inline] pub fn value(&self) -> f64 { self.value }
    #[inline] pub fn target(&self) -> f64 { self.to }
    #[inline] pub fn is_gliding(&self) -> bool { self.pos < self.len }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curves_hit_their_endpoints() {
        for c in [GlideCurve::Linear, GlideCurve::Cosine, GlideCurve::Parabolic] {
            assert!(c.shape(0.0).abs() < 1e-12, "{c:?}");
            assert!((c.shape(1.0) - 1.0).abs() < 1e-12, "{c:?}");
        }
    }

    #[test]
    fn ramp_reaches_target_in_time() {
        let sr = 48_000.0;
        let mut g = GlideRamp::new(100.0, GlideCurve::Cosine);
        g.set_target(200.0, 10.0, sr);
        assert!(g.is_gliding());
        for _ in 0..480 { g.next(); }
        assert!((g.value() - 200.0).abs() < 1e-9);
        assert!(!g.is_gliding());
    }

    #[test]
    fn zero_glide_snaps() {
        let mut g = GlideRamp::new(1.0, GlideCurve::Linear);
        g.set_target(3.0, 0.0, 48_000.0);
        assert_eq!(g.value(), 3.0);
        assert_eq!(g.next(), 3.0);
    }
}
