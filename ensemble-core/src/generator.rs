//! Value generators: resolve one parameter value from a compact description.
//!
//! Two kinds exist:
//! - `Periodic`   : `base_value * numerator / denominator`, each axis walked by its own behavior
//! - `Normalised` : a scalar drawn from a constant or a `[min, max]` range
//!
//! A [`Generator`] pairs the declarative [`GeneratorConfig`] with its mutable
//! [`GeneratorState`]. `peek` never touches the state; `advance` is the only way
//! cursors move, and it only moves this generator's own cursors.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::notation::Sequence;
use crate::sequence::{AxisCursor, SequenceBehavior};

/// Resolution mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResolveMode {
    /// Side-effect free; returns what the next advance would yield.
    Peek,
    /// Yield the current value and move the cursors.
    Advance,
}

/// A constant or a closed interval.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueRange {
    Constant(f64),
    Bounds { min: f64, max: f64 },
}

impl ValueRange {
    /// `(lo, hi)` with `lo <= hi`. A constant is a zero-width interval.
    #[inline]
    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            ValueRange::Constant(v) => (v, v),
            ValueRange::Bounds { min, max } => if min <= max { (min, max) } else { (max, min) },
        }
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let (lo, hi) = self.bounds();
        if hi > lo && lo.is_finite() && hi.is_finite() { rng.gen_range(lo..=hi) } else { lo }
    }

    #[inline]
    fn clamp(&self, v: f64) -> f64 {
        let (lo, hi) = self.bounds();
        if v.is_finite() { v.clamp(lo, hi) } else { lo }
    }
}

impl Default for ValueRange {
    fn default() -> Self { ValueRange::Bounds { min: 0.0, max: 1.0 } }
}

/// Declarative generator description, as sent in program updates and stored in scenes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum GeneratorConfig {
    #[serde(alias = "hrg")]
    Periodic {
        #[serde(default)]
        numerators: Sequence,
        #[serde(default)]
        denominators: Sequence,
        #[serde(default)]
        numerator_behavior: SequenceBehavior,
        #[serde(default)]
        denominator_behavior: SequenceBehavior,
        base_value: f64,
    },
    #[serde(alias = "normalized", alias = "rbg")]
    Normalised {
        #[serde(default)]
        range: ValueRange,
        /// Only `static` holds; every other behavior draws afresh on each advance.
        #[serde(default)]
        sequence_behavior: SequenceBehavior,
    },
}

impl GeneratorConfig {
    pub fn periodic(numerators: &str, denominators: &str, base_value: f64) -> Self {
        GeneratorConfig::Periodic {
            numerators: Sequence::parse(numerators),
            denominators: Sequence::parse(denominators),
            numerator_behavior: SequenceBehavior::Static,
            denominator_behavior: SequenceBehavior::Static,
            base_value,
        }
    }

    pub fn normalised(range: ValueRange, behavior: SequenceBehavior) -> Self {
        GeneratorConfig::Normalised { range, sequence_behavior: behavior }
    }

    pub fn constant(value: f64) -> Self {
        Self::normalised(ValueRange::Constant(value), SequenceBehavior::Static)
    }

    /// Builder: set both axis behaviors of a periodic config. No-op for `Normalised`.
    #[must_use]
    pub fn with_behaviors(mut self, num: SequenceBehavior, den: SequenceBehavior) -> Self {
        if let GeneratorConfig::Periodic { numerator_behavior, denominator_behavior, .. } = &mut self {
            *numerator_behavior = num;
            *denominator_behavior = den;
        }
        self
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            GeneratorConfig::Periodic { .. } => "periodic",
            GeneratorConfig::Normalised { .. } => "normalised",
        }
    }
}

/// Sequencing state of one generator instance. Never holds resolved periodic values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GeneratorState {
    Periodic { numerator: AxisCursor, denominator: AxisCursor },
    /// `value` is what the next advance yields (the held value for `static`).
    Normalised { value: f64 },
}

impl GeneratorState {
    pub fn seed<R: Rng + ?Sized>(config: &GeneratorConfig, rng: &mut R) -> Self {
        match config {
            GeneratorConfig::Periodic { numerators, denominators, numerator_behavior, denominator_behavior, .. } => {
                GeneratorState::Periodic {
                    numerator: AxisCursor::new(*numerator_behavior, numerators.len(), rng),
                    denominator: AxisCursor::new(*denominator_behavior, denominators.len(), rng),
                }
            }
            GeneratorConfig::Normalised { range, .. } => GeneratorState::Normalised { value: range.draw(rng) },
        }
    }
}

#[inline]
fn ratio(base: f64, num: u32, den: u32) -> f64 {
    let den = if den == 0 { 1 } else { den };
    base * f64::from(num) / f64::from(den)
}

/// Config + state for one value slot (a parameter's start or end value).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub config: GeneratorConfig,
    pub state: GeneratorState,
}

impl Generator {
    pub fn new<R: Rng + ?Sized>(config: GeneratorConfig, rng: &mut R) -> Self {
        let state = GeneratorState::seed(&config, rng);
        Self { config, state }
    }

    /// Rebuild from stored parts, repairing the state against the config.
    pub fn from_parts<R: Rng + ?Sized>(config: GeneratorConfig, state: GeneratorState, rng: &mut R) -> Self {
        let mut g = Self { config, state };
        g.reconcile(rng);
        g
    }

    pub fn resolve<R: Rng + ?Sized>(&mut self, mode: ResolveMode, rng: &mut R) -> f64 {
        match mode {
            ResolveMode::Peek => self.peek(),
            ResolveMode::Advance => self.advance(rng),
        }
    }

    /// Value the next advance would yield. Pure.
    pub fn peek(&self) -> f64 {
        match (&self.config, &self.state) {
            (GeneratorConfig::Periodic { numerators, denominators, base_value, .. },
             GeneratorState::Periodic { numerator, denominator }) => ratio(
                *base_value,
                numerators.get_clamped(numerator.current(numerators.len())),
                denominators.get_clamped(denominator.current(denominators.len())),
            ),
            (GeneratorConfig::Normalised { range, .. }, GeneratorState::Normalised { value }) => range.clamp(*value),
            // Mismatched pairs are repaired by `reconcile`; until then resolve the config's first value.
            (GeneratorConfig::Periodic { numerators, denominators, base_value, .. }, _) => {
                ratio(*base_value, numerators.get_clamped(0), denominators.get_clamped(0))
            }
            (GeneratorConfig::Normalised { range, .. }, _) => range.bounds().0,
        }
    }

    /// Yield the current value and move this generator's cursors.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        if !self.state_matches_config() {
            self.state = GeneratorState::seed(&self.config, rng);
        }
        match (&self.config, &mut self.state) {
            (GeneratorConfig::Periodic { numerators, denominators, numerator_behavior, denominator_behavior, base_value },
             GeneratorState::Periodic { numerator, denominator }) => {
                let n = numerator.advance(*numerator_behavior, numerators.len(), rng);
                let d = denominator.advance(*denominator_behavior, denominators.len(), rng);
                ratio(*base_value, numerators.get_clamped(n), denominators.get_clamped(d))
            }
            (GeneratorConfig::Normalised { range, sequence_behavior }, GeneratorState::Normalised { value }) => {
                let out = range.clamp(*value);
                if *sequence_behavior != SequenceBehavior::Static {
                    *value = range.draw(rng);
                }
                out
            }
            _ => unreachable!("state reseeded above"),
        }
    }

    /// Re-roll every `static` pick of this generator.
    pub fn reroll_static<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        match (&self.config, &mut self.state) {
            (GeneratorConfig::Periodic { numerators, denominators, numerator_behavior, denominator_behavior, .. },
             GeneratorState::Periodic { numerator, denominator }) => {
                numerator.reroll_static(*numerator_behavior, numerators.len(), rng);
                denominator.reroll_static(*denominator_behavior, denominators.len(), rng);
            }
            (GeneratorConfig::Normalised { range, sequence_behavior: SequenceBehavior::Static },
             GeneratorState::Normalised { value }) => *value = range.draw(rng),
            _ => {}
        }
    }

    /// Clamp cursors into the current lists and regenerate anything that no longer fits.
    pub fn reconcile<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if !self.state_matches_config() {
            self.state = GeneratorState::seed(&self.config, rng);
            return;
        }
        match (&self.config, &mut self.state) {
            (GeneratorConfig::Periodic { numerators, denominators, numerator_behavior, denominator_behavior, .. },
             GeneratorState::Periodic { numerator, denominator }) => {
                numerator.reconcile(*numerator_behavior, numerators.len(), rng);
                denominator.reconcile(*denominator_behavior, denominators.len(), rng);
            }
            (GeneratorConfig::Normalised { range, .. }, GeneratorState::Normalised { value }) => *value = range.clamp(*value),
            _ => {}
        }
    }

    /// Replace the config wholesale and reseed the state.
    pub fn replace_config<R: Rng + ?Sized>(&mut self, config: GeneratorConfig, rng: &mut R) {
        self.state = GeneratorState::seed(&config, rng);
        self.config = config;
    }

    fn state_matches_config(&self) -> bool {
        matches!(
            (&self.config, &self.state),
            (GeneratorConfig::Periodic { .. }, GeneratorState::Periodic { .. })
                | (GeneratorConfig::Normalised { .. }, GeneratorState::Normalised { .. })
        )
    }
}
