//! Parameter state model.
//!
//! Each musical parameter owns its interpolation mode, a start generator, an
//! optional end generator (only for `glide`), and a routing mode that decides
//! whether the audible value comes from the generators or from a constant.
//!
//! Program updates replace a parameter wholesale; sub-parameter updates patch a
//! single field and keep the cursors where they are (clamped if a list shrank).

use ensemble_core::generator::{Generator, GeneratorConfig, ResolveMode, ValueRange};
use ensemble_core::notation::Sequence;
use ensemble_core::sequence::SequenceBehavior;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Hold one value for the whole cycle.
    #[default]
    #[serde(alias = "disc")]
    Step,
    /// Move from a start to an end value across the cycle.
    #[serde(alias = "cont", alias = "cosine")]
    Glide,
}

/// Where a parameter's audible value comes from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Routing {
    #[default]
    Generator,
    Constant { value: f64 },
}

/// Declarative description of one parameter, as carried by `PROGRAM_UPDATE`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub interpolation: Interpolation,
    #[serde(alias = "startValueGenerator")]
    pub start_generator: GeneratorConfig,
    #[serde(default, alias = "endValueGenerator", skip_serializing_if = "Option::is_none")]
    pub end_generator: Option<GeneratorConfig>,
}

impl ParameterConfig {
    pub fn step(name: &str, generator: GeneratorConfig) -> Self {
        Self { name: name.to_string(), interpolation: Interpolation::Step, start_generator: generator, end_generator: None }
    }

    pub fn glide(name: &str, start: GeneratorConfig, end: GeneratorConfig) -> Self {
        Self { name: name.to_string(), interpolation: Interpolation::Glide, start_generator: start, end_generator: Some(end) }
    }

    /// Enforce "end generator present iff glide".
    #[must_use]
    pub fn normalized(mut self) -> Self {
        match self.interpolation {
            Interpolation::Step => self.end_generator = None,
            Interpolation::Glide => {
                if self.end_generator.is_none() {
                    self.end_generator = Some(self.start_generator.clone());
                }
            }
        }
        self
    }
}

/// The only thing handed to the audio collaborator.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEnvelope {
    pub start_value: f64,
    pub end_value: f64,
    pub interpolation: Interpolation,
    pub portamento_ms: f64,
}

impl ResolvedEnvelope {
    pub fn constant(value: f64, portamento_ms: f64) -> Self {
        Self { start_value: value, end_value: value, interpolation: Interpolation::Step, portamento_ms }
    }

    #[must_use]
    pub fn with_portamento(mut self, portamento_ms: f64) -> Self {
        self.portamento_ms = portamento_ms.max(0.0);
        self
    }
}

/// Live state of one parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterState {
    pub name: String,
    pub interpolation: Interpolation,
    pub start: Generator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Generator>,
    #[serde(default)]
    pub routing: Routing,
}

impl ParameterState {
    pub fn new<R: Rng + ?Sized>(config: ParameterConfig, rng: &mut R) -> Self {
        let config = config.normalized();
        Self {
            name: config.name,
            interpolation: config.interpolation,
            start: Generator::new(config.start_generator, rng),
            end: config.end_generator.map(|c| Generator::new(c, rng)),
            routing: Routing::Generator,
        }
    }

    /// Declarative view, rebuilt from the generators.
    pub fn config(&self) -> ParameterConfig {
        ParameterConfig {
            name: self.name.clone(),
            interpolation: self.interpolation,
            start_generator: self.start.config.clone(),
            end_generator: self.end.as_ref().map(|g| g.config.clone()),
        }
    }

    /// Wholesale replace; routing is kept, cursors are reseeded.
    pub fn replace<R: Rng + ?Sized>(&mut self, config: ParameterConfig, rng: &mut R) {
        let routing = self.routing;
        *self = Self::new(config, rng);
        self.routing = routing;
    }

    pub fn resolve<R: Rng + ?Sized>(&mut self, mode: ResolveMode, rng: &mut R, portamento_ms: f64) -> ResolvedEnvelope {
        if let Routing::Constant { value } = self.routing {
            return ResolvedEnvelope::constant(value, portamento_ms);
        }
        let start_value = self.start.resolve(mode, rng);
        let end_value = match (self.interpolation, self.end.as_mut()) {
            (Interpolation::Glide, Some(end)) => end.resolve(mode, rng),
            _ => start_value,
        };
        ResolvedEnvelope { start_value, end_value, interpolation: self.interpolation, portamento_ms }
    }

    pub fn reroll_static<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.start.reroll_static(rng);
        if let Some(end) = self.end.as_mut() {
            end.reroll_static(rng);
        }
    }

    /// Repair cursors against the configs (used after restore).
    pub fn reconcile<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        match self.interpolation {
            Interpolation::Step => self.end = None,
            Interpolation::Glide => {
                if self.end.is_none() {
                    self.end = Some(Generator::new(self.start.config.clone(), rng));
                }
            }
        }
        self.start.reconcile(rng);
        if let Some(end) = self.end.as_mut() {
            end.reconcile(rng);
        }
    }

    /// Patch one field. `field` is the path below the parameter name, e.g.
    /// `["startValueGenerator", "numerators"]` or `["interpolation"]`.
    pub fn patch<R: Rng + ?Sized>(&mut self, full_path: &str, field: &[&str], value: &Value, rng: &mut R) -> Result<()> {
        match field {
            [f] if key(f) == "interpolation" => {
                self.interpolation = serde_json::from_value(value.clone())
                    .map_err(|e| EngineError::invalid_value(full_path, e.to_string()))?;
                self.reconcile(rng);
                Ok(())
            }
            [slot, f] => {
                let gen = match key(slot).as_str() {
                    "startvaluegenerator" | "startgenerator" | "start" => &mut self.start,
                    "endvaluegenerator" | "endgenerator" | "end" => {
                        if self.end.is_none() {
                            self.end = Some(Generator::new(self.start.config.clone(), rng));
                        }
                        match self.end.as_mut() {
                            Some(g) => g,
                            None => return Err(EngineError::InvalidPath(full_path.to_string())),
                        }
                    }
                    _ => return Err(EngineError::InvalidPath(full_path.to_string())),
                };
                patch_generator(&mut gen.config, full_path, f, value)?;
                gen.reconcile(rng);
                Ok(())
            }
            _ => Err(EngineError::InvalidPath(full_path.to_string())),
        }
    }
}

/// Case- and underscore-insensitive field key.
fn key(s: &str) -> String {
    s.chars().filter(|c| *c != '_').flat_map(char::to_lowercase).collect()
}

fn number(path: &str, v: &Value) -> Result<f64> {
    match v {
        Value::Number(n) => n.as_f64().ok_or_else(|| EngineError::invalid_value(path, "not a finite number")),
        Value::String(s) => s.trim().parse().map_err(|_| EngineError::invalid_value(path, "not a number")),
        _ => Err(EngineError::invalid_value(path, "expected a number")),
    }
}

fn behavior(path: &str, v: &Value) -> Result<SequenceBehavior> {
    v.as_str()
        .and_then(SequenceBehavior::from_name)
        .ok_or_else(|| EngineError::invalid_value(path, "expected a sequence behavior name"))
}

fn sequence(path: &str, v: &Value) -> Result<Sequence> {
    match v {
        // bare numbers are a one-element list
        Value::Number(_) => Ok(Sequence::parse(&v.to_string())),
        _ => serde_json::from_value(v.clone()).map_err(|e| EngineError::invalid_value(path, e.to_string())),
    }
}

fn patch_generator(cfg: &mut GeneratorConfig, path: &str, field: &str, v: &Value) -> Result<()> {
    let bad_path = || EngineError::InvalidPath(path.to_string());
    match cfg {
        GeneratorConfig::Periodic { numerators, denominators, numerator_behavior, denominator_behavior, base_value } => {
            match key(field).as_str() {
                "basevalue" => *base_value = number(path, v)?,
                "numerators" => *numerators = sequence(path, v)?,
                "denominators" => *denominators = sequence(path, v)?,
                "numeratorbehavior" => *numerator_behavior = behavior(path, v)?,
                "denominatorbehavior" => *denominator_behavior = behavior(path, v)?,
                _ => return Err(bad_path()),
            }
        }
        GeneratorConfig::Normalised { range, sequence_behavior } => match key(field).as_str() {
            "range" => {
                *range = serde_json::from_value(v.clone()).map_err(|e| EngineError::invalid_value(path, e.to_string()))?;
            }
            "min" | "max" => {
                let x = number(path, v)?;
                let (lo, hi) = range.bounds();
                *range = if key(field) == "min" {
                    ValueRange::Bounds { min: x, max: hi }
                } else {
                    ValueRange::Bounds { min: lo, max: x }
                };
            }
            "sequencebehavior" | "behavior" => *sequence_behavior = behavior(path, v)?,
            _ => return Err(bad_path()),
        },
    }
    Ok(())
}
