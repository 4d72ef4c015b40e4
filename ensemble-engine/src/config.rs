//! Engine configuration, loadable from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed one-way network delay used until a measured RTT is available.
    pub network_delay_ms: f64,
    /// Beacons this close to phase 0 are treated as end-of-cycle.
    pub eoc_epsilon: f64,
    /// Proportional correction applied on end-of-cycle beacons.
    pub eoc_correction: f64,
    /// Proportional correction applied on intra-cycle step beacons.
    pub step_correction: f64,
    /// EMA weight for new RTT samples.
    pub rtt_smoothing: f64,
    /// Glide used for paused edits when the sender gives none.
    pub default_portamento_ms: f64,
    /// Leader heartbeat period while paused.
    pub heartbeat_interval_ms: f64,
    pub default_cycle_length: f64,
    pub default_steps_per_cycle: u32,
    /// Fixed RNG seed; `None` seeds from entropy so peers diverge stochastically.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network_delay_ms: 40.0,
            eoc_epsilon: 0.01,
            eoc_correction: 0.8,
            step_correction: 0.4,
            rtt_smoothing: 0.2,
            default_portamento_ms: 150.0,
            heartbeat_interval_ms: 1000.0,
            default_cycle_length: 4.0,
            default_steps_per_cycle: 4,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        Ok(cfg.sanitized())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Clamp values into their meaningful ranges.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        let finite_or = |v: f64, fallback: f64| if v.is_finite() { v } else { fallback };
        self.network_delay_ms = finite_or(self.network_delay_ms, d.network_delay_ms);
        self.eoc_epsilon = finite_or(self.eoc_epsilon, d.eoc_epsilon);
        self.eoc_correction = finite_or(self.eoc_correction, d.eoc_correction);
        self.step_correction = finite_or(self.step_correction, d.step_correction);
        self.rtt_smoothing = finite_or(self.rtt_smoothing, d.rtt_smoothing);
        self.default_portamento_ms = finite_or(self.default_portamento_ms, d.default_portamento_ms);
        self.heartbeat_interval_ms = finite_or(self.heartbeat_interval_ms, d.heartbeat_interval_ms);
        self.default_cycle_length = finite_or(self.default_cycle_length, d.default_cycle_length);

        self.network_delay_ms = self.network_delay_ms.max(0.0);
        self.eoc_epsilon = self.eoc_epsilon.clamp(0.0, 0.25);
        self.eoc_correction = self.eoc_correction.clamp(0.0, 1.0);
        self.step_correction = self.step_correction.clamp(0.0, 1.0);
        self.rtt_smoothing = self.rtt_smoothing.clamp(0.0, 1.0);
        self.default_portamento_ms = self.default_portamento_ms.max(0.0);
        self.heartbeat_interval_ms = self.heartbeat_interval_ms.max(10.0);
        if !(self.default_cycle_length > 0.0) {
            self.default_cycle_length = 4.0;
        }
        self.default_steps_per_cycle = self.default_steps_per_cycle.max(1);
        self
    }
}
