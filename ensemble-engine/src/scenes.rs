//! Scene snapshots and the slot bank.
//!
//! A snapshot holds parameter configs, generator cursor state and routing, never
//! resolved values. Values are recomputed on restore, so a snapshot still
//! resolves exactly even if a base value moved between save and load.

use std::collections::BTreeMap;
use std::path::Path;

use ensemble_core::generator::{Generator, GeneratorState};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::params::{ParameterConfig, ParameterState, Routing};

/// Current snapshot schema. Anything else is rejected.
pub const SCENE_SCHEMA_VERSION: u32 = 1;

/// Cursor state for one parameter's generators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceStates {
    pub start: GeneratorState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<GeneratorState>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Cycle counter at capture time, if the clock had started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u64>,
    #[serde(default)]
    pub captured_while_playing: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSnapshot {
    pub version: u32,
    pub parameter_configs: BTreeMap<String, ParameterConfig>,
    #[serde(default)]
    pub sequence_states: BTreeMap<String, SequenceStates>,
    #[serde(default)]
    pub routing: BTreeMap<String, Routing>,
    #[serde(default)]
    pub metadata: SceneMetadata,
}

impl SceneSnapshot {
    /// Copy the live parameter set by value.
    pub fn capture(params: &BTreeMap<String, ParameterState>, metadata: SceneMetadata) -> Self {
        let mut parameter_configs = BTreeMap::new();
        let mut sequence_states = BTreeMap::new();
        let mut routing = BTreeMap::new();
        for (name, p) in params {
            parameter_configs.insert(name.clone(), p.config());
            sequence_states.insert(
                name.clone(),
                SequenceStates { start: p.start.state.clone(), end: p.end.as_ref().map(|g| g.state.clone()) },
            );
            if p.routing != Routing::Generator {
                routing.insert(name.clone(), p.routing);
            }
        }
        Self { version: SCENE_SCHEMA_VERSION, parameter_configs, sequence_states, routing, metadata }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != SCENE_SCHEMA_VERSION {
            return Err(EngineError::UnsupportedSceneVersion { found: self.version, expected: SCENE_SCHEMA_VERSION });
        }
        Ok(())
    }

    /// Rebuild live parameters. Missing or mismatched cursor state is regenerated
    /// from the config; every cursor is clamped into its list.
    pub fn to_parameters<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<BTreeMap<String, ParameterState>> {
        self.validate()?;
        let mut out = BTreeMap::new();
        for (name, cfg) in &self.parameter_configs {
            let cfg = ParameterConfig { name: name.clone(), ..cfg.clone() }.normalized();
            let states = self.sequence_states.get(name);
            let start = match states {
                Some(s) => Generator::from_parts(cfg.start_generator.clone(), s.start.clone(), rng),
                None => Generator::new(cfg.start_generator.clone(), rng),
            };
            let end = cfg.end_generator.clone().map(|end_cfg| {
                match states.and_then(|s| s.end.clone()) {
                    Some(state) => Generator::from_parts(end_cfg, state, rng),
                    None => Generator::new(end_cfg, rng),
                }
            });
            let mut p = ParameterState {
                name: name.clone(),
                interpolation: cfg.interpolation,
                start,
                end,
                routing: self.routing.get(name).copied().unwrap_or_default(),
            };
            p.reconcile(rng);
            out.insert(name.clone(), p);
        }
        Ok(out)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and version-check a single snapshot.
    pub fn from_json(text: &str) -> Result<Self> {
        let snap: Self = serde_json::from_str(text)?;
        snap.validate()?;
        Ok(snap)
    }
}

#[derive(Serialize, Deserialize)]
struct BankFile {
    version: u32,
    scenes: BTreeMap<u32, SceneSnapshot>,
}

/// Numbered scene slots.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneBank {
    slots: BTreeMap<u32, SceneSnapshot>,
}

impl SceneBank {
    pub fn new() -> Self { Self::default() }

    /// Store a snapshot, replacing any previous one in that slot.
    pub fn store(&mut self, slot: u32, snapshot: SceneSnapshot) -> Option<SceneSnapshot> {
        self.slots.insert(slot, snapshot)
    }

    pub fn get(&self, slot: u32) -> Result<&SceneSnapshot> {
        self.slots.get(&slot).ok_or(EngineError::EmptySlot(slot))
    }

    pub fn clear(&mut self, slot: u32) -> bool { self.slots.remove(&slot).is_some() }
    pub fn clear_all(&mut self) { self.slots.clear(); }
    pub fn len(&self) -> usize { self.slots.len() }
    pub fn is_empty(&self) -> bool { self.slots.is_empty() }
    pub fn occupied(&self) -> impl Iterator<Item = u32> + '_ { self.slots.keys().copied() }

    pub fn to_json(&self) -> Result<String> {
        let file = BankFile { version: SCENE_SCHEMA_VERSION, scenes: self.slots.clone() };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Parse a whole bank. Any bad version fails the import; nothing is partially loaded.
    pub fn from_json(text: &str) -> Result<Self> {
        let file: BankFile = serde_json::from_str(text)?;
        if file.version != SCENE_SCHEMA_VERSION {
            return Err(EngineError::UnsupportedSceneVersion { found: file.version, expected: SCENE_SCHEMA_VERSION });
        }
        for snap in file.scenes.values() {
            snap.validate()?;
        }
        Ok(Self { slots: file.scenes })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), scenes = self.slots.len(), "scene bank saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bank = Self::from_json(&std::fs::read_to_string(path)?)?;
        info!(path = %path.display(), scenes = bank.slots.len(), "scene bank loaded");
        Ok(bank)
    }
}
