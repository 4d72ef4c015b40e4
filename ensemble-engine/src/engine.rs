//! `SynthesisEngine`: the control-side owner of every parameter, generator
//! cursor, staged change and scene slot.
//!
//! Every change updates the declarative parameter store at once. What happens
//! audibly depends on the transport:
//! - paused  : peek-resolve and push the envelope now, with a glide
//! - playing : push nothing; the next cycle boundary picks it up
//!
//! A boundary applies one batch, in this order:
//! re-roll static picks (if requested) → advance every parameter → staged
//! value overrides → staged scene load → staged routing switches → staged
//! captures. The batch goes out as a single `SET_ALL_ENV` with zero glide.

use std::collections::BTreeMap;

use ensemble_core::generator::ResolveMode;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::ClockEvent;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::messages::{EnvelopeSink, Inbound};
use crate::params::{ParameterConfig, ParameterState, ResolvedEnvelope, Routing};
use crate::scenes::{SceneBank, SceneMetadata, SceneSnapshot};
use crate::staging::{StagedBatch, StagingArea};

/// One change to one parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamChange {
    /// Wholesale replace (or create).
    Replace(ParameterConfig),
    /// Single-field patch; `path` is the full dotted path including the parameter name.
    Patch { path: String, value: Value },
    /// Play this constant for one cycle (or right away while paused).
    Value(f64),
}

pub struct SynthesisEngine {
    config: EngineConfig,
    params: BTreeMap<String, ParameterState>,
    last_values: BTreeMap<String, ResolvedEnvelope>,
    staging: StagingArea,
    scenes: SceneBank,
    playing: bool,
    cycle: Option<u64>,
    rng: StdRng,
}

impl SynthesisEngine {
    pub fn new(config: EngineConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            params: BTreeMap::new(),
            last_values: BTreeMap::new(),
            staging: StagingArea::new(),
            scenes: SceneBank::new(),
            playing: false,
            cycle: None,
            rng,
        }
    }

    // ------------------------------------------------------------------ queries

    #[inline] pub fn config(&self) -> &EngineConfig { &self.config }
    #[inline] pub fn is_playing(&self) -> bool { self.playing }
    #[inline] pub fn cycle(&self) -> Option<u64> { self.cycle }
    #[inline] pub fn params(&self) -> &BTreeMap<String, ParameterState> { &self.params }
    #[inline] pub fn param(&self, name: &str) -> Option<&ParameterState> { self.params.get(name) }
    #[inline] pub fn staging(&self) -> &StagingArea { &self.staging }
    #[inline] pub fn scenes(&self) -> &SceneBank { &self.scenes }

    /// Replace the whole bank (e.g. after loading it from disk).
    pub fn set_scenes(&mut self, bank: SceneBank) { self.scenes = bank; }

    /// Last envelope pushed to the sink for `name`.
    pub fn last_envelope(&self, name: &str) -> Option<&ResolvedEnvelope> { self.last_values.get(name) }

    /// Start value the parameter would play next. Never fails: an unknown
    /// parameter yields its last pushed value, or 0.
    pub fn current_value(&self, name: &str) -> f64 {
        match self.params.get(name) {
            Some(p) => match p.routing {
                Routing::Constant { value } => value,
                Routing::Generator => p.start.peek(),
            },
            None => self.last_values.get(name).map_or(0.0, |e| e.start_value),
        }
    }

    fn glide_or_default(&self, glide: Option<f64>) -> f64 {
        glide.filter(|g| g.is_finite()).unwrap_or(self.config.default_portamento_ms).max(0.0)
    }

    // ------------------------------------------------------------------ dispatch

    /// Handle one control message. Clock-bound messages are ignored here.
    pub fn handle(&mut self, msg: Inbound, sink: &mut impl EnvelopeSink) -> Result<()> {
        match msg {
            Inbound::ProgramUpdate { portamento_ms, parameters } => self.apply_program(parameters, portamento_ms, sink),
            Inbound::SubParamUpdate { path, value, portamento_ms } => {
                self.apply_sub_param(&path, value, portamento_ms, sink)
            }
            Inbound::SaveScene { slot } => {
                self.save_scene(slot);
                Ok(())
            }
            Inbound::LoadScene { slot, portamento_ms } => self.restore(slot, portamento_ms, sink),
            Inbound::ClearScene { slot } => {
                self.clear_scene(slot);
                Ok(())
            }
            Inbound::ClearBanks => {
                self.clear_banks();
                Ok(())
            }
            Inbound::ReresolveAtEoc => {
                self.request_reresolve();
                Ok(())
            }
            Inbound::ParamValue { param, value, portamento_ms } => {
                self.apply_change(&param, ParamChange::Value(value), portamento_ms, sink)
            }
            Inbound::Routing { param, routing } => self.set_routing(&param, routing, None, sink),
            other @ (Inbound::PhasorSync(_) | Inbound::Transport { .. } | Inbound::JumpToEoc) => {
                debug!(kind = other.kind(), "clock message ignored by control");
                Ok(())
            }
        }
    }

    pub fn on_clock_event(&mut self, event: ClockEvent, sink: &mut impl EnvelopeSink) {
        match event {
            ClockEvent::CycleBoundary { cycle } => self.on_cycle_boundary(cycle, sink),
            ClockEvent::Step { .. } => {}
            ClockEvent::PlayState { playing } => self.set_playing(playing, sink),
        }
    }

    /// Follow the clock's play state. Going paused flushes whatever was staged,
    /// since no boundary is coming to apply it.
    pub fn set_playing(&mut self, playing: bool, sink: &mut impl EnvelopeSink) {
        if playing == self.playing {
            return;
        }
        self.playing = playing;
        info!(playing, "transport state");
        if playing {
            return;
        }
        let mut batch = self.staging.take();
        if std::mem::take(&mut batch.reresolve) {
            self.staging.request_reresolve();
        }
        if batch.is_empty() {
            return;
        }
        let glide = self.config.default_portamento_ms;
        let mut out = BTreeMap::new();
        for name in std::mem::take(&mut batch.edited) {
            if let Some(p) = self.params.get_mut(&name) {
                out.insert(name, p.resolve(ResolveMode::Peek, &mut self.rng, glide));
            }
        }
        self.apply_staged(batch, &mut out, ResolveMode::Peek, glide);
        self.emit_all(out, sink);
    }

    // ------------------------------------------------------------------ changes

    /// Apply a multi-parameter program update. Paused edits go out as one `SET_ALL_ENV`.
    pub fn apply_program(
        &mut self,
        parameters: BTreeMap<String, ParameterConfig>,
        glide: Option<f64>,
        sink: &mut impl EnvelopeSink,
    ) -> Result<()> {
        let glide = self.glide_or_default(glide);
        let mut out = BTreeMap::new();
        info!(params = parameters.len(), playing = self.playing, "program update");
        for (name, cfg) in parameters {
            self.upsert(&name, cfg);
            if !self.playing {
                if let Some(p) = self.params.get_mut(&name) {
                    out.insert(name, p.resolve(ResolveMode::Peek, &mut self.rng, glide));
                }
            }
        }
        self.emit_all(out, sink);
        Ok(())
    }

    /// `frequency.startValueGenerator.numerators` style single-field update.
    pub fn apply_sub_param(
        &mut self,
        path: &str,
        value: Value,
        glide: Option<f64>,
        sink: &mut impl EnvelopeSink,
    ) -> Result<()> {
        let name = match path.split_once('.') {
            Some((name, rest)) if !name.is_empty() && !rest.is_empty() => name,
            _ => return Err(EngineError::InvalidPath(path.to_string())),
        };
        self.apply_change(name, ParamChange::Patch { path: path.to_string(), value }, glide, sink)
    }

    pub fn apply_change(
        &mut self,
        name: &str,
        change: ParamChange,
        glide: Option<f64>,
        sink: &mut impl EnvelopeSink,
    ) -> Result<()> {
        let glide = self.glide_or_default(glide);
        match change {
            ParamChange::Replace(cfg) => self.upsert(name, cfg),
            ParamChange::Patch { path, value } => {
                let p = self.params.get_mut(name).ok_or_else(|| EngineError::UnknownParameter(name.to_string()))?;
                let field: Vec<&str> = path.split('.').skip(1).collect();
                p.patch(&path, &field, &value, &mut self.rng)?;
                self.staging.drop_override(name);
                if self.playing {
                    self.staging.mark_edited(name);
                }
                debug!(%path, "sub-parameter patched");
            }
            ParamChange::Value(v) => {
                if !self.params.contains_key(name) {
                    return Err(EngineError::UnknownParameter(name.to_string()));
                }
                if !v.is_finite() {
                    return Err(EngineError::invalid_value(name, "value must be finite"));
                }
                if self.playing {
                    self.staging.stage_override(name, ResolvedEnvelope::constant(v, 0.0));
                } else {
                    self.emit_one(name, ResolvedEnvelope::constant(v, glide), sink);
                }
                return Ok(());
            }
        }
        if self.playing {
            debug!(param = name, "change staged for next boundary");
        } else if let Some(p) = self.params.get_mut(name) {
            let env = p.resolve(ResolveMode::Peek, &mut self.rng, glide);
            self.emit_one(name, env, sink);
        }
        Ok(())
    }

    /// Switch a parameter between generator-driven and constant.
    pub fn set_routing(
        &mut self,
        name: &str,
        routing: Routing,
        glide: Option<f64>,
        sink: &mut impl EnvelopeSink,
    ) -> Result<()> {
        let glide = self.glide_or_default(glide);
        let p = self.params.get_mut(name).ok_or_else(|| EngineError::UnknownParameter(name.to_string()))?;
        if self.playing {
            self.staging.stage_routing(name, routing);
            return Ok(());
        }
        p.routing = routing;
        let env = p.resolve(ResolveMode::Peek, &mut self.rng, glide);
        self.emit_one(name, env, sink);
        Ok(())
    }

    /// Re-roll every static pick at the next boundary only.
    pub fn request_reresolve(&mut self) {
        debug!("re-resolve requested");
        self.staging.request_reresolve();
    }

    fn upsert(&mut self, name: &str, cfg: ParameterConfig) {
        let cfg = ParameterConfig { name: name.to_string(), ..cfg };
        match self.params.get_mut(name) {
            Some(p) => p.replace(cfg, &mut self.rng),
            None => {
                let p = ParameterState::new(cfg, &mut self.rng);
                self.params.insert(name.to_string(), p);
            }
        }
        self.staging.drop_override(name);
        if self.playing {
            self.staging.mark_edited(name);
        }
    }

    // ------------------------------------------------------------------ scenes

    /// SAVE_SCENE: capture now while paused, at the next boundary while playing.
    pub fn save_scene(&mut self, slot: u32) {
        if self.playing {
            debug!(slot, "scene capture staged");
            self.staging.stage_capture(slot);
        } else {
            self.capture(slot);
        }
    }

    /// Capture immediately into `slot` and return a copy.
    pub fn capture(&mut self, slot: u32) -> SceneSnapshot {
        let meta = SceneMetadata { label: None, cycle: self.cycle, captured_while_playing: self.playing };
        let snap = SceneSnapshot::capture(&self.params, meta);
        self.scenes.store(slot, snap.clone());
        info!(slot, params = snap.parameter_configs.len(), "scene captured");
        snap
    }

    /// LOAD_SCENE. A missing slot or bad version fails here and leaves the live
    /// state untouched, whichever transport state we are in.
    pub fn restore(&mut self, slot: u32, portamento_hint: Option<f64>, sink: &mut impl EnvelopeSink) -> Result<()> {
        let snapshot = self.scenes.get(slot)?.clone();
        snapshot.validate()?;
        if self.playing {
            info!(slot, "scene load staged");
            self.staging.stage_scene_load(slot, snapshot);
            return Ok(());
        }
        let glide = self.glide_or_default(portamento_hint);
        let params = snapshot.to_parameters(&mut self.rng)?;
        self.install(params);
        let mut out = BTreeMap::new();
        for (name, p) in &mut self.params {
            out.insert(name.clone(), p.resolve(ResolveMode::Peek, &mut self.rng, glide));
        }
        info!(slot, "scene loaded");
        self.emit_all(out, sink);
        Ok(())
    }

    pub fn clear_scene(&mut self, slot: u32) {
        if self.scenes.clear(slot) {
            info!(slot, "scene cleared");
        }
    }

    pub fn clear_banks(&mut self) {
        self.scenes.clear_all();
        info!("scene banks cleared");
    }

    fn install(&mut self, params: BTreeMap<String, ParameterState>) {
        let gone: Vec<String> = self.params.keys().filter(|k| !params.contains_key(*k)).cloned().collect();
        for name in gone {
            self.staging.forget_param(&name);
        }
        self.params = params;
    }

    // ------------------------------------------------------------------ boundary

    /// Apply one boundary batch. Infallible: a local fault is logged and skipped.
    pub fn on_cycle_boundary(&mut self, cycle: u64, sink: &mut impl EnvelopeSink) {
        self.cycle = Some(cycle);
        let batch = self.staging.take();
        if batch.reresolve {
            for p in self.params.values_mut() {
                p.reroll_static(&mut self.rng);
            }
            info!(cycle, "static picks re-rolled");
        }
        let mut out = BTreeMap::new();
        for (name, p) in &mut self.params {
            out.insert(name.clone(), p.resolve(ResolveMode::Advance, &mut self.rng, 0.0));
        }
        self.apply_staged(batch, &mut out, ResolveMode::Advance, 0.0);
        debug!(cycle, params = out.len(), "boundary batch");
        self.emit_all(out, sink);
    }

    /// Overrides, then scene load, then routing, then captures.
    fn apply_staged(
        &mut self,
        batch: StagedBatch,
        out: &mut BTreeMap<String, ResolvedEnvelope>,
        mode: ResolveMode,
        portamento_ms: f64,
    ) {
        for (name, env) in batch.overrides {
            if self.params.contains_key(&name) {
                out.insert(name, env.with_portamento(portamento_ms));
            }
        }

        if let Some(load) = batch.scene_load {
            match load.snapshot.to_parameters(&mut self.rng) {
                Ok(params) => {
                    self.install(params);
                    out.retain(|k, _| self.params.contains_key(k));
                    for (name, p) in &mut self.params {
                        out.insert(name.clone(), p.resolve(mode, &mut self.rng, portamento_ms));
                    }
                    info!(slot = load.slot, "staged scene loaded");
                }
                Err(e) => warn!(slot = load.slot, error = %e, "staged scene load failed"),
            }
        }

        for (name, routing) in batch.routing {
            let Some(p) = self.params.get_mut(&name) else { continue };
            if p.routing != routing {
                // Constant routing never touched the generators this batch, so the
                // switch back to them resolves in the batch's own mode.
                p.routing = routing;
                out.insert(name, p.resolve(mode, &mut self.rng, portamento_ms));
            }
        }

        for slot in batch.captures {
            self.capture(slot);
        }
    }

    // ------------------------------------------------------------------ output

    fn emit_one(&mut self, name: &str, env: ResolvedEnvelope, sink: &mut impl EnvelopeSink) {
        self.last_values.insert(name.to_string(), env);
        sink.set_env(name, &env);
    }

    fn emit_all(&mut self, out: BTreeMap<String, ResolvedEnvelope>, sink: &mut impl EnvelopeSink) {
        if out.is_empty() {
            return;
        }
        for (name, env) in &out {
            self.last_values.insert(name.clone(), *env);
        }
        sink.set_all_env(&out);
    }
}
