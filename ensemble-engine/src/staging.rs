//! Changes waiting for the next cycle boundary.
//!
//! While playing, nothing audible happens between boundaries. Everything that
//! must land on the boundary is parked here and taken out in one piece by
//! [`StagingArea::take`], so a batch is either fully applied or not at all.

use std::collections::{BTreeMap, BTreeSet};

use crate::params::{ResolvedEnvelope, Routing};
use crate::scenes::SceneSnapshot;

/// Parameter name → envelope that overrides the fresh resolution at the next boundary.
/// Last write wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PendingChangeSet {
    entries: BTreeMap<String, ResolvedEnvelope>,
}

impl PendingChangeSet {
    /// Returns the envelope it replaced, if any.
    pub fn insert(&mut self, param: &str, envelope: ResolvedEnvelope) -> Option<ResolvedEnvelope> {
        self.entries.insert(param.to_string(), envelope)
    }

    pub fn get(&self, param: &str) -> Option<&ResolvedEnvelope> { self.entries.get(param) }
    pub fn remove(&mut self, param: &str) -> Option<ResolvedEnvelope> { self.entries.remove(param) }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

impl IntoIterator for PendingChangeSet {
    type Item = (String, ResolvedEnvelope);
    type IntoIter = std::collections::btree_map::IntoIter<String, ResolvedEnvelope>;
    fn into_iter(self) -> Self::IntoIter { self.entries.into_iter() }
}

/// A scene restore parked until the boundary. The snapshot is cloned when the
/// request arrives, so clearing the slot afterwards does not cancel it.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingSceneLoad {
    pub slot: u32,
    pub snapshot: SceneSnapshot,
}

/// Everything taken out of the staging area for one boundary, in apply order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StagedBatch {
    pub reresolve: bool,
    pub overrides: PendingChangeSet,
    pub scene_load: Option<PendingSceneLoad>,
    pub routing: BTreeMap<String, Routing>,
    pub captures: Vec<u32>,
    /// Parameters whose config changed since the last boundary. A boundary
    /// resolves them like everything else; a pause pushes them out.
    pub edited: BTreeSet<String>,
}

impl StagedBatch {
    pub fn is_empty(&self) -> bool {
        !self.reresolve
            && self.overrides.is_empty()
            && self.scene_load.is_none()
            && self.routing.is_empty()
            && self.captures.is_empty()
            && self.edited.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct StagingArea {
    batch: StagedBatch,
}

impl StagingArea {
    pub fn new() -> Self { Self::default() }

    pub fn stage_override(&mut self, param: &str, envelope: ResolvedEnvelope) {
        self.batch.overrides.insert(param, envelope);
    }

    /// Cancel a staged override; a later config change supersedes it.
    pub fn drop_override(&mut self, param: &str) -> bool {
        self.batch.overrides.remove(param).is_some()
    }

    /// A later load replaces an earlier one.
    pub fn stage_scene_load(&mut self, slot: u32, snapshot: SceneSnapshot) {
        self.batch.scene_load = Some(PendingSceneLoad { slot, snapshot });
    }

    pub fn stage_routing(&mut self, param: &str, routing: Routing) {
        self.batch.routing.insert(param.to_string(), routing);
    }

    pub fn stage_capture(&mut self, slot: u32) {
        if !self.batch.captures.contains(&slot) {
            self.batch.captures.push(slot);
        }
    }

    pub fn mark_edited(&mut self, param: &str) {
        self.batch.edited.insert(param.to_string());
    }

    pub fn request_reresolve(&mut self) { self.batch.reresolve = true; }

    pub fn reresolve_requested(&self) -> bool { self.batch.reresolve }

    pub fn pending(&self) -> &PendingChangeSet { &self.batch.overrides }

    pub fn is_empty(&self) -> bool { self.batch.is_empty() }

    /// Drop staged work that refers to a parameter that no longer exists.
    pub fn forget_param(&mut self, param: &str) {
        self.batch.overrides.remove(param);
        self.batch.routing.remove(param);
        self.batch.edited.remove(param);
    }

    /// Take the whole batch, leaving the area empty.
    pub fn take(&mut self) -> StagedBatch {
        std::mem::take(&mut self.batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut s = StagingArea::new();
        s.stage_override("amp", ResolvedEnvelope::constant(0.1, 0.0));
        s.stage_override("amp", ResolvedEnvelope::constant(0.7, 0.0));
        assert_eq!(s.pending().len(), 1);
        assert_eq!(s.pending().get("amp").map(|e| e.start_value), Some(0.7));
    }

    #[test]
    fn take_clears_everything() {
        let mut s = StagingArea::new();
        s.request_reresolve();
        s.stage_capture(3);
        s.stage_capture(3);
        s.stage_routing("amp", Routing::Constant { value: 1.0 });
        s.mark_edited("freq");
        let batch = s.take();
        assert!(batch.reresolve);
        assert!(batch.edited.contains("freq"));
        assert_eq!(batch.captures, vec![3]);
        assert!(s.is_empty());
        assert!(!s.reresolve_requested());
    }

    #[test]
    fn forgetting_a_param_drops_its_staged_work() {
        let mut s = StagingArea::new();
        s.stage_override("amp", ResolvedEnvelope::constant(0.1, 0.0));
        s.stage_routing("amp", Routing::Generator);
        s.mark_edited("amp");
        s.forget_param("amp");
        assert!(s.is_empty());
    }
}
