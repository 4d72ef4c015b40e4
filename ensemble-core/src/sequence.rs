//! Sequencing behaviors and the per-axis cursor that walks a list.
//!
//! A cursor always points at the element the **next** advance will yield:
//! `advance` returns the element under the cursor and then moves it. That way a
//! peek shows exactly what will play next and never burns a step.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How a cursor moves through its list on every advancing resolution.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceBehavior {
    /// Random pick held until a re-roll.
    #[default]
    Static,
    Ascending,
    Descending,
    /// Random permutation, regenerated once exhausted.
    Shuffle,
    /// Fresh uniform draw on every advance.
    Random,
}

impl SequenceBehavior {
    pub fn name(self) -> &'static str {
        match self {
            SequenceBehavior::Static => "static",
            SequenceBehavior::Ascending => "ascending",
            SequenceBehavior::Descending => "descending",
            SequenceBehavior::Shuffle => "shuffle",
            SequenceBehavior::Random => "random",
        }
    }

    /// Case-insensitive lookup; `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "static" => Some(SequenceBehavior::Static),
            "ascending" | "asc" => Some(SequenceBehavior::Ascending),
            "descending" | "desc" => Some(SequenceBehavior::Descending),
            "shuffle" => Some(SequenceBehavior::Shuffle),
            "random" => Some(SequenceBehavior::Random),
            _ => None,
        }
    }
}

/// Cursor state for one axis of one generator.
///
/// For `Shuffle`, `index` is the position inside `permutation`; for every other
/// behavior it is a direct list index and `permutation` is `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisCursor {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permutation: Option<Vec<usize>>,
}

fn fresh_permutation<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<usize> {
    let mut p: Vec<usize> = (0..len).collect();
    p.shuffle(rng);
    p
}

impl AxisCursor {
    /// Seed a cursor for a list of `len` elements.
    pub fn new<R: Rng + ?Sized>(behavior: SequenceBehavior, len: usize, rng: &mut R) -> Self {
        let len = len.max(1);
        match behavior {
            SequenceBehavior::Static | SequenceBehavior::Random => {
                Self { index: rng.gen_range(0..len), permutation: None }
            }
            SequenceBehavior::Ascending => Self { index: 0, permutation: None },
            SequenceBehavior::Descending => Self { index: len - 1, permutation: None },
            SequenceBehavior::Shuffle => Self { index: 0, permutation: Some(fresh_permutation(len, rng)) },
        }
    }

    /// List index the next advance will yield. Always within `[0, len-1]`.
    #[inline]
    pub fn current(&self, len: usize) -> usize {
        let last = len.max(1) - 1;
        let raw = match &self.permutation {
            Some(p) if !p.is_empty() => p[self.index.min(p.len() - 1)],
            _ => self.index,
        };
        raw.min(last)
    }

    /// Yield the current list index, then move according to `behavior`.
    pub fn advance<R: Rng + ?Sized>(&mut self, behavior: SequenceBehavior, len: usize, rng: &mut R) -> usize {
        let len = len.max(1);
        let yielded = self.current(len);
        match behavior {
            SequenceBehavior::Static => {}
            SequenceBehavior::Ascending => self.index = (yielded + 1) % len,
            SequenceBehavior::Descending => self.index = (yielded + len - 1) % len,
            SequenceBehavior::Shuffle => {
                let exhausted = match &self.permutation {
                    Some(p) => self.index + 1 >= p.len(),
                    None => true,
                };
                if exhausted {
                    self.permutation = Some(fresh_permutation(len, rng));
                    self.index = 0;
                } else {
                    self.index += 1;
                }
            }
            SequenceBehavior::Random => self.index = rng.gen_range(0..len),
        }
        yielded
    }

    /// Fresh uniform pick for `Static` cursors; no-op otherwise.
    pub fn reroll_static<R: Rng + ?Sized>(&mut self, behavior: SequenceBehavior, len: usize, rng: &mut R) {
        if behavior == SequenceBehavior::Static {
            self.index = rng.gen_range(0..len.max(1));
        }
    }

    /// Bring a restored cursor back into bounds for the current list.
    ///
    /// The index is clamped into `[0, len-1]`; a shuffle permutation that is
    /// missing, the wrong length, or not a permutation is regenerated.
    pub fn reconcile<R: Rng + ?Sized>(&mut self, behavior: SequenceBehavior, len: usize, rng: &mut R) {
        let len = len.max(1);
        if behavior == SequenceBehavior::Shuffle {
            let valid = self.permutation.as_ref().is_some_and(|p| is_permutation(p, len));
            if !valid {
                self.permutation = Some(fresh_permutation(len, rng));
            }
        } else {
            self.permutation = None;
        }
        self.index = self.index.min(len - 1);
    }
}

fn is_permutation(p: &[usize], len: usize) -> bool {
    if p.len() != len {
        return false;
    }
    let mut seen = vec![false; len];
    for &i in p {
        if i >= len || seen[i] {
            return false;
        }
        seen[i] = true;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng { StdRng::seed_from_u64(7) }

    #[test]
    fn ascending_wraps_back_to_start() {
        let mut r = rng();
        let mut c = AxisCursor::new(SequenceBehavior::Ascending, 4, &mut r);
        let start = c.current(4);
        let seen: Vec<usize> = (0..4).map(|_| c.advance(SequenceBehavior::Ascending, 4, &mut r)).collect();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(c.current(4), start);
    }

    #[test]
    fn descending_starts_at_the_end() {
        let mut r = rng();
        let mut c = AxisCursor::new(SequenceBehavior::Descending, 3, &mut r);
        let seen: Vec<usize> = (0..4).map(|_| c.advance(SequenceBehavior::Descending, 3, &mut r)).collect();
        assert_eq!(seen, vec![2, 1, 0, 2]);
    }

    #[test]
    fn shuffle_visits_each_element_once_per_pass() {
        let mut r = rng();
        let n = 9;
        let mut c = AxisCursor::new(SequenceBehavior::Shuffle, n, &mut r);
        for _pass in 0..3 {
            let mut seen: Vec<usize> = (0..n).map(|_| c.advance(SequenceBehavior::Shuffle, n, &mut r)).collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn static_holds_until_rerolled() {
        let mut r = rng();
        let mut c = AxisCursor::new(SequenceBehavior::Static, 50, &mut r);
        let first = c.advance(SequenceBehavior::Static, 50, &mut r);
        for _ in 0..20 {
            assert_eq!(c.advance(SequenceBehavior::Static, 50, &mut r), first);
        }
        let mut changed = false;
        for _ in 0..20 {
            c.reroll_static(SequenceBehavior::Static, 50, &mut r);
            changed |= c.current(50) != first;
        }
        assert!(changed);
    }

    #[test]
    fn single_element_lists_are_behavior_independent() {
        let mut r = rng();
        for b in [
            SequenceBehavior::Static,
            SequenceBehavior::Ascending,
            SequenceBehavior::Descending,
            SequenceBehavior::Shuffle,
            SequenceBehavior::Random,
        ] {
            let mut c = AxisCursor::new(b, 1, &mut r);
            for _ in 0..5 {
                assert_eq!(c.advance(b, 1, &mut r), 0, "{b:?}");
            }
        }
    }

    #[test]
    fn reconcile_clamps_and_repairs() {
        let mut r = rng();
        let mut c = AxisCursor { index: 10, permutation: None };
        c.reconcile(SequenceBehavior::Ascending, 3, &mut r);
        assert_eq!(c.index, 2);

        let mut s = AxisCursor { index: 7, permutation: Some(vec![0, 0, 1]) };
        s.reconcile(SequenceBehavior::Shuffle, 4, &mut r);
        let p = s.permutation.clone().unwrap();
        assert!(is_permutation(&p, 4));
        assert_eq!(s.index, 3);
    }

    #[test]
    fn behavior_names_round_trip() {
        for b in [SequenceBehavior::Static, SequenceBehavior::Shuffle, SequenceBehavior::Random] {
            assert_eq!(SequenceBehavior::from_name(b.name()), Some(b));
        }
        assert_eq!(SequenceBehavior::from_name("ASC"), Some(SequenceBehavior::Ascending));
        assert_eq!(SequenceBehavior::from_name("sideways"), None);
    }
}
