//! Compact integer sequence notation: `"1-3,5"` → `[1, 2, 3, 5]`.
//!
//! Grammar (whitespace is ignored around every token):
//! ```text
//! list  := item ("," item)*
//! item  := int | int "-" int
//! ```
//! A reversed range (`"5-3"`) expands downwards. Anything unparsable, empty, or
//! absurdly long falls back to the single-element list `[1]`; the fallback is
//! logged, never fatal.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Upper bound on an expanded list. Longer inputs are treated as malformed.
pub const MAX_SEQUENCE_LEN: usize = 4096;

/// Error describing why a notation string was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotationError {
    pub input: String,
    pub reason: &'static str,
}

impl fmt::Display for NotationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid sequence notation {:?}: {}", self.input, self.reason)
    }
}

impl std::error::Error for NotationError {}

/// Strict parser. Returns an error instead of falling back.
pub fn try_parse(input: &str) -> Result<Vec<u32>, NotationError> {
    let err = |reason| NotationError { input: input.to_string(), reason };
    let mut out = Vec::new();

    for item in input.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(err("empty item"));
        }
        match item.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.trim().parse().map_err(|_| err("range start is not a number"))?;
                let hi: u32 = hi.trim().parse().map_err(|_| err("range end is not a number"))?;
                let span = lo.abs_diff(hi) as usize + 1;
                if out.len() + span > MAX_SEQUENCE_LEN {
                    return Err(err("sequence too long"));
                }
                if lo <= hi {
                    out.extend(lo..=hi);
                } else {
                    out.extend((hi..=lo).rev());
                }
            }
            None => {
                let v: u32 = item.parse().map_err(|_| err("not a number"))?;
                if out.len() + 1 > MAX_SEQUENCE_LEN {
                    return Err(err("sequence too long"));
                }
                out.push(v);
            }
        }
    }
    Ok(out)
}

/// Lenient parser used everywhere at runtime: malformed input yields `[1]`.
pub fn parse_or_default(input: &str) -> Vec<u32> {
    match try_parse(input) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("{e}; falling back to [1]");
            vec![1]
        }
    }
}

/// Render a list back into compact notation, folding ascending runs of 3+ into ranges.
pub fn format_sequence(values: &[u32]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut i = 0;
    while i < values.len() {
        let start = values[i];
        let mut j = i;
        while j + 1 < values.len() && values[j + 1] == values[j].wrapping_add(1) {
            j += 1;
        }
        if j - i >= 2 {
            parts.push(format!("{}-{}", start, values[j]));
            i = j + 1;
        } else {
            parts.push(start.to_string());
            i += 1;
        }
    }
    parts.join(",")
}

/// A non-empty ordered integer list, written either as notation or as an array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SequenceRepr", into = "Vec<u32>")]
pub struct Sequence(Vec<u32>);

#[derive(Deserialize)]
#[serde(untagged)]
enum SequenceRepr {
    Notation(String),
    List(Vec<u32>),
}

impl From<SequenceRepr> for Sequence {
    fn from(r: SequenceRepr) -> Self {
        match r {
            SequenceRepr::Notation(s) => Sequence::parse(&s),
            SequenceRepr::List(v) => Sequence::from_values(v),
        }
    }
}

impl From<Sequence> for Vec<u32> {
    fn from(s: Sequence) -> Self { s.0 }
}

impl Sequence {
    /// Lenient parse; see [`parse_or_default`].
    pub fn parse(input: &str) -> Self { Self(parse_or_default(input)) }

    /// Wrap an explicit list. An empty or oversized list falls back to `[1]`.
    pub fn from_values(values: Vec<u32>) -> Self {
        if values.is_empty() || values.len() > MAX_SEQUENCE_LEN {
            tracing::warn!("sequence of length {} rejected; falling back to [1]", values.len());
            Self(vec![1])
        } else {
            Self(values)
        }
    }

    #[inline] pub fn values(&self) -> &[u32] { &self.0 }
    #[inline] pub fn len(&self) -> usize { self.0.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Value at `index`, clamped into bounds.
    #[inline]
    pub fn get_clamped(&self, index: usize) -> u32 {
        self.0[index.min(self.0.len() - 1)]
    }

    pub fn notation(&self) -> String { format_sequence(&self.0) }
}

impl Default for Sequence {
    fn default() -> Self { Self(vec![1]) }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.notation())
    }
}
