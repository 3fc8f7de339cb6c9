//! Parsed path addresses into a nested state tree.
//!
//! The textual syntax is dot-separated keys with optional bracketed
//! 1-based indices per segment (`Inventory.Weapons[1].Durability`).
//! Parsing validates once; the parsed [`Path`] is reused for hot paths.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PathError;

/// One navigation step: a mapping key or a sequence index.
///
/// Indices are 0-based internally; the textual syntax is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

/// An immutable parsed address: an ordered sequence of steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    steps: Vec<PathStep>,
}

impl Path {
    /// Parse a textual address.
    ///
    /// Grammar: `segment ('.' segment)*` where a segment is a non-empty key
    /// followed by zero or more `[n]` suffixes with `n >= 1`.
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let invalid = |reason: &str| PathError::InvalidPath {
            path: text.to_string(),
            reason: reason.to_string(),
        };

        if text.is_empty() {
            return Err(invalid("empty path"));
        }

        let mut steps = Vec::new();
        for segment in text.split('.') {
            let (key, mut rest) = match segment.find('[') {
                Some(pos) => segment.split_at(pos),
                None => (segment, ""),
            };
            if key.is_empty() {
                return Err(invalid("empty segment"));
            }
            if key.contains(']') {
                return Err(invalid("unmatched `]`"));
            }
            steps.push(PathStep::Key(key.to_string()));

            while let Some(stripped) = rest.strip_prefix('[') {
                let Some(close) = stripped.find(']') else {
                    return Err(invalid("unterminated `[`"));
                };
                let digits = &stripped[..close];
                let index: usize = digits
                    .parse()
                    .map_err(|_| invalid("index is not an integer"))?;
                if index == 0 {
                    return Err(invalid("indices are 1-based"));
                }
                steps.push(PathStep::Index(index - 1));
                rest = &stripped[close + 1..];
            }
            if !rest.is_empty() {
                return Err(invalid("trailing characters after `]`"));
            }
        }

        Ok(Self { steps })
    }

    /// Build a path directly from steps (used by sugar operations).
    pub fn from_steps(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The top-level key this path lives under.
    ///
    /// The first step of a parsed path is always a key, which is the
    /// granularity at which subtrees are replicated to remote observers.
    pub fn root_key(&self) -> Option<&str> {
        match self.steps.first() {
            Some(PathStep::Key(k)) => Some(k),
            _ => None,
        }
    }

    /// A new path with `step` appended.
    pub fn child(&self, step: PathStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    /// The path without its final step, or `None` for a single-step path.
    pub fn parent(&self) -> Option<Self> {
        if self.steps.len() <= 1 {
            return None;
        }
        Some(Self {
            steps: self.steps[..self.steps.len() - 1].to_vec(),
        })
    }

    pub fn last_step(&self) -> Option<&PathStep> {
        self.steps.last()
    }

    /// Whether `prefix` is a leading subsequence of this path.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        prefix.steps.len() <= self.steps.len()
            && self.steps[..prefix.steps.len()] == prefix.steps[..]
    }

    /// Whether one of the two paths is a prefix of (or equal to) the other.
    ///
    /// This is the listener-filter relation: a filter on `Inventory` matches
    /// changes under `Inventory.Weapons[1]`, and a filter on
    /// `Inventory.Weapons[1].Durability` matches a change to `Inventory`.
    pub fn relates_to(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Textual form of the first `n` steps, for error context.
    pub(crate) fn prefix_text(&self, n: usize) -> String {
        Self {
            steps: self.steps[..n.min(self.steps.len())].to_vec(),
        }
        .to_string()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                PathStep::Key(k) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", k)?;
                }
                PathStep::Index(idx) => write!(f, "[{}]", idx + 1)?,
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keys_and_indices() {
        let path = Path::parse("Inventory.Weapons[1].Durability").unwrap();
        assert_eq!(
            path.steps(),
            &[
                PathStep::Key("Inventory".into()),
                PathStep::Key("Weapons".into()),
                PathStep::Index(0),
                PathStep::Key("Durability".into()),
            ]
        );
        assert_eq!(path.root_key(), Some("Inventory"));
    }

    #[test]
    fn test_display_round_trip() {
        for text in ["Coins", "Inventory.Weapons[1].Durability", "Grid[2][3]"] {
            let path = Path::parse(text).unwrap();
            assert_eq!(path.to_string(), text);
            assert_eq!(Path::parse(&path.to_string()).unwrap(), path);
        }
    }

    #[test]
    fn test_invalid_paths() {
        for text in [
            "",
            ".",
            "a..b",
            "a.",
            "a[0]",
            "a[]",
            "a[x]",
            "a[1",
            "a]1[",
            "a[1]b",
        ] {
            assert!(
                matches!(Path::parse(text), Err(PathError::InvalidPath { .. })),
                "expected parse failure for `{}`",
                text
            );
        }
    }

    #[test]
    fn test_prefix_relations() {
        let root = Path::parse("Inventory").unwrap();
        let leaf = Path::parse("Inventory.Weapons[1].Durability").unwrap();
        let other = Path::parse("Coins").unwrap();

        assert!(leaf.starts_with(&root));
        assert!(!root.starts_with(&leaf));
        assert!(root.relates_to(&leaf));
        assert!(leaf.relates_to(&root));
        assert!(leaf.relates_to(&leaf));
        assert!(!leaf.relates_to(&other));
    }

    #[test]
    fn test_parent_and_child() {
        let path = Path::parse("Inventory.Weapons[1]").unwrap();
        assert_eq!(path.parent(), Some(Path::parse("Inventory.Weapons").unwrap()));
        assert_eq!(
            path.child(PathStep::Key("Durability".into())),
            Path::parse("Inventory.Weapons[1].Durability").unwrap()
        );
        assert_eq!(Path::parse("Coins").unwrap().parent(), None);
    }
}
