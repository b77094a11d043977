//! Syntactic versions and the version index
//!
//! Every schema in a lineage is identified by a `(sequence, minor)` pair.
//! Versions order lexicographically, and `0.0` is the first version of every
//! lineage.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::LineageError;

/// A `(sequence, minor)` schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct SyntacticVersion {
    /// Sequence (major) number
    pub sequence: u32,
    /// Minor number within the sequence
    pub minor: u32,
}

impl SyntacticVersion {
    /// The mandatory first version of every lineage
    pub const FIRST: SyntacticVersion = SyntacticVersion::new(0, 0);

    pub const fn new(sequence: u32, minor: u32) -> Self {
        Self { sequence, minor }
    }

    /// Parse `"1.2"` or `"v1.2"`
    pub fn parse(s: &str) -> Result<Self, LineageError> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"^v?(\d+)\.(\d+)$").expect("syntactic version pattern is valid")
        });

        let caps = re
            .captures(s.trim())
            .ok_or_else(|| LineageError::MalformedVersion(s.to_string()))?;
        let sequence = caps[1]
            .parse()
            .map_err(|_| LineageError::MalformedVersion(s.to_string()))?;
        let minor = caps[2]
            .parse()
            .map_err(|_| LineageError::MalformedVersion(s.to_string()))?;
        Ok(Self::new(sequence, minor))
    }

    pub fn same_sequence(&self, other: &SyntacticVersion) -> bool {
        self.sequence == other.sequence
    }

    /// The version a minor bump of this one would produce, if it fits
    pub fn next_minor(&self) -> Option<Self> {
        Some(Self::new(self.sequence, self.minor.checked_add(1)?))
    }

    /// The version a breaking (sequence) bump of this one would produce, if
    /// it fits
    pub fn next_sequence(&self) -> Option<Self> {
        Some(Self::new(self.sequence.checked_add(1)?, 0))
    }
}

impl fmt::Display for SyntacticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sequence, self.minor)
    }
}

impl FromStr for SyntacticVersion {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<[u32; 2]> for SyntacticVersion {
    fn from(v: [u32; 2]) -> Self {
        Self::new(v[0], v[1])
    }
}

impl From<SyntacticVersion> for [u32; 2] {
    fn from(v: SyntacticVersion) -> Self {
        [v.sequence, v.minor]
    }
}

/// Shorthand for [`SyntacticVersion::new`]
pub const fn sv(sequence: u32, minor: u32) -> SyntacticVersion {
    SyntacticVersion::new(sequence, minor)
}

/// Sorted, immutable list of the versions in a lineage.
///
/// Built once at bind time. All lookups are binary searches.
#[derive(Debug, Clone)]
pub struct VersionIndex {
    versions: Vec<SyntacticVersion>,
}

impl VersionIndex {
    /// Callers guarantee `versions` is sorted and duplicate-free.
    pub(crate) fn new(versions: Vec<SyntacticVersion>) -> Self {
        debug_assert!(versions.windows(2).all(|w| w[0] < w[1]));
        Self { versions }
    }

    pub fn position(&self, v: SyntacticVersion) -> Option<usize> {
        self.versions.binary_search(&v).ok()
    }

    pub fn contains(&self, v: SyntacticVersion) -> bool {
        self.position(v).is_some()
    }

    pub fn successor(&self, v: SyntacticVersion) -> Option<SyntacticVersion> {
        let i = self.position(v)?;
        self.versions.get(i + 1).copied()
    }

    pub fn predecessor(&self, v: SyntacticVersion) -> Option<SyntacticVersion> {
        let i = self.position(v)?;
        i.checked_sub(1).map(|p| self.versions[p])
    }

    /// Newest version sharing `sequence`, if that sequence exists
    pub fn latest_in_sequence(&self, sequence: u32) -> Option<SyntacticVersion> {
        let end = self.versions.partition_point(|x| x.sequence <= sequence);
        end.checked_sub(1)
            .map(|i| self.versions[i])
            .filter(|v| v.sequence == sequence)
    }

    pub fn first(&self) -> Option<SyntacticVersion> {
        self.versions.first().copied()
    }

    pub fn latest(&self) -> Option<SyntacticVersion> {
        self.versions.last().copied()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn as_slice(&self) -> &[SyntacticVersion] {
        &self.versions
    }

    pub fn iter(&self) -> impl Iterator<Item = SyntacticVersion> + '_ {
        self.versions.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> VersionIndex {
        VersionIndex::new(vec![sv(0, 0), sv(0, 1), sv(0, 2), sv(1, 0), sv(2, 0), sv(2, 1)])
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(SyntacticVersion::parse("1.2").unwrap(), sv(1, 2));
        assert_eq!(SyntacticVersion::parse("v0.7").unwrap(), sv(0, 7));
        assert!(SyntacticVersion::parse("1").is_err());
        assert!(SyntacticVersion::parse("1.2.3").is_err());
        assert!(SyntacticVersion::parse("a.b").is_err());
    }

    #[test]
    fn test_version_ordering() {
        assert!(sv(0, 9) < sv(1, 0));
        assert!(sv(1, 0) < sv(1, 1));
        assert_eq!(sv(2, 3).to_string(), "2.3");
    }

    #[test]
    fn test_next_versions_stop_at_the_edge() {
        assert_eq!(sv(1, 2).next_minor(), Some(sv(1, 3)));
        assert_eq!(sv(1, 2).next_sequence(), Some(sv(2, 0)));
        assert_eq!(sv(0, u32::MAX).next_minor(), None);
        assert_eq!(sv(u32::MAX, 0).next_sequence(), None);
        assert_eq!(sv(u32::MAX, 0).next_minor(), Some(sv(u32::MAX, 1)));
    }

    #[test]
    fn test_version_serde_as_pair() {
        let json = serde_json::to_string(&sv(1, 4)).unwrap();
        assert_eq!(json, "[1,4]");
        let back: SyntacticVersion = serde_json::from_str("[3,0]").unwrap();
        assert_eq!(back, sv(3, 0));
    }

    #[test]
    fn test_successor_predecessor_symmetry() {
        let idx = index();
        for v in idx.iter() {
            if let Some(next) = idx.successor(v) {
                assert_eq!(idx.predecessor(next), Some(v));
            }
            if let Some(prev) = idx.predecessor(v) {
                assert_eq!(idx.successor(prev), Some(v));
            }
        }
        assert_eq!(idx.predecessor(sv(0, 0)), None);
        assert_eq!(idx.successor(sv(2, 1)), None);
        assert_eq!(idx.successor(sv(5, 5)), None);
    }

    #[test]
    fn test_latest_in_sequence() {
        let idx = index();
        assert_eq!(idx.latest_in_sequence(0), Some(sv(0, 2)));
        assert_eq!(idx.latest_in_sequence(1), Some(sv(1, 0)));
        assert_eq!(idx.latest_in_sequence(2), Some(sv(2, 1)));
        assert_eq!(idx.latest_in_sequence(3), None);
    }
}
