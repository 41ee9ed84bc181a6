//! Chart identities and the archive key naming convention.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Filename suffix shared by every packaged chart archive.
pub const ARCHIVE_SUFFIX: &str = ".tgz";

/// A `(name, version)` pair identifying one packaged chart release.
///
/// Equality and ordering are plain string comparisons on both fields. The
/// pair is the join key between index entries and archive keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChartId {
    pub name: String,
    pub version: String,
}

impl ChartId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Full object key for this release under `prefix`.
    ///
    /// Inverse of [`ChartId::from_archive_key`] for every identity this tool
    /// itself publishes; reconciliation relies on the round trip being exact.
    pub fn archive_key(&self, prefix: &str) -> String {
        format!("{}{}-{}{}", prefix, self.name, self.version, ARCHIVE_SUFFIX)
    }

    /// Parse an archive key back into a chart identity.
    ///
    /// The stem between `prefix` and `.tgz` is split at the rightmost hyphen
    /// whose suffix looks like a version: starts with an ASCII digit and
    /// contains a `.`. If no hyphen qualifies, the rightmost hyphen followed
    /// by an ASCII digit is used instead. Hyphenated pre-release versions
    /// (`app-1.0.0-rc.1`) and digit-bearing name segments (`app-2x-1.0.0`)
    /// both resolve correctly under this rule; a version whose last segment
    /// is itself digit-and-dot shaped stays ambiguous and parses in favor of
    /// the shorter version.
    pub fn from_archive_key(key: &str, prefix: &str) -> Option<Self> {
        let stem = key.strip_prefix(prefix)?.strip_suffix(ARCHIVE_SUFFIX)?;
        let split = version_split(stem)?;
        let (name, version) = (&stem[..split], &stem[split + 1..]);
        if name.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self::new(name, version))
    }
}

impl fmt::Display for ChartId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

fn looks_like_version(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_digit()) && s.contains('.')
}

fn version_split(stem: &str) -> Option<usize> {
    let hyphens: Vec<usize> = stem.match_indices('-').map(|(i, _)| i).collect();
    hyphens
        .iter()
        .rev()
        .find(|&&i| looks_like_version(&stem[i + 1..]))
        .or_else(|| {
            hyphens
                .iter()
                .rev()
                .find(|&&i| stem[i + 1..].starts_with(|c: char| c.is_ascii_digit()))
        })
        .copied()
}
