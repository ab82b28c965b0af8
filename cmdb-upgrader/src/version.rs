//! Upgrade version strings
//!
//! Three naming schemes have been used over the product's history:
//! `v3.0.8`, `x19.05.16.01` and `y3.10.202104221702`. Each later scheme sorts
//! after every version of the earlier ones; within a scheme versions compare
//! by their numeric dot-separated segments.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::UpgradeError;

/// Version naming scheme, in release order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VersionScheme {
    V,
    X,
    Y,
}

impl VersionScheme {
    fn from_prefix(c: char) -> Option<Self> {
        match c {
            'v' => Some(Self::V),
            'x' => Some(Self::X),
            'y' => Some(Self::Y),
            _ => None,
        }
    }
}

/// Parsed upgrade version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UpgradeVersion {
    scheme: VersionScheme,
    segments: Vec<u64>,
    raw: String,
}

impl UpgradeVersion {
    pub fn scheme(&self) -> VersionScheme {
        self.scheme
    }

    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for UpgradeVersion {
    type Err = UpgradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let invalid = || UpgradeError::InvalidVersion(s.to_string());

        let mut chars = raw.chars();
        let scheme = chars
            .next()
            .and_then(VersionScheme::from_prefix)
            .ok_or_else(invalid)?;

        let segments = chars
            .as_str()
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                part.parse::<u64>().map_err(|_| invalid())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            scheme,
            segments,
            raw: raw.to_string(),
        })
    }
}

impl TryFrom<String> for UpgradeVersion {
    type Error = UpgradeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<UpgradeVersion> for String {
    fn from(v: UpgradeVersion) -> Self {
        v.raw
    }
}

impl fmt::Display for UpgradeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for UpgradeVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for UpgradeVersion {}

impl PartialOrd for UpgradeVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UpgradeVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.scheme
            .cmp(&other.scheme)
            .then_with(|| self.segments.cmp(&other.segments))
    }
}
