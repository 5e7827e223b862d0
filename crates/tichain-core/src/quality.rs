use serde::{Deserialize, Serialize};

/// Ordinal quality flag attached to every sample (spec §3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Good,
    Uncertain,
    Bad,
    Substituted,
}

impl Quality {
    /// Ordinal rank, lowest-confidence first. Used only for display/sort;
    /// current-value replacement is governed by timestamp, not quality
    /// (spec §3 CurrentValue invariant).
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Quality::Bad => 0,
            Quality::Uncertain => 1,
            Quality::Substituted => 2,
            Quality::Good => 3,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Quality::Good => "good",
            Quality::Uncertain => "uncertain",
            Quality::Bad => "bad",
            Quality::Substituted => "substituted",
        };
        f.write_str(s)
    }
}

/// Typed value kind for a registered point (spec §3 Point).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Numeric,
    Boolean,
    Enumerated,
}
