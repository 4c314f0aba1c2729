//! # Labels
//! The fixed maturity label set and the sentinel "invalid" label.
//!
//! The order of `Maturity::ALL` is the order of the model's output vector.

use serde::{Serialize, Serializer};
use std::fmt;

/// Number of real classes the CNNs were trained on.
pub const CLASS_COUNT: usize = 3;

/// Display string for rejected images. Shares no prefix with the real class
/// names, so UI/API consumers can branch on it.
pub const INVALID_LABEL: &str = "Invalid - Not a Dragon Fruit";

/// Maturity class, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Maturity {
    Defect,
    Immature,
    Mature,
}

impl Maturity {
    pub const ALL: [Maturity; CLASS_COUNT] = [Maturity::Defect, Maturity::Immature, Maturity::Mature];

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn index(self) -> usize {
        match self {
            Maturity::Defect => 0,
            Maturity::Immature => 1,
            Maturity::Mature => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Maturity::Defect => "Defect Dragon Fruit",
            Maturity::Immature => "Immature Dragon Fruit",
            Maturity::Mature => "Mature Dragon Fruit",
        }
    }
}

impl fmt::Display for Maturity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Maturity {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.name())
    }
}

/// Final label shown to callers: a real class or the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Class(Maturity),
    Invalid,
}

impl Label {
    pub fn is_invalid(self) -> bool {
        matches!(self, Label::Invalid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Class(m) => m.name(),
            Label::Invalid => INVALID_LABEL,
        }
    }
}

impl From<Maturity> for Label {
    fn from(m: Maturity) -> Self {
        Label::Class(m)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}
